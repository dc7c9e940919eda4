//! Site displacement and propagation delay models
use crate::astro;
use gnss_rnx::constants::Constants;
use gnss_rnx::coords::{ecef_to_geocentric, ecef_to_geodetic, ecef_to_topocentric, topocentric_to_ecef};
use gnss_rnx::corr::{VTec, VTecLayer};
use gnss_rnx::epoch;
use gnss_rnx::prn::Prn;
use hifitime::Epoch;
use nalgebra::Vector3;

/// Solid Earth tide displacement, Sun and Moon cached per instant
#[derive(Debug, Default)]
pub struct Tides {
    last_mjd: f64,
    x_sun: Vector3<f64>,
    r_sun: f64,
    x_moon: Vector3<f64>,
    r_moon: f64,
}

impl Tides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Degree 2 tidal displacement of a station in ECEF [m]
    pub fn displacement(&mut self, time: Epoch, xyz: &Vector3<f64>) -> Vector3<f64> {
        let mjd = epoch::mjd_dec(time);

        if mjd != self.last_mjd {
            self.last_mjd = mjd;
            self.x_sun = astro::sun(mjd);
            self.r_sun = self.x_sun.norm();
            self.x_sun /= self.r_sun;
            self.x_moon = astro::moon(mjd);
            self.r_moon = self.x_moon.norm();
            self.x_moon /= self.r_moon;
        }

        let r_rec = xyz.norm();
        let xyz_unit = xyz / r_rec;

        // degree 2 Love numbers
        const H2: f64 = 0.6078;
        const L2: f64 = 0.0847;

        let sc_sun = xyz_unit.dot(&self.x_sun);
        let sc_moon = xyz_unit.dot(&self.x_moon);

        let p2_sun = 3.0 * (H2 / 2.0 - L2) * sc_sun * sc_sun - H2 / 2.0;
        let p2_moon = 3.0 * (H2 / 2.0 - L2) * sc_moon * sc_moon - H2 / 2.0;

        let x2_sun = 3.0 * L2 * sc_sun;
        let x2_moon = 3.0 * L2 * sc_moon;

        const GM_WGS: f64 = 398.6005e12;
        const GMS: f64 = 1.3271250e20;
        const GMM: f64 = 4.9027890e12;

        let fac_sun =
            GMS / GM_WGS * (r_rec * r_rec * r_rec * r_rec) / (self.r_sun * self.r_sun * self.r_sun);
        let fac_moon = GMM / GM_WGS * (r_rec * r_rec * r_rec * r_rec)
            / (self.r_moon * self.r_moon * self.r_moon);

        fac_sun * (x2_sun * self.x_sun + p2_sun * xyz_unit)
            + fac_moon * (x2_moon * self.x_moon + p2_moon * xyz_unit)
    }
}

/// Carrier phase wind up accumulator, one running sum per satellite
#[derive(Debug, Default)]
pub struct WindUp {
    sum_wind: Vec<f64>,
    last_time: Vec<f64>,
}

impl WindUp {
    pub fn new() -> Self {
        Self {
            sum_wind: vec![0.0; Prn::MAX + 1],
            last_time: vec![0.0; Prn::MAX + 1],
        }
    }

    /// Accumulated wind up in cycles for the satellite at the given
    /// epoch. Satellite and receiver dipoles follow the Sun oriented
    /// body frame and the local north / -east axes.
    pub fn value(
        &mut self,
        time: Epoch,
        r_rec: &Vector3<f64>,
        prn: &Prn,
        r_sat: &Vector3<f64>,
    ) -> f64 {
        let index = prn.index();
        let mjd = epoch::mjd_dec(time);
        if self.last_time[index] == mjd {
            return self.sum_wind[index];
        }

        let rho = (r_rec - r_sat).normalize();

        let sz = (-r_sat).normalize();
        let x_sun = astro::sun(mjd).normalize();
        let sy = sz.cross(&x_sun);
        let sx = sy.cross(&sz);

        let dip_sat = sx - rho * rho.dot(&sx) - rho.cross(&sy);

        let ell = match ecef_to_geodetic(r_rec) {
            Ok(ell) => ell,
            Err(_) => return self.sum_wind[index],
        };
        let rx = topocentric_to_ecef(&ell, &Vector3::new(1.0, 0.0, 0.0));
        let ry = topocentric_to_ecef(&ell, &Vector3::new(0.0, -1.0, 0.0));

        let dip_rec = rx - rho * rho.dot(&rx) + rho.cross(&ry);

        let mut alpha = dip_sat.dot(&dip_rec) / (dip_sat.norm() * dip_rec.norm());
        alpha = alpha.clamp(-1.0, 1.0);

        let mut dphi = alpha.acos() / 2.0 / std::f64::consts::PI; // cycles
        if rho.dot(&dip_sat.cross(&dip_rec)) < 0.0 {
            dphi = -dphi;
        }

        if self.last_time[index] == 0.0 {
            self.sum_wind[index] = dphi;
        } else {
            self.sum_wind[index] = (self.sum_wind[index] - dphi + 0.5).floor() + dphi;
        }
        self.last_time[index] = mjd;

        self.sum_wind[index]
    }
}

/// Saastamoinen tropospheric delay model
pub struct Tropo;

impl Tropo {
    /// Zenith mapped tropospheric delay [m] for a receiver at `xyz` and
    /// a satellite at elevation `ele` [rad].
    pub fn delay_saast(xyz: &Vector3<f64>, ele: f64) -> f64 {
        if xyz.norm() == 0.0 {
            return 0.0;
        }
        let height = match ecef_to_geodetic(xyz) {
            Ok(ell) => ell.height,
            Err(_) => return 0.0,
        };

        let pp = 1013.25 * (1.0 - 2.26e-5 * height).powf(5.225);
        let tt = 18.0 - height * 0.0065 + 273.15;
        let hh = 50.0 * (-6.396e-4 * height).exp();
        let ee = hh / 100.0 * (-37.2465 + 0.213166 * tt - 0.000256908 * tt * tt).exp();

        let h_km = (height / 1000.0).clamp(0.0, 5.0);
        let mut ii = (h_km + 1.0) as usize;
        if ii > 5 {
            ii = 5;
        }
        let href = (ii - 1) as f64;

        const B_COR: [f64; 6] = [1.156, 1.006, 0.874, 0.757, 0.654, 0.563];
        let bb = B_COR[ii - 1] + (B_COR[ii] - B_COR[ii - 1]) * (h_km - href);

        let zen = std::f64::consts::FRAC_PI_2 - ele;

        (0.002277 / zen.cos()) * (pp + ((1255.0 / tt) + 0.05) * ee - bb * zen.tan() * zen.tan())
    }
}

/// Single layer ionosphere evaluation of a VTEC model
#[derive(Debug, Default)]
pub struct Iono {
    psi_pp: f64,
    phi_pp: f64,
    lambda_pp: f64,
    lon_s: f64,
}

impl Iono {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slant total electron content [TECU] along the receiver-satellite
    /// path through every layer of the model.
    pub fn stec(
        &mut self,
        vtec: &VTec,
        signal_propagation_time: f64,
        r_sat: &Vector3<f64>,
        epoch_time: Epoch,
        xyz_sta: &Vector3<f64>,
    ) -> f64 {
        let geoc_sta = match ecef_to_geocentric(xyz_sta) {
            Ok(geoc) => geoc,
            Err(_) => return 0.0,
        };

        // satellite position rotated to the reception epoch
        let omega_z = Constants::OMEGA * signal_propagation_time;
        let xyz_sat = Vector3::new(
            r_sat[0] * omega_z.cos() + r_sat[1] * omega_z.sin(),
            r_sat[1] * omega_z.cos() - r_sat[0] * omega_z.sin(),
            r_sat[2],
        );

        // elevation and azimuth with respect to a spherical earth
        let rho_v = xyz_sat - xyz_sta;
        let rho = rho_v.norm();
        let neu = ecef_to_topocentric(&geoc_sta, &rho_v);
        let mut sph_ele = ((neu[0] * neu[0] + neu[1] * neu[1]).sqrt() / rho).acos();
        if neu[2] < 0.0 {
            sph_ele = -sph_ele;
        }
        let sph_azi = neu[1].atan2(neu[0]);

        let day_epoch = epoch::gps_sec_of_week(epoch_time) % 86400.0;

        let mut stec = 0.0;
        for layer in vtec.layers.iter() {
            self.pierce_point(layer.height, day_epoch, &geoc_sta, sph_ele, sph_azi);
            let vtec_value = self.single_layer_contribution(layer);
            stec += vtec_value * (sph_ele + self.psi_pp).sin();
        }
        stec
    }

    fn single_layer_contribution(&self, layer: &VTecLayer) -> f64 {
        let degree = layer.c.nrows() - 1;
        let order = layer.c.ncols() - 1;
        let mut vtec = 0.0;

        for n in 0..=degree {
            for m in 0..=n.min(order) {
                let mut pnm = associated_legendre(n, m, self.phi_pp.sin());
                let fac = if m == 0 {
                    (2.0 * n as f64 + 1.0).sqrt()
                } else {
                    let a = factorial(n - m);
                    let b = factorial(n + m);
                    (2.0 * (2.0 * n as f64 + 1.0) * a / b).sqrt()
                };
                pnm *= fac;
                let cnm = layer.c[(n, m)] * (m as f64 * self.lon_s).cos();
                let snm = layer.s[(n, m)] * (m as f64 * self.lon_s).sin();
                vtec += (snm + cnm) * pnm;
            }
        }

        if vtec < 0.0 {
            0.0
        } else {
            vtec
        }
    }

    fn pierce_point(
        &mut self,
        layer_height: f64,
        epoch_sec: f64,
        geoc_sta: &gnss_rnx::coords::Geodetic,
        sph_ele: f64,
        sph_azi: f64,
    ) {
        use std::f64::consts::PI;
        let q = (Constants::R_GEOC + geoc_sta.height) / (Constants::R_GEOC + layer_height);

        self.psi_pp = PI / 2.0 - sph_ele - (q * sph_ele.cos()).asin();

        self.phi_pp = (geoc_sta.lat.sin() * self.psi_pp.cos()
            + geoc_sta.lat.cos() * self.psi_pp.sin() * sph_azi.cos())
        .asin();

        let crossing = if geoc_sta.lat > 0.0 {
            self.psi_pp.tan() * sph_azi.cos() > (PI / 2.0 - geoc_sta.lat).tan()
        } else {
            -(self.psi_pp.tan() * sph_azi.cos()) > (PI / 2.0 + geoc_sta.lat).tan()
        };
        let asin_term = (self.psi_pp.sin() * sph_azi.sin() / self.phi_pp.cos()).asin();
        self.lambda_pp = if crossing {
            geoc_sta.lon + PI - asin_term
        } else {
            geoc_sta.lon + asin_term
        };

        self.lon_s = (self.lambda_pp + (epoch_sec - 50400.0) * PI / 43200.0) % (2.0 * PI);
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Associated Legendre function, unnormalized
pub fn associated_legendre(n: usize, m: usize, t: f64) -> f64 {
    let mut sum = 0.0;
    let r = (n - m) / 2;
    for k in 0..=r {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign * factorial(2 * n - 2 * k)
            / (factorial(k) * factorial(n - k) * factorial(n - m - 2 * k))
            * t.powi((n - m - 2 * k) as i32);
    }
    let fac = 2f64.powi(-(n as i32)) * (1.0 - t * t).powf(m as f64 / 2.0);
    sum * fac
}
