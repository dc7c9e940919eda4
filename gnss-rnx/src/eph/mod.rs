//! Multi constellation broadcast ephemeris
use crate::constants::Constants;
use crate::coords::{rot_x, rot_z, rsw_to_ecef};
use crate::corr::{update_interval_secs, ClkCorr, OrbCorr};
use crate::crc::crc24q;
use crate::epoch;
use crate::prn::Prn;
use hifitime::{Duration, Epoch};
use nalgebra::{Vector3, Vector6};
use thiserror::Error;

mod rinex;
mod store;

pub use rinex::fortran_format;
pub use store::{EphStore, PutOutcome};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("ephemeris flagged unusable")]
    Unusable,
    #[error("undefined orbit (sqrt_a is zero)")]
    UndefinedOrbit,
    #[error("kepler iteration did not converge")]
    KeplerConvergence,
    #[error("integration interval exceeds 24 h")]
    IntegrationInterval,
    #[error("orbit or clock correction missing")]
    MissingCorrections,
    #[error("rinex navigation parsing: {0}")]
    RinexParsing(String),
}

/// Plausibility state of an ephemeris. `Bad` blocks every position
/// computation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CheckState {
    #[default]
    Unchecked,
    Ok,
    Bad,
    Outdated,
}

/// Satellite state at an instant: ECEF position [m], clock offset [s],
/// ECEF velocity [m/s].
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct PosVel {
    pub xyz: Vector3<f64>,
    pub clk: f64,
    pub vel: Vector3<f64>,
}

/// GPS / QZSS keplerian broadcast ephemeris
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphGps {
    pub clock_bias: f64,
    pub clock_drift: f64,
    pub clock_drift_rate: f64,
    pub iode: f64,
    pub crs: f64,
    pub delta_n: f64,
    pub m0: f64,
    pub cuc: f64,
    pub e: f64,
    pub cus: f64,
    pub sqrt_a: f64,
    pub toe_sec: f64,
    pub cic: f64,
    pub omega0: f64,
    pub cis: f64,
    pub i0: f64,
    pub crc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub idot: f64,
    pub l2_codes: f64,
    pub toe_week: f64,
    pub l2p_flag: f64,
    pub ura: f64,
    pub health: f64,
    pub tgd: f64,
    pub iodc: f64,
    pub tot: f64,
    pub fit_interval: f64,
}

/// GLONASS broadcast state vector, position/velocity/acceleration in km
/// as carried by the navigation message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphGlo {
    /// leap seconds at TOC (TOC is stored on the GPS timescale)
    pub gps_utc: i32,
    /// SV clock bias, sign flipped with respect to the RINEX field
    pub tau: f64,
    pub gamma: f64,
    pub tki: f64,
    pub x_pos: f64,
    pub x_velocity: f64,
    pub x_acceleration: f64,
    pub health: f64,
    pub y_pos: f64,
    pub y_velocity: f64,
    pub y_acceleration: f64,
    pub frequency_number: f64,
    pub z_pos: f64,
    pub z_velocity: f64,
    pub z_acceleration: f64,
    pub age: f64,
}

/// Galileo keplerian broadcast ephemeris
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphGal {
    pub clock_bias: f64,
    pub clock_drift: f64,
    pub clock_drift_rate: f64,
    pub iod_nav: f64,
    pub crs: f64,
    pub delta_n: f64,
    pub m0: f64,
    pub cuc: f64,
    pub e: f64,
    pub cus: f64,
    pub sqrt_a: f64,
    pub toe_sec: f64,
    pub cic: f64,
    pub omega0: f64,
    pub cis: f64,
    pub i0: f64,
    pub crc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub idot: f64,
    pub toe_week: f64,
    pub sisa: f64,
    pub e5a_hs: f64,
    pub e5b_hs: f64,
    pub e1b_hs: f64,
    pub e1_data_invalid: bool,
    pub e5a_data_invalid: bool,
    pub e5b_data_invalid: bool,
    pub bgd_1_5a: f64,
    pub bgd_1_5b: f64,
    pub tot: f64,
    pub fnav: bool,
    pub inav: bool,
}

/// SBAS broadcast state vector, SI units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphSbas {
    pub agf0: f64,
    pub agf1: f64,
    pub tow: f64,
    pub x_pos: f64,
    pub x_velocity: f64,
    pub x_acceleration: f64,
    pub health: f64,
    pub y_pos: f64,
    pub y_velocity: f64,
    pub y_acceleration: f64,
    pub ura: f64,
    pub z_pos: f64,
    pub z_velocity: f64,
    pub z_acceleration: f64,
    pub iodn: i32,
}

/// BDS keplerian broadcast ephemeris
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphBds {
    pub clock_bias: f64,
    pub clock_drift: f64,
    pub clock_drift_rate: f64,
    pub aode: i32,
    pub crs: f64,
    pub delta_n: f64,
    pub m0: f64,
    pub cuc: f64,
    pub e: f64,
    pub cus: f64,
    pub sqrt_a: f64,
    pub toe_sec: f64,
    pub cic: f64,
    pub omega0: f64,
    pub cis: f64,
    pub i0: f64,
    pub crc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub idot: f64,
    pub toe_week: f64,
    /// TOE as an instant on the GPS timescale
    pub toe: Option<Epoch>,
    pub ura: f64,
    pub sat_h1: i32,
    pub tgd1: f64,
    pub tgd2: f64,
    pub tot: f64,
    pub aodc: i32,
}

/// Per constellation orbit model
#[derive(Debug, Clone, PartialEq)]
pub enum EphModel {
    Gps(EphGps),
    Glo(EphGlo),
    Gal(EphGal),
    Sbas(EphSbas),
    Bds(EphBds),
}

/// A broadcast ephemeris with its correction attachments
#[derive(Debug, Clone, PartialEq)]
pub struct Eph {
    pub prn: Prn,
    /// time of clock, GPS timescale
    pub toc: Epoch,
    pub check_state: CheckState,
    pub orb_corr: Option<OrbCorr>,
    pub clk_corr: Option<ClkCorr>,
    pub model: EphModel,
}

impl Eph {
    pub fn new(prn: Prn, toc: Epoch, model: EphModel) -> Self {
        Self {
            prn,
            toc,
            check_state: CheckState::Unchecked,
            orb_corr: None,
            clk_corr: None,
            model,
        }
    }

    /// Issue of data tying corrections to this ephemeris
    pub fn iod(&self) -> u32 {
        match &self.model {
            EphModel::Gps(gps) => gps.iode as u32,
            EphModel::Gal(gal) => gal.iod_nav as u32,
            EphModel::Glo(glo) => {
                let moscow = self.toc - Duration::from_seconds(glo.gps_utc as f64)
                    + Duration::from_seconds(3.0 * 3600.0);
                (epoch::day_sec(moscow) / 900.0) as u32
            },
            EphModel::Sbas(sbas) => sbas.fingerprint(),
            EphModel::Bds(bds) => bds.fingerprint(),
        }
    }

    /// Replaces the attached orbit correction
    pub fn set_orb_corr(&mut self, corr: OrbCorr) {
        self.orb_corr = Some(corr);
    }

    /// Replaces the attached clock correction
    pub fn set_clk_corr(&mut self, corr: ClkCorr) {
        self.clk_corr = Some(corr);
    }

    /// Broadcast position, clock and velocity at `t`
    pub fn position(&self, t: Epoch) -> Result<PosVel, Error> {
        if self.check_state == CheckState::Bad {
            return Err(Error::Unusable);
        }
        match &self.model {
            EphModel::Gps(gps) => gps.position(self.toc, t),
            EphModel::Glo(glo) => glo.position(self.toc, t),
            EphModel::Gal(gal) => gal.position(self.toc, t),
            EphModel::Sbas(sbas) => sbas.position(self.toc, t),
            EphModel::Bds(bds) => bds.position(self.toc, t),
        }
    }

    /// Position with the attached SSR corrections applied. Fails when
    /// either attachment is missing.
    pub fn position_corrected(&self, t: Epoch) -> Result<PosVel, Error> {
        let mut pv = self.position(t)?;
        let (orb, clk) = match (&self.orb_corr, &self.clk_corr) {
            (Some(orb), Some(clk)) => (orb, clk),
            _ => return Err(Error::MissingCorrections),
        };

        let mut dt_orb = (t - orb.time).to_seconds();
        if orb.update_int > 0 {
            dt_orb -= 0.5 * update_interval_secs(orb.update_int) as f64;
        }
        let dx_rsw = orb.xr + orb.dot_xr * dt_orb;
        let dx = rsw_to_ecef(&pv.xyz, &pv.vel, &dx_rsw);
        pv.xyz -= dx;

        let dv = rsw_to_ecef(&pv.xyz, &pv.vel, &orb.dot_xr);
        pv.vel -= dv;

        let mut dt_clk = (t - clk.time).to_seconds();
        if clk.update_int > 0 {
            dt_clk -= 0.5 * update_interval_secs(clk.update_int) as f64;
        }
        pv.clk += clk.value(dt_clk);
        Ok(pv)
    }
}

/*
 * Common kepler machinery of the GPS / Galileo / BDS orbit models.
 * Returns the orbital plane state used by the per system rotations.
 */
struct KeplerPlane {
    xp: f64,
    yp: f64,
    i: f64,
    tk: f64,
    dot_x: f64,
    dot_y: f64,
    doti: f64,
    e_anomaly: f64,
}

#[allow(clippy::too_many_arguments)]
fn kepler_plane(
    gm: f64,
    sqrt_a: f64,
    e: f64,
    m0: f64,
    delta_n: f64,
    omega: f64,
    i0: f64,
    idot: f64,
    crc: f64,
    crs: f64,
    cuc: f64,
    cus: f64,
    cic: f64,
    cis: f64,
    tk: f64,
) -> Result<KeplerPlane, Error> {
    let a0 = sqrt_a * sqrt_a;
    if a0 == 0.0 {
        return Err(Error::UndefinedOrbit);
    }
    let n0 = (gm / (a0 * a0 * a0)).sqrt();
    let n = n0 + delta_n;
    let m = m0 + n * tk;
    let mut e_anomaly = m;
    let mut n_loop = 0;
    loop {
        let last = e_anomaly;
        e_anomaly = m + e * e_anomaly.sin();
        if (e_anomaly - last).abs() * a0 <= 0.001 {
            break;
        }
        n_loop += 1;
        if n_loop == 100 {
            return Err(Error::KeplerConvergence);
        }
    }
    let v = ((1.0 - e * e).sqrt() * e_anomaly.sin()).atan2(e_anomaly.cos() - e);
    let u0 = v + omega;
    let sin2u0 = (2.0 * u0).sin();
    let cos2u0 = (2.0 * u0).cos();
    let r = a0 * (1.0 - e * e_anomaly.cos()) + crc * cos2u0 + crs * sin2u0;
    let i = i0 + idot * tk + cic * cos2u0 + cis * sin2u0;
    let u = u0 + cuc * cos2u0 + cus * sin2u0;
    let xp = r * u.cos();
    let yp = r * u.sin();

    // first derivatives in the orbital plane
    let tanv2 = (v / 2.0).tan();
    let d_edm = 1.0 / (1.0 - e * e_anomaly.cos());
    let dotv = ((1.0 + e) / (1.0 - e)).sqrt() / (e_anomaly / 2.0).cos().powi(2)
        / (1.0 + tanv2 * tanv2)
        * d_edm
        * n;
    let dotu = dotv + (-cuc * sin2u0 + cus * cos2u0) * 2.0 * dotv;
    let doti = idot + (-cic * sin2u0 + cis * cos2u0) * 2.0 * dotv;
    let dotr = a0 * e * e_anomaly.sin() * d_edm * n + (-crc * sin2u0 + crs * cos2u0) * 2.0 * dotv;
    let dot_x = dotr * u.cos() - r * u.sin() * dotu;
    let dot_y = dotr * u.sin() + r * u.cos() * dotu;

    Ok(KeplerPlane {
        xp,
        yp,
        i,
        tk,
        dot_x,
        dot_y,
        doti,
        e_anomaly,
    })
}

/*
 * Rotation of the orbital plane state into ECEF together with the
 * velocity terms, shared by the keplerian systems.
 */
fn plane_to_ecef(
    plane: &KeplerPlane,
    om: f64,
    dotom: f64,
) -> (Vector3<f64>, Vector3<f64>) {
    let (sinom, cosom) = om.sin_cos();
    let (sini, cosi) = plane.i.sin_cos();
    let (xp, yp) = (plane.xp, plane.yp);
    let xyz = Vector3::new(
        xp * cosom - yp * cosi * sinom,
        xp * sinom + yp * cosi * cosom,
        yp * sini,
    );
    let vel = Vector3::new(
        cosom * plane.dot_x - cosi * sinom * plane.dot_y
            - xp * sinom * dotom
            - yp * cosi * cosom * dotom
            + yp * sini * sinom * plane.doti,
        sinom * plane.dot_x + cosi * cosom * plane.dot_y + xp * cosom * dotom
            - yp * cosi * sinom * dotom
            - yp * sini * cosom * plane.doti,
        sini * plane.dot_y + yp * cosi * plane.doti,
    );
    (xyz, vel)
}

impl EphGps {
    fn position(&self, toc: Epoch, t: Epoch) -> Result<PosVel, Error> {
        const OMEGA_EARTH: f64 = 7292115.1467e-11;
        let tk = (t - epoch::from_gps_week_sec(self.toe_week as u32, self.toe_sec)).to_seconds();
        let plane = kepler_plane(
            Constants::GM_GPS,
            self.sqrt_a,
            self.e,
            self.m0,
            self.delta_n,
            self.omega,
            self.i0,
            self.idot,
            self.crc,
            self.crs,
            self.cuc,
            self.cus,
            self.cic,
            self.cis,
            tk,
        )?;
        let om = self.omega0 + (self.omega_dot - OMEGA_EARTH) * tk - OMEGA_EARTH * self.toe_sec;
        let (xyz, vel) = plane_to_ecef(&plane, om, self.omega_dot - OMEGA_EARTH);

        let tc = (t - toc).to_seconds();
        let mut clk = self.clock_bias + self.clock_drift * tc + self.clock_drift_rate * tc * tc;
        // IGS convention and GPS ICD (and SSR standard)
        clk -= 2.0 * xyz.dot(&vel) / Constants::C / Constants::C;

        Ok(PosVel { xyz, clk, vel })
    }
}

impl EphGal {
    fn position(&self, toc: Epoch, t: Epoch) -> Result<PosVel, Error> {
        const OMEGA_EARTH: f64 = 7292115.1467e-11;
        let (toc_week, _) = epoch::gps_week_sec(toc);
        let tk = (t - epoch::from_gps_week_sec(toc_week, self.toe_sec)).to_seconds();
        let plane = kepler_plane(
            Constants::GM_WGS,
            self.sqrt_a,
            self.e,
            self.m0,
            self.delta_n,
            self.omega,
            self.i0,
            self.idot,
            self.crc,
            self.crs,
            self.cuc,
            self.cus,
            self.cic,
            self.cis,
            tk,
        )?;
        let om = self.omega0 + (self.omega_dot - OMEGA_EARTH) * tk - OMEGA_EARTH * self.toe_sec;
        let (xyz, vel) = plane_to_ecef(&plane, om, self.omega_dot - OMEGA_EARTH);

        let tc = (t - toc).to_seconds();
        let mut clk = self.clock_bias + self.clock_drift * tc + self.clock_drift_rate * tc * tc;
        // Galileo ICD and SSR standard convention
        clk -= 4.442807633e-10 * self.e * self.sqrt_a * plane.e_anomaly.sin();

        Ok(PosVel { xyz, clk, vel })
    }
}

impl EphGlo {
    /// GLONASS frequency channel number
    pub fn slot(&self) -> i32 {
        self.frequency_number as i32
    }

    fn position(&self, toc: Epoch, t: Epoch) -> Result<PosVel, Error> {
        const NOMINAL_STEP: f64 = 10.0;

        let dt_pos = (t - toc).to_seconds();
        if dt_pos.abs() > 24.0 * 3600.0 {
            return Err(Error::IntegrationInterval);
        }

        let mut xv = Vector6::new(
            self.x_pos * 1.0e3,
            self.y_pos * 1.0e3,
            self.z_pos * 1.0e3,
            self.x_velocity * 1.0e3,
            self.y_velocity * 1.0e3,
            self.z_velocity * 1.0e3,
        );
        let acc = Vector3::new(
            self.x_acceleration * 1.0e3,
            self.y_acceleration * 1.0e3,
            self.z_acceleration * 1.0e3,
        );

        let n_steps = (dt_pos.abs() / NOMINAL_STEP) as usize + 1;
        let step = dt_pos / n_steps as f64;
        for _ in 0..n_steps {
            xv = runge_kutta4(&xv, step, &acc);
        }

        let dt_clk = (t - toc).to_seconds();
        Ok(PosVel {
            xyz: Vector3::new(xv[0], xv[1], xv[2]),
            clk: -self.tau + self.gamma * dt_clk,
            vel: Vector3::new(xv[3], xv[4], xv[5]),
        })
    }
}

/*
 * Derivative of the GLONASS state vector: central term, J2, rotating
 * frame terms, plus the broadcast luni-solar acceleration.
 */
fn glo_deriv(xv: &Vector6<f64>, acc: &Vector3<f64>) -> Vector6<f64> {
    const GM_WGS: f64 = 398.60044e12;
    const AE: f64 = 6378136.0;
    const OMEGA: f64 = 7292115.0e-11;
    const C20: f64 = -1082.6257e-6;

    let rr = Vector3::new(xv[0], xv[1], xv[2]);
    let vv = Vector3::new(xv[3], xv[4], xv[5]);

    let rho = rr.norm();
    let t1 = -GM_WGS / (rho * rho * rho);
    let t2 = 3.0 / 2.0 * C20 * (GM_WGS * AE * AE) / (rho * rho * rho * rho * rho);
    let t3 = OMEGA * OMEGA;
    let t4 = 2.0 * OMEGA;
    let z2 = rr[2] * rr[2];

    Vector6::new(
        vv[0],
        vv[1],
        vv[2],
        (t1 + t2 * (1.0 - 5.0 * z2 / (rho * rho)) + t3) * rr[0] + t4 * vv[1] + acc[0],
        (t1 + t2 * (1.0 - 5.0 * z2 / (rho * rho)) + t3) * rr[1] - t4 * vv[0] + acc[1],
        (t1 + t2 * (3.0 - 5.0 * z2 / (rho * rho))) * rr[2] + acc[2],
    )
}

/// Fourth order Runge-Kutta step of the GLONASS equations of motion
fn runge_kutta4(yi: &Vector6<f64>, dx: f64, acc: &Vector3<f64>) -> Vector6<f64> {
    let k1 = glo_deriv(yi, acc) * dx;
    let k2 = glo_deriv(&(yi + k1 / 2.0), acc) * dx;
    let k3 = glo_deriv(&(yi + k2 / 2.0), acc) * dx;
    let k4 = glo_deriv(&(yi + k3), acc) * dx;
    yi + k1 / 6.0 + k2 / 3.0 + k3 / 3.0 + k4 / 6.0
}

impl EphSbas {
    fn position(&self, toc: Epoch, t: Epoch) -> Result<PosVel, Error> {
        let dt = (t - toc).to_seconds();
        Ok(PosVel {
            xyz: Vector3::new(
                self.x_pos + self.x_velocity * dt + self.x_acceleration * dt * dt / 2.0,
                self.y_pos + self.y_velocity * dt + self.y_acceleration * dt * dt / 2.0,
                self.z_pos + self.z_velocity * dt + self.z_acceleration * dt * dt / 2.0,
            ),
            clk: self.agf0 + self.agf1 * dt,
            vel: Vector3::new(
                self.x_velocity + self.x_acceleration * dt,
                self.y_velocity + self.y_acceleration * dt,
                self.z_velocity + self.z_acceleration * dt,
            ),
        })
    }

    /// Issue of data derived as CRC-24Q over the quantized broadcast fields
    pub fn fingerprint(&self) -> u32 {
        let mut packer = BitPacker::new();
        packer.add_float(30, self.x_pos, 0.08);
        packer.add_float(30, self.y_pos, 0.08);
        packer.add_float(25, self.z_pos, 0.4);
        packer.add_float(17, self.x_velocity, 0.000625);
        packer.add_float(17, self.y_velocity, 0.000625);
        packer.add_float(18, self.z_velocity, 0.004);
        packer.add_float(10, self.x_acceleration, 0.0000125);
        packer.add_float(10, self.y_acceleration, 0.0000125);
        packer.add_float(10, self.z_acceleration, 0.0000625);
        packer.add_float(12, self.agf0, 2f64.powi(-31));
        packer.add_float(8, self.agf1, 2f64.powi(-40));
        packer.add_bits(5, 0); // pad to full bytes
        crc24q(packer.bytes())
    }
}

impl EphBds {
    fn position(&self, toc: Epoch, t: Epoch) -> Result<PosVel, Error> {
        let toe = self.toe.ok_or(Error::UndefinedOrbit)?;
        let tk = (t - toe).to_seconds();
        let plane = kepler_plane(
            Constants::GM_BDS,
            self.sqrt_a,
            self.e,
            self.m0,
            self.delta_n,
            self.omega,
            self.i0,
            self.idot,
            self.crc,
            self.crs,
            self.cuc,
            self.cus,
            self.cic,
            self.cis,
            tk,
        )?;
        let toesec = epoch::gps_sec_of_week(toe) - Constants::BDS_LEAP;

        const I_MAX_GEO: f64 = 10.0 / 180.0 * std::f64::consts::PI;

        let (xyz, vel) = if self.i0 >= I_MAX_GEO {
            // MEO / IGSO satellite
            let om = self.omega0 + (self.omega_dot - Constants::OMEGA_BDS) * plane.tk
                - Constants::OMEGA_BDS * toesec;
            plane_to_ecef(&plane, om, self.omega_dot - Constants::OMEGA)
        } else {
            // GEO satellite: plane state rotated back through
            // Rz(omega_bds * tk) * Rx(-5 deg)
            let om = self.omega0 + self.omega_dot * plane.tk - Constants::OMEGA_BDS * toesec;
            let ll = Constants::OMEGA_BDS * plane.tk;

            let (x1, v_raw) = plane_to_ecef(&plane, om, self.omega_dot);
            let rx = rot_x(-5.0 / 180.0 * std::f64::consts::PI);
            let rz = rot_z(ll);
            let xyz = rz * rx * x1;

            let (s, c) = ll.sin_cos();
            let uu = nalgebra::Matrix3::new(-s, c, 0.0, -c, -s, 0.0, 0.0, 0.0, 0.0);
            let rdot_z = Constants::OMEGA_BDS * uu;
            let vel = rz * rx * v_raw + rdot_z * rx * x1;
            (xyz, vel)
        };

        let tc = (t - toc).to_seconds();
        let mut clk = self.clock_bias + self.clock_drift * tc + self.clock_drift_rate * tc * tc;
        // BDS ICD and SSR standard convention
        clk -= 4.442807633e-10 * self.e * self.sqrt_a * plane.e_anomaly.sin();

        Ok(PosVel { xyz, clk, vel })
    }

    /// Issue of data derived as CRC-24Q over the quantized broadcast fields
    pub fn fingerprint(&self) -> u32 {
        use std::f64::consts::PI;
        let mut packer = BitPacker::new();
        packer.add_float(14, self.idot, PI * 2f64.powi(-43));
        packer.add_float(11, self.clock_drift_rate, 2f64.powi(-66));
        packer.add_float(22, self.clock_drift, 2f64.powi(-50));
        packer.add_float(24, self.clock_bias, 2f64.powi(-33));
        packer.add_float(18, self.crs, 2f64.powi(-6));
        packer.add_float(16, self.delta_n, PI * 2f64.powi(-43));
        packer.add_float(32, self.m0, PI * 2f64.powi(-31));
        packer.add_float(18, self.cuc, 2f64.powi(-31));
        packer.add_float(32, self.e, 2f64.powi(-33));
        packer.add_float(18, self.cus, 2f64.powi(-31));
        packer.add_float(32, self.sqrt_a, 2f64.powi(-19));
        packer.add_float(18, self.cic, 2f64.powi(-31));
        packer.add_float(32, self.omega0, PI * 2f64.powi(-31));
        packer.add_float(18, self.cis, 2f64.powi(-31));
        packer.add_float(32, self.i0, PI * 2f64.powi(-31));
        packer.add_float(18, self.crc, 2f64.powi(-6));
        packer.add_float(32, self.omega, PI * 2f64.powi(-31));
        packer.add_float(24, self.omega_dot, PI * 2f64.powi(-43));
        packer.add_bits(5, 0); // pad to full bytes
        crc24q(packer.bytes())
    }
}

/*
 * MSB first bit packer for the quantized ephemeris fingerprints.
 */
struct BitPacker {
    buffer: Vec<u8>,
    bitbuffer: u64,
    numbits: u32,
}

impl BitPacker {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            bitbuffer: 0,
            numbits: 0,
        }
    }
    fn add_bits(&mut self, n: u32, value: i64) {
        self.bitbuffer = (self.bitbuffer << n) | ((value as u64) & ((1u64 << n) - 1));
        self.numbits += n;
        while self.numbits >= 8 {
            self.numbits -= 8;
            self.buffer.push((self.bitbuffer >> self.numbits) as u8);
        }
    }
    fn add_float(&mut self, n: u32, value: f64, scale: f64) {
        let quantized = (value / scale + if value < 0.0 { -0.5 } else { 0.5 }) as i64;
        self.add_bits(n, quantized);
    }
    fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss::prelude::Constellation;

    /// A plausible GPS ephemeris: near circular MEO orbit
    pub(crate) fn gps_eph() -> Eph {
        let toc = epoch::from_gps_week_sec(2220, 345600.0);
        let model = EphGps {
            clock_bias: 1.0e-4,
            clock_drift: 1.0e-11,
            iode: 44.0,
            crs: 12.0,
            delta_n: 4.5e-9,
            m0: 1.2,
            cuc: 3.0e-6,
            e: 0.01,
            cus: 7.0e-6,
            sqrt_a: 5153.7,
            toe_sec: 345600.0,
            cic: 1.0e-7,
            omega0: -2.0,
            cis: -1.0e-7,
            i0: 0.96,
            crc: 200.0,
            omega: 0.6,
            omega_dot: -8.0e-9,
            idot: 4.0e-10,
            toe_week: 2220.0,
            ura: 2.0,
            iodc: 44.0,
            ..Default::default()
        };
        Eph::new(
            Prn::new(Constellation::GPS, 5, 0),
            toc,
            EphModel::Gps(model),
        )
    }

    #[test]
    fn gps_orbit_radius() {
        let eph = gps_eph();
        let pv = eph.position(eph.toc).unwrap();
        let radius = pv.xyz.norm();
        // semi major axis 26560 km, modest eccentricity
        assert!(radius > 26.0e6 && radius < 27.2e6, "r = {}", radius);
        let speed = pv.vel.norm();
        assert!(speed > 2.5e3 && speed < 4.5e3, "v = {}", speed);
    }

    #[test]
    fn gps_velocity_consistent_with_differences() {
        let eph = gps_eph();
        let dt = 0.5;
        let pv0 = eph.position(eph.toc).unwrap();
        let pv1 = eph
            .position(eph.toc + Duration::from_seconds(dt))
            .unwrap();
        let numerical = (pv1.xyz - pv0.xyz) / dt;
        assert!((numerical - pv0.vel).norm() < 1.0e-2);
    }

    #[test]
    fn position_interval_consistency() {
        // position stays close to a two body propagation over +- 2 h
        let eph = gps_eph();
        for dt in [-7200.0, -600.0, 600.0, 7200.0] {
            let t = eph.toc + Duration::from_seconds(dt);
            let pv = eph.position(t).unwrap();
            let radius = pv.xyz.norm();
            assert!(radius > 26.0e6 && radius < 27.2e6);
        }
    }

    #[test]
    fn glonass_integration() {
        let toc = epoch::from_gps_week_sec(2220, 345600.0);
        let model = EphGlo {
            gps_utc: 18,
            tau: -1.0e-5,
            gamma: 0.0,
            x_pos: 11000.0,
            y_pos: 15000.0,
            z_pos: 16000.0,
            x_velocity: -1.5,
            y_velocity: 2.0,
            z_velocity: -0.9,
            frequency_number: -2.0,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::Glonass, 4, 0),
            toc,
            EphModel::Glo(model),
        );
        let pv = eph.position(toc + Duration::from_seconds(600.0)).unwrap();
        let radius = pv.xyz.norm();
        assert!(radius > 24.0e6 && radius < 26.5e6, "r = {}", radius);
        // beyond the integration limit
        assert!(eph
            .position(toc + Duration::from_seconds(25.0 * 3600.0))
            .is_err());
    }

    #[test]
    fn bds_geo_branch_selection() {
        let toc = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let toe = toc;
        let mut model = EphBds {
            sqrt_a: 6493.4,
            e: 0.0003,
            m0: 0.5,
            omega0: 1.0,
            omega: 0.1,
            i0: 0.1, // below 10 deg -> GEO
            toe: Some(toe),
            ..Default::default()
        };
        let geo = Eph::new(
            Prn::new(Constellation::BeiDou, 1, 0),
            toc,
            EphModel::Bds(model.clone()),
        );
        let pv_geo = geo
            .position(toc + Duration::from_seconds(300.0))
            .unwrap();
        let radius = pv_geo.xyz.norm();
        assert!(radius > 41.0e6 && radius < 43.0e6, "r = {}", radius);

        // exactly 10 degrees selects the MEO branch
        model.i0 = 10.0 / 180.0 * std::f64::consts::PI;
        let meo = Eph::new(
            Prn::new(Constellation::BeiDou, 1, 0),
            toc,
            EphModel::Bds(model),
        );
        let pv_meo = meo
            .position(toc + Duration::from_seconds(300.0))
            .unwrap();
        assert!((pv_meo.xyz - pv_geo.xyz).norm() > 1.0e3);
    }

    #[test]
    fn bds_fingerprint_stable() {
        let toc = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let model = EphBds {
            sqrt_a: 5282.6,
            e: 0.003,
            m0: 0.5,
            i0: 0.95,
            toe: Some(toc),
            clock_bias: 1.0e-4,
            ..Default::default()
        };
        let a = model.fingerprint();
        let b = model.fingerprint();
        assert_eq!(a, b);
        let mut changed = model;
        changed.m0 += 1.0e-3;
        assert_ne!(a, changed.fingerprint());
    }

    #[test]
    fn corrections_required() {
        let eph = gps_eph();
        assert!(matches!(
            eph.position_corrected(eph.toc),
            Err(Error::MissingCorrections)
        ));
    }

    #[test]
    fn corrections_shift_position() {
        use crate::corr::OrbCorr;
        let mut eph = gps_eph();
        let t = eph.toc;
        let plain = eph.position(t).unwrap();
        eph.set_orb_corr(OrbCorr {
            prn: eph.prn,
            iod: eph.iod(),
            sta_id: "TEST".to_string(),
            time: t,
            update_int: 0,
            xr: Vector3::new(1.0, 0.0, 0.0),
            dot_xr: Vector3::zeros(),
        });
        eph.set_clk_corr(ClkCorr {
            prn: eph.prn,
            iod: eph.iod(),
            sta_id: "TEST".to_string(),
            time: t,
            update_int: 0,
            d_clk: 2.0 / Constants::C,
            dot_d_clk: 0.0,
            dot_dot_d_clk: 0.0,
        });
        let corrected = eph.position_corrected(t).unwrap();
        // one meter radial offset, applied against the broadcast position
        assert!(((corrected.xyz - plain.xyz).norm() - 1.0).abs() < 1.0e-9);
        assert!(((corrected.clk - plain.clk) * Constants::C - 2.0).abs() < 1.0e-6);
    }

    #[test]
    fn glonass_iod_is_moscow_interval() {
        let toc = epoch::from_civil(2022, 7, 13, 11, 45, 0.0);
        let model = EphGlo {
            gps_utc: 18,
            x_pos: 11000.0,
            y_pos: 15000.0,
            z_pos: 16000.0,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::Glonass, 4, 0),
            toc,
            EphModel::Glo(model),
        );
        // moscow time of day = 11:45 - 18 s + 3 h = 14:44:42 -> 53082 s
        assert_eq!(eph.iod(), 53082 / 900);
    }
}
