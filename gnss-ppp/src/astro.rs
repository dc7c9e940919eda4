//! Low order Sun and Moon positions and the sidereal rotation chain
use gnss_rnx::coords::{rot_x, rot_y, rot_z};
use nalgebra::{Matrix3, Vector3};

pub const RHO_DEG: f64 = 180.0 / std::f64::consts::PI;
pub const RHO_SEC: f64 = 3600.0 * 180.0 / std::f64::consts::PI;
pub const MJD_J2000: f64 = 51544.5;

fn frac(x: f64) -> f64 {
    x - x.floor()
}

/// Greenwich Mean Sidereal Time [rad]
pub fn gmst(mjd_ut1: f64) -> f64 {
    const SECS: f64 = 86400.0;

    let mjd_0 = mjd_ut1.floor();
    let ut1 = SECS * (mjd_ut1 - mjd_0);
    let t_0 = (mjd_0 - MJD_J2000) / 36525.0;
    let t = (mjd_ut1 - MJD_J2000) / 36525.0;

    let gmst = 24110.54841 + 8640184.812866 * t_0 + 1.002737909350795 * ut1
        + (0.093104 - 6.2e-6 * t) * t * t;

    2.0 * std::f64::consts::PI * frac(gmst / SECS)
}

/// Nutation matrix (low order series)
pub fn nutation_matrix(mjd_tt: f64) -> Matrix3<f64> {
    let t = (mjd_tt - MJD_J2000) / 36525.0;

    let ls = 2.0 * std::f64::consts::PI * frac(0.993133 + 99.997306 * t);
    let d = 2.0 * std::f64::consts::PI * frac(0.827362 + 1236.853087 * t);
    let f = 2.0 * std::f64::consts::PI * frac(0.259089 + 1342.227826 * t);
    let n = 2.0 * std::f64::consts::PI * frac(0.347346 - 5.372447 * t);

    let dpsi = (-17.200 * n.sin() - 1.319 * (2.0 * (f - d + n)).sin()
        - 0.227 * (2.0 * (f + n)).sin()
        + 0.206 * (2.0 * n).sin()
        + 0.143 * ls.sin())
        / RHO_SEC;
    let deps = (9.203 * n.cos() + 0.574 * (2.0 * (f - d + n)).cos()
        + 0.098 * (2.0 * (f + n)).cos()
        - 0.090 * (2.0 * n).cos())
        / RHO_SEC;

    let eps = 0.4090928 - 2.2696e-4 * t;

    rot_x(-eps - deps) * rot_z(-dpsi) * rot_x(eps)
}

/// Precession matrix between two epochs
pub fn precession_matrix(mjd_1: f64, mjd_2: f64) -> Matrix3<f64> {
    let t = (mjd_1 - MJD_J2000) / 36525.0;
    let dt = (mjd_2 - mjd_1) / 36525.0;

    let zeta = ((2306.2181 + (1.39656 - 0.000139 * t) * t)
        + ((0.30188 - 0.000344 * t) + 0.017998 * dt) * dt)
        * dt
        / RHO_SEC;
    let z = zeta + ((0.79280 + 0.000411 * t) + 0.000205 * dt) * dt * dt / RHO_SEC;
    let theta = ((2004.3109 - (0.85330 + 0.000217 * t) * t)
        - ((0.42665 + 0.000217 * t) + 0.041833 * dt) * dt)
        * dt
        / RHO_SEC;

    rot_z(-z) * rot_y(theta) * rot_z(-zeta)
}

/// Sun position in ECEF [m]
pub fn sun(mjd_tt: f64) -> Vector3<f64> {
    let eps = 23.43929111 / RHO_DEG;
    let t = (mjd_tt - MJD_J2000) / 36525.0;

    let m = 2.0 * std::f64::consts::PI * frac(0.9931267 + 99.9973583 * t);
    let l = 2.0
        * std::f64::consts::PI
        * frac(
            0.7859444
                + m / 2.0 / std::f64::consts::PI
                + (6892.0 * m.sin() + 72.0 * (2.0 * m).sin()) / 1296.0e3,
        );
    let r = 149.619e9 - 2.499e9 * m.cos() - 0.021e9 * (2.0 * m).cos();

    let r_sun = rot_x(-eps) * Vector3::new(r * l.cos(), r * l.sin(), 0.0);

    rot_z(gmst(mjd_tt)) * nutation_matrix(mjd_tt) * precession_matrix(MJD_J2000, mjd_tt) * r_sun
}

/// Moon position in ECEF [m]
pub fn moon(mjd_tt: f64) -> Vector3<f64> {
    use std::f64::consts::PI;
    let eps = 23.43929111 / RHO_DEG;
    let t = (mjd_tt - MJD_J2000) / 36525.0;

    let l_0 = frac(0.606433 + 1336.851344 * t);
    let l = 2.0 * PI * frac(0.374897 + 1325.552410 * t);
    let lp = 2.0 * PI * frac(0.993133 + 99.997361 * t);
    let d = 2.0 * PI * frac(0.827361 + 1236.853086 * t);
    let f = 2.0 * PI * frac(0.259086 + 1342.227825 * t);

    let dl = 22640.0 * l.sin() - 4586.0 * (l - 2.0 * d).sin() + 2370.0 * (2.0 * d).sin()
        + 769.0 * (2.0 * l).sin()
        - 668.0 * lp.sin()
        - 412.0 * (2.0 * f).sin()
        - 212.0 * (2.0 * l - 2.0 * d).sin()
        - 206.0 * (l + lp - 2.0 * d).sin()
        + 192.0 * (l + 2.0 * d).sin()
        - 165.0 * (lp - 2.0 * d).sin()
        - 125.0 * d.sin()
        - 110.0 * (l + lp).sin()
        + 148.0 * (l - lp).sin()
        - 55.0 * (2.0 * f - 2.0 * d).sin();

    let big_l = 2.0 * PI * frac(l_0 + dl / 1296.0e3);

    let s = f + (dl + 412.0 * (2.0 * f).sin() + 541.0 * lp.sin()) / RHO_SEC;
    let h = f - 2.0 * d;
    let n = -526.0 * h.sin() + 44.0 * (l + h).sin() - 31.0 * (-l + h).sin()
        - 23.0 * (lp + h).sin()
        + 11.0 * (-lp + h).sin()
        - 25.0 * (-2.0 * l + f).sin()
        + 21.0 * (-l + f).sin();

    let b = (18520.0 * s.sin() + n) / RHO_SEC;
    let cos_b = b.cos();

    let r = 385000e3 - 20905e3 * l.cos() - 3699e3 * (2.0 * d - l).cos() - 2956e3 * (2.0 * d).cos()
        - 570e3 * (2.0 * l).cos()
        + 246e3 * (2.0 * l - 2.0 * d).cos()
        - 205e3 * (lp - 2.0 * d).cos()
        - 171e3 * (l + 2.0 * d).cos()
        - 152e3 * (l + lp - 2.0 * d).cos();

    let r_moon = rot_x(-eps)
        * Vector3::new(r * big_l.cos() * cos_b, r * big_l.sin() * cos_b, r * b.sin());

    rot_z(gmst(mjd_tt)) * nutation_matrix(mjd_tt) * precession_matrix(MJD_J2000, mjd_tt) * r_moon
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn sun_distance() {
        // one astronomical unit within a few percent all year round
        for mjd in [59778.0, 59878.0, 59978.0, 60078.0] {
            let r = sun(mjd).norm();
            assert!(r > 1.45e11 && r < 1.53e11, "r = {}", r);
        }
    }
    #[test]
    fn moon_distance() {
        for mjd in [59778.0, 59878.0, 59978.0] {
            let r = moon(mjd).norm();
            assert!(r > 3.5e8 && r < 4.1e8, "r = {}", r);
        }
    }
    #[test]
    fn gmst_range() {
        let angle = gmst(59778.25);
        assert!((0.0..2.0 * std::f64::consts::PI).contains(&angle));
    }
}
