//! Coordinate frame transformations
use crate::constants::Constants;
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("geodetic iteration did not converge")]
    GeodeticConvergence,
}

/// Geodetic coordinates: latitude [rad], longitude [rad], height [m]
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Geodetic {
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
}

/// Rectangular -> ellipsoidal coordinates. Closed formula start followed
/// by the fixed point iteration, 1.0e-11 rad / 1.0e-5 m convergence,
/// at most 100 iterations.
pub fn ecef_to_geodetic(xyz: &Vector3<f64>) -> Result<Geodetic, Error> {
    const MAX_ITER: usize = 100;

    let bell = Constants::A_ELL * (1.0 - 1.0 / Constants::F_INV);
    let e2 = (Constants::A_ELL * Constants::A_ELL - bell * bell)
        / (Constants::A_ELL * Constants::A_ELL);
    let e2c = (Constants::A_ELL * Constants::A_ELL - bell * bell) / (bell * bell);

    let ss = (xyz[0] * xyz[0] + xyz[1] * xyz[1]).sqrt();
    let zps = xyz[2] / ss;
    let theta = ((xyz[2] * Constants::A_ELL) / (ss * bell)).atan();
    let sin3 = theta.sin().powi(3);
    let cos3 = theta.cos().powi(3);

    let mut lat =
        ((xyz[2] + e2c * bell * sin3) / (ss - e2 * Constants::A_ELL * cos3)).atan();
    let lon = xyz[1].atan2(xyz[0]);
    let mut nn = Constants::A_ELL / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();
    let mut height = ss / lat.cos() - nn;

    for _ in 0..MAX_ITER {
        nn = Constants::A_ELL / (1.0 - e2 * lat.sin() * lat.sin()).sqrt();
        let h_old = height;
        let phi_old = lat;
        height = ss / lat.cos() - nn;
        lat = (zps / (1.0 - e2 * nn / (nn + height))).atan();
        if (phi_old - lat).abs() <= 1.0e-11 && (h_old - height).abs() <= 1.0e-5 {
            return Ok(Geodetic { lat, lon, height });
        }
    }
    Err(Error::GeodeticConvergence)
}

/// Rectangular -> geocentric (spherical) coordinates:
/// geocentric latitude [rad], longitude [rad], height above the mean
/// Earth sphere [m].
pub fn ecef_to_geocentric(xyz: &Vector3<f64>) -> Result<Geodetic, Error> {
    let bell = Constants::A_ELL * (1.0 - 1.0 / Constants::F_INV);
    let e2 = (Constants::A_ELL * Constants::A_ELL - bell * bell)
        / (Constants::A_ELL * Constants::A_ELL);
    let ell = ecef_to_geodetic(xyz)?;
    let rho = xyz.norm();
    let rn = Constants::A_ELL / (1.0 - e2 * ell.lat.sin() * ell.lat.sin()).sqrt();
    Ok(Geodetic {
        lat: ((1.0 - e2 * rn / (rn + ell.height)) * ell.lat.tan()).atan(),
        lon: ell.lon,
        height: rho - Constants::R_GEOC,
    })
}

/// Rectangular baseline -> north, east, up components
pub fn ecef_to_topocentric(ell: &Geodetic, dxyz: &Vector3<f64>) -> Vector3<f64> {
    let (sin_phi, cos_phi) = ell.lat.sin_cos();
    let (sin_lam, cos_lam) = ell.lon.sin_cos();
    Vector3::new(
        -sin_phi * cos_lam * dxyz[0] - sin_phi * sin_lam * dxyz[1] + cos_phi * dxyz[2],
        -sin_lam * dxyz[0] + cos_lam * dxyz[1],
        cos_phi * cos_lam * dxyz[0] + cos_phi * sin_lam * dxyz[1] + sin_phi * dxyz[2],
    )
}

/// North, east, up components -> rectangular baseline
pub fn topocentric_to_ecef(ell: &Geodetic, neu: &Vector3<f64>) -> Vector3<f64> {
    let (sin_phi, cos_phi) = ell.lat.sin_cos();
    let (sin_lam, cos_lam) = ell.lon.sin_cos();
    Vector3::new(
        -sin_phi * cos_lam * neu[0] - sin_lam * neu[1] + cos_phi * cos_lam * neu[2],
        -sin_phi * sin_lam * neu[0] + cos_lam * neu[1] + cos_phi * sin_lam * neu[2],
        cos_phi * neu[0] + sin_phi * neu[2],
    )
}

/// Rotation about the x axis, frame rotation convention
pub fn rot_x(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, s, 0.0, -s, c)
}

/// Rotation about the y axis, frame rotation convention
pub fn rot_y(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c)
}

/// Rotation about the z axis, frame rotation convention
pub fn rot_z(angle: f64) -> Matrix3<f64> {
    let (s, c) = angle.sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

/*
 * Local orbital frame: along = v/|v|, cross = (r x v)/|r x v|,
 * radial = along x cross.
 */
fn rsw_axes(rr: &Vector3<f64>, vv: &Vector3<f64>) -> Matrix3<f64> {
    let along = vv / vv.norm();
    let cross = rr.cross(vv).normalize();
    let radial = along.cross(&cross);
    Matrix3::from_columns(&[radial, along, cross])
}

/// Rectangular -> radial, along track, out of plane components
pub fn ecef_to_rsw(rr: &Vector3<f64>, vv: &Vector3<f64>, xyz: &Vector3<f64>) -> Vector3<f64> {
    rsw_axes(rr, vv).transpose() * xyz
}

/// Radial, along track, out of plane -> rectangular components
pub fn rsw_to_ecef(rr: &Vector3<f64>, vv: &Vector3<f64>, rsw: &Vector3<f64>) -> Vector3<f64> {
    rsw_axes(rr, vv) * rsw
}

/// Topocentric distance, elevation and azimuth of a satellite
pub fn topos(
    x_rec: &Vector3<f64>,
    x_sat: &Vector3<f64>,
) -> Result<(f64, f64, f64), Error> {
    let dx = x_sat - x_rec;
    let rho = dx.norm();
    let ell = ecef_to_geodetic(x_rec)?;
    let neu = ecef_to_topocentric(&ell, &dx);
    let mut ele = ((neu[0] * neu[0] + neu[1] * neu[1]).sqrt() / rho).acos();
    if neu[2] < 0.0 {
        ele = -ele;
    }
    Ok((rho, ele, neu[1].atan2(neu[0])))
}

/// Jacobian of the XYZ -> NEU mapping at the given geodetic position
pub fn jacobian_xyz_neu(ell: &Geodetic) -> Matrix3<f64> {
    let (sin_phi, cos_phi) = ell.lat.sin_cos();
    let (sin_lam, cos_lam) = ell.lon.sin_cos();
    Matrix3::new(
        -sin_phi * cos_lam,
        -sin_phi * sin_lam,
        cos_phi,
        -sin_lam,
        cos_lam,
        0.0,
        cos_phi * cos_lam,
        cos_phi * sin_lam,
        sin_phi,
    )
}

/// Propagates an XYZ covariance into NEU
pub fn covariance_xyz_neu(q_xyz: &Matrix3<f64>, ell: &Geodetic) -> Matrix3<f64> {
    let cc = jacobian_xyz_neu(ell);
    cc * q_xyz * cc.transpose()
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn geodetic_round_trip() {
        // Wettzell, roughly
        let xyz = Vector3::new(4075580.0, 931854.0, 4801568.0);
        let ell = ecef_to_geodetic(&xyz).unwrap();
        assert!(ell.lat.to_degrees() > 49.0 && ell.lat.to_degrees() < 50.0);
        assert!(ell.lon.to_degrees() > 12.0 && ell.lon.to_degrees() < 13.0);
        // reconstruct
        let bell = Constants::A_ELL * (1.0 - 1.0 / Constants::F_INV);
        let e2 = (Constants::A_ELL * Constants::A_ELL - bell * bell)
            / (Constants::A_ELL * Constants::A_ELL);
        let nn = Constants::A_ELL / (1.0 - e2 * ell.lat.sin() * ell.lat.sin()).sqrt();
        let back = Vector3::new(
            (nn + ell.height) * ell.lat.cos() * ell.lon.cos(),
            (nn + ell.height) * ell.lat.cos() * ell.lon.sin(),
            (nn * (1.0 - e2) + ell.height) * ell.lat.sin(),
        );
        assert!((back - xyz).norm() < 1.0e-3);
    }
    #[test]
    fn neu_round_trip() {
        let ell = Geodetic {
            lat: 0.8,
            lon: 0.2,
            height: 600.0,
        };
        let dx = Vector3::new(10.0, -20.0, 5.0);
        let neu = ecef_to_topocentric(&ell, &dx);
        let back = topocentric_to_ecef(&ell, &neu);
        assert!((back - dx).norm() < 1.0e-9);
    }
    #[test]
    fn rsw_orthogonality() {
        let rr = Vector3::new(26560.0e3, 0.0, 0.0);
        let vv = Vector3::new(0.0, 3.9e3, 0.0);
        let rsw = ecef_to_rsw(&rr, &vv, &Vector3::new(1.0, 2.0, 3.0));
        let back = rsw_to_ecef(&rr, &vv, &rsw);
        assert!((back - Vector3::new(1.0, 2.0, 3.0)).norm() < 1.0e-9);
        // radial of a radial offset is the offset itself
        let radial = ecef_to_rsw(&rr, &vv, &Vector3::new(1.0, 0.0, 0.0));
        assert!((radial[0] - 1.0).abs() < 1.0e-12);
        assert!(radial[1].abs() < 1.0e-12 && radial[2].abs() < 1.0e-12);
    }
    #[test]
    fn zenith_satellite() {
        let x_rec = Vector3::new(Constants::A_ELL, 0.0, 0.0);
        let x_sat = Vector3::new(Constants::A_ELL + 20.0e6, 0.0, 0.0);
        let (rho, ele, _) = topos(&x_rec, &x_sat).unwrap();
        assert!((rho - 20.0e6).abs() < 1.0);
        assert!((ele - std::f64::consts::FRAC_PI_2).abs() < 1.0e-2);
    }
}
