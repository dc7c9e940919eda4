//! Square root information Kalman update and the Bancroft closed form
use crate::Error;
use gnss_rnx::constants::Constants;
use nalgebra::{DMatrix, DVector, Vector4};

/// Measurement update by square root information factorization:
/// Cholesky of the covariance, augmented least squares system,
/// QR triangularization, back substitution.
///
/// `aa` first design matrix, `ll` observed minus computed, `pp` diagonal
/// observation weights, `qq` parameter covariance (updated in place),
/// `xx` receives the estimated corrections.
pub fn kalman(
    aa: &DMatrix<f64>,
    ll: &DVector<f64>,
    pp: &DVector<f64>,
    qq: &mut DMatrix<f64>,
    xx: &mut DVector<f64>,
) -> Result<(), Error> {
    let n_obs = aa.nrows();
    let n_par = aa.ncols();

    let chol = qq.clone().cholesky().ok_or(Error::Factorization)?;
    let ss = chol.l().transpose(); // qq = ss' * ss

    let sa = &ss * aa.transpose();

    let mut srf = DMatrix::<f64>::zeros(n_obs + n_par, n_obs + n_par);
    for ii in 0..n_obs {
        srf[(ii, ii)] = 1.0 / pp[ii].sqrt();
    }
    srf.view_mut((n_obs, 0), (n_par, n_obs)).copy_from(&sa);
    srf.view_mut((n_obs, n_obs), (n_par, n_par)).copy_from(&ss);

    let qr = srf.qr();
    let uu = qr.r();

    let ss_new = uu.view((n_obs, n_obs), (n_par, n_par)).into_owned();
    let sh_rt = uu.view((0, 0), (n_obs, n_obs)).into_owned();
    let yy = uu.view((0, n_obs), (n_obs, n_par)).into_owned();

    let shi = sh_rt.try_inverse().ok_or(Error::Factorization)?;
    let kt = shi * yy;

    *xx += kt.transpose() * (ll - aa * &*xx);
    *qq = ss_new.transpose() * &ss_new;
    Ok(())
}

fn lorentz(aa: &Vector4<f64>, bb: &Vector4<f64>) -> f64 {
    aa[0] * bb[0] + aa[1] * bb[1] + aa[2] * bb[2] - aa[3] * bb[3]
}

/// Closed form single point solution from pseudoranges. Each row of
/// `bb_pass` is `(x, y, z, pseudorange + satellite clock)` of one GPS
/// satellite. Two iterations refine the Earth rotation during signal
/// travel time; the candidate with the smaller first satellite residual
/// wins.
pub fn bancroft(bb_pass: &DMatrix<f64>) -> Result<Vector4<f64>, Error> {
    let mm = bb_pass.nrows();
    if mm < 4 {
        return Err(Error::NotEnoughObs);
    }
    let mut pos = Vector4::<f64>::zeros();

    for iter in 1..=2 {
        let mut bb = bb_pass.clone();
        for ii in 0..mm {
            let x = bb[(ii, 0)];
            let y = bb[(ii, 1)];
            let traveltime = if iter == 1 {
                0.072
            } else {
                let z = bb[(ii, 2)];
                let rho = ((x - pos[0]) * (x - pos[0])
                    + (y - pos[1]) * (y - pos[1])
                    + (z - pos[2]) * (z - pos[2]))
                    .sqrt();
                rho / Constants::C
            };
            let angle = traveltime * Constants::OMEGA;
            bb[(ii, 0)] = angle.cos() * x + angle.sin() * y;
            bb[(ii, 1)] = -angle.sin() * x + angle.cos() * y;
        }

        let bbb = if mm > 4 {
            let normal = (bb.transpose() * &bb)
                .try_inverse()
                .ok_or(Error::Bancroft)?;
            normal * bb.transpose()
        } else {
            bb.clone().try_inverse().ok_or(Error::Bancroft)?
        };

        let ee = DVector::<f64>::from_element(mm, 1.0);
        let mut alpha = DVector::<f64>::zeros(mm);
        for ii in 0..mm {
            let row = Vector4::new(bb[(ii, 0)], bb[(ii, 1)], bb[(ii, 2)], bb[(ii, 3)]);
            alpha[ii] = lorentz(&row, &row) / 2.0;
        }

        let bbbe_d = &bbb * ee;
        let bbbalpha_d = &bbb * alpha;
        let bbbe = Vector4::new(bbbe_d[0], bbbe_d[1], bbbe_d[2], bbbe_d[3]);
        let bbbalpha = Vector4::new(bbbalpha_d[0], bbbalpha_d[1], bbbalpha_d[2], bbbalpha_d[3]);

        let a = lorentz(&bbbe, &bbbe);
        let b = lorentz(&bbbe, &bbbalpha) - 1.0;
        let c = lorentz(&bbbalpha, &bbbalpha);
        let root = (b * b - a * c).sqrt();
        if !root.is_finite() {
            return Err(Error::Bancroft);
        }

        let mut candidates = [
            (-b - root) / a * bbbe + bbbalpha,
            (-b + root) / a * bbbe + bbbalpha,
        ];
        let mut omc = [0.0f64; 2];
        for (candidate, omc_val) in candidates.iter_mut().zip(omc.iter_mut()) {
            candidate[3] = -candidate[3];
            *omc_val = bb[(0, 3)]
                - ((bb[(0, 0)] - candidate[0]).powi(2)
                    + (bb[(0, 1)] - candidate[1]).powi(2)
                    + (bb[(0, 2)] - candidate[2]).powi(2))
                .sqrt()
                - candidate[3];
        }
        pos = if omc[0].abs() > omc[1].abs() {
            candidates[1]
        } else {
            candidates[0]
        };
    }

    if pos.iter().any(|value| !value.is_finite()) {
        return Err(Error::Bancroft);
    }
    Ok(pos)
}
