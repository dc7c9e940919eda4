//! Multi constellation float ambiguity PPP filter
use crate::epoch_data::{EpochData, SatData};
use crate::kalman::{bancroft, kalman};
use crate::models::{Tides, Tropo, WindUp};
use crate::options::PppOptions;
use crate::Error;
use gnss_rnx::antex::Antex;
use gnss_rnx::constants::{Constants, Frequency};
use gnss_rnx::coords::{covariance_xyz_neu, ecef_to_geodetic, ecef_to_topocentric, Geodetic};
use gnss_rnx::prn::Prn;
use hifitime::Epoch;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector4};

const MAXRES_PHASE_GPS: f64 = 0.04;
const GLONASS_WEIGHT_FACTOR: f64 = 5.0;
const BDS_WEIGHT_FACTOR: f64 = 2.0;
const ELE_WEIGHT_DEG: f64 = 20.0;
const MAX_SOL_GAP: f64 = 60.0;

/// Filter parameter kinds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParKind {
    CrdX,
    CrdY,
    CrdZ,
    RecClk,
    Tropo,
    GloOffset,
    GalOffset,
    BdsOffset,
    AmbL3,
}

/// One element of the parameter vector
#[derive(Debug, Clone)]
pub struct PppParam {
    pub kind: ParKind,
    /// column in the design matrix
    pub index: usize,
    /// owning satellite, ambiguities only
    pub prn: Option<Prn>,
    pub xx: f64,
    index_old: Option<usize>,
    pub num_epo: u32,
}

impl PppParam {
    fn new(kind: ParKind, index: usize, prn: Option<Prn>) -> Self {
        Self {
            kind,
            index,
            prn,
            xx: 0.0,
            index_old: None,
            num_epo: 0,
        }
    }

    fn is_crd(&self) -> bool {
        matches!(self.kind, ParKind::CrdX | ParKind::CrdY | ParKind::CrdZ)
    }

    /// Partial derivative of the observation equation
    fn partial(&self, sat: &SatData, phase: bool) -> f64 {
        match self.kind {
            ParKind::CrdX => (self.xx - sat.xx[0]) / sat.rho,
            ParKind::CrdY => (self.xx - sat.xx[1]) / sat.rho,
            ParKind::CrdZ => (self.xx - sat.xx[2]) / sat.rho,
            ParKind::RecClk => 1.0,
            ParKind::Tropo => 1.0 / sat.ele.sin(),
            ParKind::GloOffset => {
                if sat.system() == 'R' {
                    1.0
                } else {
                    0.0
                }
            },
            ParKind::GalOffset => {
                if sat.system() == 'E' {
                    1.0
                } else {
                    0.0
                }
            },
            ParKind::BdsOffset => {
                if sat.system() == 'C' {
                    1.0
                } else {
                    0.0
                }
            },
            ParKind::AmbL3 => {
                if phase && self.prn == Some(sat.prn) {
                    1.0
                } else {
                    0.0
                }
            },
        }
    }
}

/// One emitted solution
#[derive(Debug, Clone)]
pub struct Solution {
    pub time: Epoch,
    pub xyz: Vector3<f64>,
    pub sigma_xyz: Vector3<f64>,
    /// offset to the a priori position, when one is configured
    pub neu: Option<Vector3<f64>>,
    /// modelled zenith delay [m]
    pub trp0: f64,
    /// estimated wet correction [m]
    pub trp: f64,
    pub num_sat: usize,
    pub h_dop: f64,
}

struct Checkpoint {
    params: Vec<PppParam>,
    qq: DMatrix<f64>,
    epoch: EpochData,
}

/// Extended Kalman filter over position, receiver clock, troposphere,
/// inter system offsets and one float ambiguity per tracked satellite.
pub struct Filter {
    opts: PppOptions,
    antex: Option<Antex>,
    tides: Tides,
    windup: WindUp,
    params: Vec<PppParam>,
    qq: DMatrix<f64>,
    xc_banc: Vector4<f64>,
    ell_banc: Geodetic,
    outlier_gps: Vec<Prn>,
    outlier_glo: Vec<Prn>,
    time: Epoch,
    start_time: Option<Epoch>,
    last_time_ok: Option<Epoch>,
    num_sat: usize,
    h_dop: f64,
}

impl Filter {
    pub fn new(opts: PppOptions, antex: Option<Antex>) -> Self {
        let mut filter = Self {
            opts,
            antex,
            tides: Tides::new(),
            windup: WindUp::new(),
            params: Vec::new(),
            qq: DMatrix::zeros(0, 0),
            xc_banc: Vector4::zeros(),
            ell_banc: Geodetic::default(),
            outlier_gps: Vec::new(),
            outlier_glo: Vec::new(),
            time: Epoch::from_gpst_seconds(0.0),
            start_time: None,
            last_time_ok: None,
            num_sat: 0,
            h_dop: 0.0,
        };
        filter.reset();
        filter
    }

    /// GPS satellites excluded by the last outlier screening
    pub fn outliers_gps(&self) -> &[Prn] {
        &self.outlier_gps
    }

    /// GLONASS/BDS satellites excluded by the last outlier screening
    pub fn outliers_glo(&self) -> &[Prn] {
        &self.outlier_glo
    }

    fn value_of(&self, kind: ParKind) -> f64 {
        self.params
            .iter()
            .find(|par| par.kind == kind)
            .map(|par| par.xx)
            .unwrap_or(0.0)
    }

    fn x(&self) -> f64 {
        self.value_of(ParKind::CrdX)
    }
    fn y(&self) -> f64 {
        self.value_of(ParKind::CrdY)
    }
    fn z(&self) -> f64 {
        self.value_of(ParKind::CrdZ)
    }
    fn clk(&self) -> f64 {
        self.value_of(ParKind::RecClk)
    }
    fn trp(&self) -> f64 {
        self.value_of(ParKind::Tropo)
    }

    /// Drops every parameter and rebuilds the initial state
    fn reset(&mut self) {
        let last_trp = self.trp();
        self.params.clear();

        let mut next = 0;
        self.params.push(PppParam::new(ParKind::CrdX, next, None));
        next += 1;
        self.params.push(PppParam::new(ParKind::CrdY, next, None));
        next += 1;
        self.params.push(PppParam::new(ParKind::CrdZ, next, None));
        next += 1;
        self.params.push(PppParam::new(ParKind::RecClk, next, None));
        next += 1;
        self.params.push(PppParam::new(ParKind::Tropo, next, None));
        next += 1;
        if self.opts.use_system('R') {
            self.params.push(PppParam::new(ParKind::GloOffset, next, None));
            next += 1;
        }
        if self.opts.use_system('E') {
            self.params.push(PppParam::new(ParKind::GalOffset, next, None));
            next += 1;
        }
        if self.opts.use_system('C') {
            self.params.push(PppParam::new(ParKind::BdsOffset, next, None));
            next += 1;
        }

        self.qq = DMatrix::zeros(next, next);
        for par in self.params.iter_mut() {
            par.xx = 0.0;
            let var = match par.kind {
                ParKind::CrdX => self.opts.apr_sig_crd[0] * self.opts.apr_sig_crd[0],
                ParKind::CrdY => self.opts.apr_sig_crd[1] * self.opts.apr_sig_crd[1],
                ParKind::CrdZ => self.opts.apr_sig_crd[2] * self.opts.apr_sig_crd[2],
                ParKind::RecClk => self.opts.noise_clk * self.opts.noise_clk,
                ParKind::Tropo => {
                    par.xx = last_trp;
                    self.opts.apr_sig_trp * self.opts.apr_sig_trp
                },
                _ => 1000.0 * 1000.0,
            };
            self.qq[(par.index, par.index)] = var;
        }
    }

    /// Closed form initialization and elevation screening
    fn cmp_bancroft(&mut self, epoch_data: &mut EpochData) -> Result<(), Error> {
        if epoch_data.size_sys('G') < self.opts.min_obs {
            debug!("bancroft: not enough GPS data");
            return Err(Error::NotEnoughObs);
        }

        let mut bb = DMatrix::zeros(epoch_data.size_sys('G'), 4);
        let mut row = 0;
        for sat in epoch_data.sat_data.values() {
            if sat.system() == 'G' {
                bb[(row, 0)] = sat.xx[0];
                bb[(row, 1)] = sat.xx[1];
                bb[(row, 2)] = sat.xx[2];
                bb[(row, 3)] = sat.p3 + sat.clk;
                row += 1;
            }
        }

        self.xc_banc = bancroft(&bb)?;
        let xyz = Vector3::new(self.xc_banc[0], self.xc_banc[1], self.xc_banc[2]);
        self.ell_banc = ecef_to_geodetic(&xyz)?;

        // satellite elevations against the closed form position
        let min_ele = self.opts.min_ele;
        let ell = self.ell_banc;
        for sat in epoch_data.sat_data.values_mut() {
            Self::cmp_ele(&ell, &xyz, sat);
        }
        epoch_data.sat_data.retain(|_, sat| sat.ele >= min_ele);
        Ok(())
    }

    fn cmp_ele(ell: &Geodetic, xyz: &Vector3<f64>, sat: &mut SatData) {
        let rr = sat.xx - xyz;
        let rho = rr.norm();
        let neu = ecef_to_topocentric(ell, &rr);
        let mut ele = ((neu[0] * neu[0] + neu[1] * neu[1]).sqrt() / rho).acos();
        if neu[2] < 0.0 {
            ele = -ele;
        }
        sat.ele = ele;
        sat.az = neu[1].atan2(neu[0]);
    }

    /// Modelled observation: Earth rotation corrected range, tides,
    /// troposphere, wind up, system offset, antenna corrections,
    /// receiver and satellite clocks.
    fn cmp_value(&mut self, sat: &mut SatData, phase: bool) -> f64 {
        let mut x_rec = Vector3::new(self.x(), self.y(), self.z());

        let rho0 = (sat.xx - x_rec).norm();
        let d_phi = Constants::OMEGA * rho0 / Constants::C;

        x_rec = Vector3::new(
            self.x() * d_phi.cos() - self.y() * d_phi.sin(),
            self.y() * d_phi.cos() + self.x() * d_phi.sin(),
            self.z(),
        );
        x_rec += self.tides.displacement(self.time, &x_rec);

        sat.rho = (sat.xx - x_rec).norm();

        let trop_delay = self.delay_saast(sat.ele) + self.trp() / sat.ele.sin();

        let wind = if phase {
            self.windup.value(self.time, &x_rec, &sat.prn, &sat.xx) * sat.lambda3
        } else {
            0.0
        };

        let (offset, frq_a, frq_b) = match sat.system() {
            'R' => (self.value_of(ParKind::GloOffset), Frequency::R1, Frequency::R2),
            'E' => (self.value_of(ParKind::GalOffset), Frequency::G1, Frequency::G2),
            'C' => (self.value_of(ParKind::BdsOffset), Frequency::G1, Frequency::G2),
            _ => (0.0, Frequency::G1, Frequency::G2),
        };

        let mut phase_center = 0.0;
        if let Some(ref antex) = self.antex {
            let corr_a = antex.rcv_corr(&self.opts.ant_name_rover, frq_a, sat.ele, sat.az);
            let corr_b = antex.rcv_corr(&self.opts.ant_name_rover, frq_b, sat.ele, sat.az);
            match (corr_a, corr_b) {
                (Some(corr_a), Some(corr_b)) => {
                    phase_center = sat.lk_a * corr_a + sat.lk_b * corr_b;
                },
                _ => {
                    warn!("ANTEX: antenna {:?} not found", self.opts.ant_name_rover);
                },
            }
        }

        let cosa = sat.az.cos();
        let sina = sat.az.sin();
        let cose = sat.ele.cos();
        let sine = sat.ele.sin();
        let antenna_offset = -self.opts.neu_ecc_rover[0] * cosa * cose
            - self.opts.neu_ecc_rover[1] * sina * cose
            - self.opts.neu_ecc_rover[2] * sine;

        sat.rho + phase_center + antenna_offset + self.clk() + offset - sat.clk
            + trop_delay
            + wind
    }

    fn delay_saast(&self, ele: f64) -> f64 {
        Tropo::delay_saast(&Vector3::new(self.x(), self.y(), self.z()), ele)
    }

    /// Prediction: process noise, reinitializations and the ambiguity
    /// bookkeeping with covariance reshaping.
    fn predict(&mut self, i_phase: usize, epoch_data: &mut EpochData) {
        if i_phase == 0 {
            let first_crd = match self.last_time_ok {
                None => true,
                Some(last) => (epoch_data.time - last).to_seconds() > MAX_SOL_GAP,
            };
            if first_crd {
                self.start_time = Some(epoch_data.time);
                self.reset();
            }

            // quick start: no coordinate noise while seeding
            let seeding = match self.start_time {
                Some(start) => {
                    self.opts.seeding_time > 0.0
                        && self.opts.seeding_time > (epoch_data.time - start).to_seconds()
                },
                None => false,
            };

            let n_par = self.params.len();
            for ii in 0..n_par {
                let kind = self.params[ii].kind;
                let index = self.params[ii].index;
                match kind {
                    ParKind::CrdX | ParKind::CrdY | ParKind::CrdZ => {
                        if first_crd {
                            let component = match kind {
                                ParKind::CrdX => 0,
                                ParKind::CrdY => 1,
                                _ => 2,
                            };
                            self.params[ii].xx = match self.opts.xyz_apr_rover {
                                Some(apr) => apr[component],
                                None => self.xc_banc[component],
                            };
                        }
                        let noise = match kind {
                            ParKind::CrdX => self.opts.noise_crd[0],
                            ParKind::CrdY => self.opts.noise_crd[1],
                            _ => self.opts.noise_crd[2],
                        };
                        let used = if seeding { 0.0 } else { noise };
                        self.qq[(index, index)] += used * used;
                    },
                    ParKind::RecClk => {
                        // reinitialized from the closed form solution
                        self.params[ii].xx = self.xc_banc[3];
                        for jj in 0..self.qq.nrows() {
                            self.qq[(index, jj)] = 0.0;
                            self.qq[(jj, index)] = 0.0;
                        }
                        self.qq[(index, index)] = self.opts.noise_clk * self.opts.noise_clk;
                    },
                    ParKind::Tropo => {
                        self.qq[(index, index)] += self.opts.noise_trp * self.opts.noise_trp;
                    },
                    ParKind::GloOffset => {
                        // estimated epoch by epoch
                        self.params[ii].xx = 0.0;
                        for jj in 0..self.qq.nrows() {
                            self.qq[(index, jj)] = 0.0;
                            self.qq[(jj, index)] = 0.0;
                        }
                        self.qq[(index, index)] = 1000.0 * 1000.0;
                    },
                    ParKind::GalOffset | ParKind::BdsOffset => {
                        self.qq[(index, index)] += 0.1 * 0.1;
                    },
                    ParKind::AmbL3 => {},
                }
            }
        }

        // ambiguity bookkeeping
        if !self.opts.any_phase() {
            return;
        }

        let qq_old = self.qq.clone();
        for par in self.params.iter_mut() {
            par.index_old = Some(par.index);
        }

        // drop ambiguities without observations
        self.params.retain(|par| match par.kind {
            ParKind::AmbL3 => match par.prn {
                Some(prn) => epoch_data.sat_data.contains_key(&prn),
                None => false,
            },
            _ => true,
        });
        for (new_index, par) in self.params.iter_mut().enumerate() {
            par.index = new_index;
        }

        // append new ambiguities
        let prns: Vec<Prn> = epoch_data.sat_data.keys().copied().collect();
        for prn in prns {
            if !self.opts.use_phase(prn.system()) {
                continue;
            }
            let known = self.params.iter().any(|par| {
                par.kind == ParKind::AmbL3 && par.prn == Some(prn)
            });
            if !known {
                let mut sat = epoch_data.sat_data.get(&prn).cloned().unwrap();
                if !sat.has_phase {
                    continue;
                }
                let computed = self.cmp_value(&mut sat, true);
                epoch_data.sat_data.insert(prn, sat.clone());
                let index = self.params.len();
                let mut par = PppParam::new(ParKind::AmbL3, index, Some(prn));
                par.xx = sat.l3 - computed;
                self.params.push(par);
            }
        }

        // reshape the covariance
        let n_par = self.params.len();
        let mut qq = DMatrix::zeros(n_par, n_par);
        for p1 in self.params.iter() {
            if let Some(old_1) = p1.index_old {
                qq[(p1.index, p1.index)] = qq_old[(old_1, old_1)];
                for p2 in self.params.iter() {
                    if let Some(old_2) = p2.index_old {
                        qq[(p1.index, p2.index)] = qq_old[(old_1, old_2)];
                    }
                }
            }
        }
        for par in self.params.iter_mut() {
            if par.index_old.is_none() {
                qq[(par.index, par.index)] = self.opts.apr_sig_amb * self.opts.apr_sig_amb;
            }
            par.index_old = Some(par.index);
        }
        self.qq = qq;
    }

    fn add_obs(
        &mut self,
        i_phase: usize,
        i_obs: &mut usize,
        prn: Prn,
        epoch_data: &mut EpochData,
        aa: &mut DMatrix<f64>,
        ll: &mut DVector<f64>,
        pp: &mut DVector<f64>,
    ) {
        let mut sat = epoch_data.sat_data.get(&prn).cloned().unwrap();

        let mut ele_wgt_coef = 1.0;
        let ele_deg = sat.ele.to_degrees();
        if ele_deg < ELE_WEIGHT_DEG {
            ele_wgt_coef = 1.5 - 0.5 / (ELE_WEIGHT_DEG - 10.0) * (ele_deg - 10.0);
        }

        let system_factor = match sat.system() {
            'R' => GLONASS_WEIGHT_FACTOR,
            'C' => BDS_WEIGHT_FACTOR,
            _ => 1.0,
        };

        let row = *i_obs;
        *i_obs += 1;
        sat.obs_index = *i_obs;

        if i_phase == 1 {
            let computed = self.cmp_value(&mut sat, true);
            let mut misclosure = sat.l3 - computed;
            let sig_l3 = 2.98 * self.opts.sigma_l1 * system_factor;
            pp[row] = 1.0 / (sig_l3 * sig_l3) / (ele_wgt_coef * ele_wgt_coef);
            for par in self.params.iter() {
                if par.kind == ParKind::AmbL3 && par.prn == Some(sat.prn) {
                    misclosure -= par.xx;
                }
                aa[(row, par.index)] = par.partial(&sat, true);
            }
            ll[row] = misclosure;
        } else {
            let computed = self.cmp_value(&mut sat, false);
            let sig_p3 = 2.98 * self.opts.sigma_c1 * system_factor;
            ll[row] = sat.p3 - computed;
            pp[row] = 1.0 / (sig_p3 * sig_p3) / (ele_wgt_coef * ele_wgt_coef);
            for par in self.params.iter() {
                aa[(row, par.index)] = par.partial(&sat, false);
            }
        }

        epoch_data.sat_data.insert(prn, sat);
    }

    /*
     * Largest residual per satellite group: GPS/Galileo share a stack,
     * GLONASS/BDS share the other.
     */
    fn find_max_res(
        vv: &DVector<f64>,
        epoch_data: &EpochData,
    ) -> (Option<Prn>, f64, Option<Prn>, f64) {
        let mut prn_gps = None;
        let mut prn_glo = None;
        let mut max_res_gps = 0.0;
        let mut max_res_glo = 0.0;
        for (prn, sat) in epoch_data.sat_data.iter() {
            if sat.obs_index == 0 {
                continue;
            }
            let res = vv[sat.obs_index - 1].abs();
            if prn.system() == 'R' || prn.system() == 'C' {
                if res > max_res_glo {
                    max_res_glo = res;
                    prn_glo = Some(*prn);
                }
            } else if res > max_res_gps {
                max_res_gps = res;
                prn_gps = Some(*prn);
            }
        }
        (prn_gps, max_res_gps, prn_glo, max_res_glo)
    }

    fn outlier_detection(
        &self,
        i_phase: usize,
        vv: &DVector<f64>,
        epoch_data: &EpochData,
    ) -> Option<Prn> {
        let (prn_gps, max_res_gps, prn_glo, max_res_glo) = Self::find_max_res(vv, epoch_data);

        if i_phase == 1 {
            if max_res_glo > 2.98 * self.opts.max_res_l1 {
                warn!("outlier phase {:?} {}", prn_glo, max_res_glo);
                return prn_glo;
            }
            if max_res_gps > MAXRES_PHASE_GPS {
                warn!("outlier phase {:?} {}", prn_gps, max_res_gps);
                return prn_gps;
            }
        } else if max_res_gps > 2.98 * self.opts.max_res_c1 {
            warn!("outlier code {:?} {}", prn_gps, max_res_gps);
            return prn_gps;
        }
        None
    }

    /*
     * Outlier stack: a GPS group outlier is retried one satellite at a
     * time; a GLONASS/BDS outlier removes the whole accumulated set and
     * clears the GPS stack.
     */
    fn select_satellites(
        &mut self,
        last_outlier: Option<Prn>,
        epoch_data: &mut EpochData,
    ) -> Result<(), Error> {
        let prn = match last_outlier {
            None => {
                self.outlier_gps.clear();
                self.outlier_glo.clear();
                return Ok(());
            },
            Some(prn) => prn,
        };

        let glonass_group = prn.system() == 'R' || prn.system() == 'C';
        if glonass_group {
            self.outlier_glo.push(prn);
        }

        for outlier in self.outlier_glo.iter() {
            epoch_data.sat_data.remove(outlier);
        }

        if glonass_group {
            self.outlier_gps.clear();
            return Ok(());
        }

        if !self.outlier_gps.contains(&prn) {
            self.outlier_gps.push(prn);
            epoch_data.sat_data.remove(&prn);
            return Ok(());
        }

        Err(Error::NoConsistentSubset)
    }

    fn save(&self, epoch_data: &EpochData) -> Checkpoint {
        Checkpoint {
            params: self.params.clone(),
            qq: self.qq.clone(),
            epoch: epoch_data.clone(),
        }
    }

    fn restore(&mut self, checkpoint: &Checkpoint, epoch_data: &mut EpochData) {
        self.params = checkpoint.params.clone();
        self.qq = checkpoint.qq.clone();
        *epoch_data = checkpoint.epoch.clone();
    }

    /// Measurement update with the recursive outlier rejection loop
    fn update_p(&mut self, epoch_data: &mut EpochData) -> Result<(), Error> {
        let checkpoint = self.save(epoch_data);
        let mut last_outlier: Option<Prn> = None;

        while self
            .select_satellites(last_outlier.take(), epoch_data)
            .is_ok()
        {
            if self.cmp_bancroft(epoch_data).is_err() {
                break;
            }

            let use_phase = self.opts.any_phase();
            let mut accepted = false;

            for i_phase in 0..=(if use_phase { 1 } else { 0 }) {
                self.predict(i_phase, epoch_data);

                let n_par = self.params.len();
                let used_prns: Vec<Prn> = epoch_data
                    .sat_data
                    .iter()
                    .filter(|(prn, sat)| {
                        let usable = if i_phase == 0 {
                            self.opts.use_code(prn.system())
                        } else {
                            self.opts.use_phase(prn.system()) && sat.has_phase
                        };
                        usable
                    })
                    .map(|(prn, _)| *prn)
                    .collect();
                let n_obs = used_prns.len();

                if n_obs < self.opts.min_obs {
                    self.restore(&checkpoint, epoch_data);
                    return Err(Error::NotEnoughObs);
                }

                // unused satellites carry no row in this pass
                for (prn, sat) in epoch_data.sat_data.iter_mut() {
                    if !used_prns.contains(prn) {
                        sat.obs_index = 0;
                    }
                }

                let mut aa = DMatrix::zeros(n_obs, n_par);
                let mut ll = DVector::zeros(n_obs);
                let mut pp = DVector::zeros(n_obs);
                let mut i_obs = 0;
                for prn in used_prns.iter() {
                    self.add_obs(i_phase, &mut i_obs, *prn, epoch_data, &mut aa, &mut ll, &mut pp);
                }

                let mut dx = DVector::zeros(n_par);
                if kalman(&aa, &ll, &pp, &mut self.qq, &mut dx).is_err() {
                    self.restore(&checkpoint, epoch_data);
                    return Err(Error::Factorization);
                }
                let vv = ll - &aa * &dx;

                match self.outlier_detection(i_phase, &vv, epoch_data) {
                    None => {
                        for par in self.params.iter_mut() {
                            par.xx += dx[par.index];
                        }
                        if !use_phase || i_phase == 1 {
                            if !self.outlier_gps.is_empty() || !self.outlier_glo.is_empty() {
                                debug!(
                                    "neglected prns: {:?} {:?}",
                                    self.outlier_gps, self.outlier_glo
                                );
                            }
                            accepted = true;
                        }
                    },
                    Some(outlier) => {
                        self.restore(&checkpoint, epoch_data);
                        last_outlier = Some(outlier);
                        break;
                    },
                }
            }

            if accepted {
                return Ok(());
            }
            if last_outlier.is_none() {
                break;
            }
        }

        self.restore(&checkpoint, epoch_data);
        Err(Error::NoConsistentSubset)
    }

    /// Processes one epoch and emits the solution
    pub fn update(&mut self, epoch_data: &mut EpochData) -> Result<Solution, Error> {
        self.time = epoch_data.time;

        self.update_p(epoch_data)?;

        for par in self.params.iter_mut() {
            if par.kind == ParKind::AmbL3 {
                par.num_epo += 1;
            }
        }

        self.cmp_dop(epoch_data);

        let xyz = Vector3::new(self.x(), self.y(), self.z());
        let sigma_xyz = Vector3::new(
            self.qq[(0, 0)].sqrt(),
            self.qq[(1, 1)].sqrt(),
            self.qq[(2, 2)].sqrt(),
        );

        let neu = match self.opts.xyz_apr_rover {
            Some(apr) => {
                let ell_ref = ecef_to_geodetic(&apr)?;
                Some(ecef_to_topocentric(&ell_ref, &(xyz - apr)))
            },
            None => None,
        };

        let solution = Solution {
            time: self.time,
            xyz,
            sigma_xyz,
            neu,
            trp0: self.delay_saast(std::f64::consts::FRAC_PI_2),
            trp: self.trp(),
            num_sat: self.num_sat,
            h_dop: self.h_dop,
        };

        self.last_time_ok = Some(self.time);
        Ok(solution)
    }

    /*
     * Dilution of precision from the geometry and clock columns,
     * expressed in the local horizon frame.
     */
    fn cmp_dop(&mut self, epoch_data: &EpochData) {
        self.num_sat = 0;
        self.h_dop = 0.0;

        if self.params.len() < 4 {
            return;
        }
        let n_all = epoch_data.size_all();
        if n_all < 4 {
            return;
        }

        let mut aa = DMatrix::zeros(n_all, 4);
        for sat in epoch_data.sat_data.values() {
            for (col, par) in self.params.iter().take(4).enumerate() {
                aa[(self.num_sat, col)] = par.partial(sat, false);
            }
            self.num_sat += 1;
        }
        let nn = aa.transpose() * &aa;
        let qq = match nn.try_inverse() {
            Some(qq) => qq,
            None => return,
        };
        let q_xyz = Matrix3::new(
            qq[(0, 0)],
            qq[(0, 1)],
            qq[(0, 2)],
            qq[(1, 0)],
            qq[(1, 1)],
            qq[(1, 2)],
            qq[(2, 0)],
            qq[(2, 1)],
            qq[(2, 2)],
        );
        let ell = match ecef_to_geodetic(&Vector3::new(self.x(), self.y(), self.z())) {
            Ok(ell) => ell,
            Err(_) => return,
        };
        let q_neu = covariance_xyz_neu(&q_xyz, &ell);
        self.h_dop = (q_neu[(0, 0)] + q_neu[(1, 1)]).sqrt();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss::prelude::Constellation;
    use gnss_rnx::epoch;
    use std::collections::BTreeMap;

    /// Builds a synthetic code-only GPS epoch around a known receiver:
    /// pseudoranges follow the filter's own model (Earth rotation,
    /// tides, troposphere) plus the receiver clock.
    fn synthetic_epoch(
        time: Epoch,
        x_rec: &Vector3<f64>,
        clk_rec: f64,
        n_sats: usize,
        bias: &BTreeMap<usize, f64>,
    ) -> EpochData {
        let mut tides = Tides::new();
        let tide = tides.displacement(time, x_rec);
        let ell = ecef_to_geodetic(x_rec).unwrap();

        let mut epoch_data = EpochData {
            time,
            ..Default::default()
        };
        for ii in 0..n_sats {
            let az = 2.0 * std::f64::consts::PI * ii as f64 / n_sats as f64;
            let ele: f64 = 0.5 + 0.15 * (ii % 3) as f64;
            let up = x_rec.normalize();
            let east = Vector3::new(-x_rec[1], x_rec[0], 0.0).normalize();
            let north = up.cross(&east);
            let los =
                (up * ele.sin() + (north * az.cos() + east * az.sin()) * ele.cos()).normalize();
            let x_sat = x_rec + los * 23000.0e3;

            // receiver rotated by the signal travel time, as the
            // measurement model does
            let rho0 = (x_sat - x_rec).norm();
            let d_phi = Constants::OMEGA * rho0 / Constants::C;
            let x_rot = Vector3::new(
                x_rec[0] * d_phi.cos() - x_rec[1] * d_phi.sin(),
                x_rec[1] * d_phi.cos() + x_rec[0] * d_phi.sin(),
                x_rec[2],
            ) + tide;
            let rho = (x_sat - x_rot).norm();
            let trop = Tropo::delay_saast(x_rec, ele);

            let p3 = rho + trop + clk_rec + bias.get(&ii).copied().unwrap_or(0.0);

            let prn = Prn::new(Constellation::GPS, (ii + 1) as u8, 0);
            let mut sat = SatData {
                prn,
                p3,
                xx: x_sat,
                ..Default::default()
            };
            Filter::cmp_ele(&ell, x_rec, &mut sat);
            epoch_data.sat_data.insert(prn, sat);
        }
        epoch_data
    }

    #[test]
    fn code_only_single_point_fix() {
        let time = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let x_rec = Vector3::new(4075580.0, 931854.0, 4801568.0);
        let mut epoch_data = synthetic_epoch(time, &x_rec, 150.0, 6, &BTreeMap::new());

        let mut filter = Filter::new(PppOptions::code_only(), None);
        let solution = filter.update(&mut epoch_data).unwrap();

        let error = (solution.xyz - x_rec).norm();
        assert!(error < 5.0, "position error {} m", error);
        assert!(solution.h_dop < 2.0, "hdop = {}", solution.h_dop);
        assert_eq!(solution.num_sat, 6);
    }

    #[test]
    fn outlier_rejected_and_recorded() {
        let time = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let x_rec = Vector3::new(4075580.0, 931854.0, 4801568.0);
        let mut bias = BTreeMap::new();
        bias.insert(2usize, 50.0); // 50 m on G03
        let mut epoch_data = synthetic_epoch(time, &x_rec, 150.0, 7, &bias);

        let mut filter = Filter::new(PppOptions::code_only(), None);
        let solution = filter.update(&mut epoch_data).unwrap();

        let outlier = Prn::new(Constellation::GPS, 3, 0);
        assert!(filter.outliers_gps().contains(&outlier));
        let error = (solution.xyz - x_rec).norm();
        assert!(error < 5.0, "position error {} m", error);
        assert_eq!(epoch_data.size_all(), 6);
    }

    #[test]
    fn too_few_satellites_is_an_error() {
        let time = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let x_rec = Vector3::new(4075580.0, 931854.0, 4801568.0);
        let mut epoch_data = synthetic_epoch(time, &x_rec, 0.0, 3, &BTreeMap::new());
        let mut filter = Filter::new(PppOptions::code_only(), None);
        assert!(filter.update(&mut epoch_data).is_err());
    }

    #[test]
    fn reset_after_long_gap() {
        let time = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let x_rec = Vector3::new(4075580.0, 931854.0, 4801568.0);
        let mut filter = Filter::new(PppOptions::code_only(), None);

        let mut first = synthetic_epoch(time, &x_rec, 150.0, 6, &BTreeMap::new());
        filter.update(&mut first).unwrap();

        // two minutes later the filter reinitializes and still converges
        let later = time + hifitime::Duration::from_seconds(120.0);
        let mut second = synthetic_epoch(later, &x_rec, 150.0, 6, &BTreeMap::new());
        let solution = filter.update(&mut second).unwrap();
        let error = (solution.xyz - x_rec).norm();
        assert!(error < 5.0, "position error {} m", error);
    }
}
