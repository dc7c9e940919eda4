//! Orbit/clock combination of several analysis centers
use crate::config::CmbAc;
use gnss_ppp::kalman::kalman;
use gnss_rnx::antex::Antex;
use gnss_rnx::constants::Constants;
use itertools::Itertools;
use gnss_rnx::coords::ecef_to_rsw;
use gnss_rnx::corr::{ClkCorr, OrbCorr};
use gnss_rnx::eph::{Eph, EphStore};
use gnss_rnx::epoch;
use gnss_rnx::prn::Prn;
use hifitime::{Duration, Epoch};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Vector3};
use std::collections::{BTreeMap, HashMap};

const SIG0_OFF_AC: f64 = 1000.0;
const SIG0_OFF_AC_SAT: f64 = 100.0;
const SIGP_OFF_AC_SAT: f64 = 0.01;
const SIG0_CLK_SAT: f64 = 100.0;
const SIG_OBS: f64 = 0.05;
const MAX_DISPLACEMENT: f64 = 0.20;
const REGULARIZATION_WEIGHT: f64 = 1.0e6;

/// Combination methods
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmbMethod {
    /// sequential filter with per satellite memory
    Filter,
    /// epoch local batch adjustment
    SingleEpoch,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CmbParKind {
    OffAcGps,
    OffAcGlo,
    OffAcSat,
    ClkSat,
}

/*
 * Model: clk(AC, prn) = AC offset + AC satellite offset + satellite clock.
 */
#[derive(Debug, Clone)]
struct CmbParam {
    kind: CmbParKind,
    index: usize,
    ac: String,
    prn: Option<Prn>,
    xx: f64,
    epo_spec: bool,
    sig0: f64,
    sig_p: f64,
}

impl CmbParam {
    fn new(kind: CmbParKind, index: usize, ac: &str, prn: Option<Prn>) -> Self {
        let (epo_spec, sig0, sig_p) = match kind {
            CmbParKind::OffAcGps | CmbParKind::OffAcGlo => (true, SIG0_OFF_AC, SIG0_OFF_AC),
            CmbParKind::OffAcSat => (false, SIG0_OFF_AC_SAT, SIGP_OFF_AC_SAT),
            CmbParKind::ClkSat => (true, SIG0_CLK_SAT, SIG0_CLK_SAT),
        };
        Self {
            kind,
            index,
            ac: ac.to_string(),
            prn,
            xx: 0.0,
            epo_spec,
            sig0,
            sig_p,
        }
    }

    fn partial(&self, ac: &str, prn: &Prn) -> f64 {
        match self.kind {
            CmbParKind::OffAcGps => {
                if self.ac == ac && prn.system() == 'G' {
                    1.0
                } else {
                    0.0
                }
            },
            CmbParKind::OffAcGlo => {
                if self.ac == ac && prn.system() == 'R' {
                    1.0
                } else {
                    0.0
                }
            },
            CmbParKind::OffAcSat => {
                if self.ac == ac && self.prn == Some(*prn) {
                    1.0
                } else {
                    0.0
                }
            },
            CmbParKind::ClkSat => {
                if self.prn == Some(*prn) {
                    1.0
                } else {
                    0.0
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
struct CmbCorr {
    prn: Prn,
    time: Epoch,
    iod: u32,
    ac_name: String,
    clk_corr: ClkCorr,
    orb_corr: OrbCorr,
    dclk_result: f64,
    diff_rao: Vector3<f64>,
}

/// One combined epoch leaving the engine
#[derive(Debug, Clone)]
pub struct CombinedOutput {
    pub time: Epoch,
    pub orb_corrections: Vec<OrbCorr>,
    pub clk_corrections: Vec<ClkCorr>,
    /// RTNet block feeding the uploader
    pub rtnet: String,
}

struct AcState {
    mountpoint: String,
    name: String,
    #[allow(dead_code)]
    weight: f64,
    num_obs: usize,
}

/// The combination engine
pub struct Combiner {
    acs: Vec<AcState>,
    method: CmbMethod,
    sampl: u32,
    use_glonass: bool,
    max_res: f64,
    master_gap: u32,
    master_orbit_ac: String,
    master_missing: u32,
    params: Vec<CmbParam>,
    qq: DMatrix<f64>,
    orb_store: HashMap<String, HashMap<Prn, OrbCorr>>,
    buffer: BTreeMap<Epoch, Vec<CmbCorr>>,
    res_time: Option<Epoch>,
    eph_store: EphStore,
    antex: Option<Antex>,
}

impl Combiner {
    pub fn new(
        acs: &[CmbAc],
        method: CmbMethod,
        sampl: u32,
        use_glonass: bool,
        max_res: f64,
        master_gap: u32,
        antex: Option<Antex>,
    ) -> Self {
        let master_orbit_ac = acs.first().map(|ac| ac.name.clone()).unwrap_or_default();
        let sampl = if sampl == 0 { 10 } else { sampl };

        let mut combiner = Self {
            acs: acs
                .iter()
                .map(|ac| AcState {
                    mountpoint: ac.mountpoint.clone(),
                    name: ac.name.clone(),
                    weight: ac.weight,
                    num_obs: 0,
                })
                .collect(),
            method,
            sampl,
            use_glonass,
            max_res: if max_res <= 0.0 { 999.0 } else { max_res },
            master_gap,
            master_orbit_ac,
            master_missing: 0,
            params: Vec::new(),
            qq: DMatrix::zeros(0, 0),
            orb_store: HashMap::new(),
            buffer: BTreeMap::new(),
            res_time: None,
            eph_store: EphStore::new(),
            antex,
        };

        // the filter carries a fixed parameter set over all epochs
        if combiner.method == CmbMethod::Filter {
            let mut next = 0;
            let mut params = Vec::new();
            for ac in combiner.acs.iter() {
                params.push(CmbParam::new(CmbParKind::OffAcGps, next, &ac.name, None));
                next += 1;
                for number in 1..=Prn::MAX_GPS {
                    let prn = Prn::new(gnss_rs::prelude::Constellation::GPS, number, 0);
                    params.push(CmbParam::new(CmbParKind::OffAcSat, next, &ac.name, Some(prn)));
                    next += 1;
                }
                if combiner.use_glonass {
                    params.push(CmbParam::new(CmbParKind::OffAcGlo, next, &ac.name, None));
                    next += 1;
                    for number in 1..=Prn::MAX_GLONASS {
                        let prn =
                            Prn::new(gnss_rs::prelude::Constellation::Glonass, number, 0);
                        params.push(CmbParam::new(
                            CmbParKind::OffAcSat,
                            next,
                            &ac.name,
                            Some(prn),
                        ));
                        next += 1;
                    }
                }
            }
            for number in 1..=Prn::MAX_GPS {
                let prn = Prn::new(gnss_rs::prelude::Constellation::GPS, number, 0);
                params.push(CmbParam::new(CmbParKind::ClkSat, next, "", Some(prn)));
                next += 1;
            }
            if combiner.use_glonass {
                for number in 1..=Prn::MAX_GLONASS {
                    let prn = Prn::new(gnss_rs::prelude::Constellation::Glonass, number, 0);
                    params.push(CmbParam::new(CmbParKind::ClkSat, next, "", Some(prn)));
                    next += 1;
                }
            }

            combiner.qq = DMatrix::zeros(next, next);
            for par in params.iter() {
                combiner.qq[(par.index, par.index)] = par.sig0 * par.sig0;
            }
            combiner.params = params;
        }

        combiner
    }

    /// Feeds a broadcast ephemeris
    pub fn put_eph(&mut self, eph: Eph) {
        self.eph_store.put(eph);
    }

    pub fn master_ac(&self) -> &str {
        &self.master_orbit_ac
    }

    fn ac_name(&self, mountpoint: &str) -> Option<String> {
        self.acs
            .iter()
            .find(|ac| ac.mountpoint == mountpoint)
            .map(|ac| ac.name.clone())
    }

    /// Buffers orbit corrections per analysis center and satellite
    pub fn add_orb_corrections(&mut self, corrections: &[OrbCorr]) {
        for corr in corrections.iter() {
            let ac_name = match self.ac_name(&corr.sta_id) {
                Some(name) => name,
                None => continue,
            };
            self.orb_store
                .entry(ac_name)
                .or_default()
                .insert(corr.prn, corr.clone());
        }
    }

    /// Processes clock corrections. Ready epochs are combined and
    /// returned in epoch order.
    pub fn add_clk_corrections(&mut self, corrections: &[ClkCorr]) -> Vec<CombinedOutput> {
        let mut last_time: Option<Epoch> = None;

        for clk_corr in corrections.iter() {
            if last_time.map(|last| clk_corr.time > last).unwrap_or(true) {
                last_time = Some(clk_corr.time);
            }

            let ac_name = match self.ac_name(&clk_corr.sta_id) {
                Some(name) => name,
                None => continue,
            };

            if !self.use_glonass && clk_corr.prn.system() == 'R' {
                continue;
            }

            // combination sampling grid
            if (epoch::gps_sec_of_week(clk_corr.time) as u64) % self.sampl as u64 != 0 {
                continue;
            }

            // epoch already closed
            if let Some(res_time) = self.res_time {
                if clk_corr.time <= res_time {
                    debug!("stale correction: {} {}", ac_name, clk_corr.prn);
                    continue;
                }
            }

            // the matching orbit must be present with the same issue
            let orb_corr = match self
                .orb_store
                .get(&ac_name)
                .and_then(|store| store.get(&clk_corr.prn))
            {
                Some(orb) if orb.iod == clk_corr.iod => orb.clone(),
                Some(_) => {
                    warn!("stale iod: {} {}", ac_name, clk_corr.prn);
                    continue;
                },
                None => continue,
            };

            let mut corr = CmbCorr {
                prn: clk_corr.prn,
                time: clk_corr.time,
                iod: clk_corr.iod,
                ac_name,
                clk_corr: clk_corr.clone(),
                orb_corr,
                dclk_result: 0.0,
                diff_rao: Vector3::zeros(),
            };

            // anchor to the latest ephemeris
            let last_iod = match self.eph_store.eph_last(&corr.prn) {
                Some(eph) => eph.iod(),
                None => {
                    debug!("eph not found {}", corr.prn);
                    continue;
                },
            };
            if last_iod != corr.iod {
                let prev_iod = self.eph_store.eph_prev(&corr.prn).map(|eph| eph.iod());
                if prev_iod == Some(corr.iod) {
                    if self.switch_to_last_eph(&mut corr).is_none() {
                        continue;
                    }
                } else {
                    debug!("eph not found {} {}", corr.prn, corr.iod);
                    continue;
                }
            }

            self.buffer.entry(corr.time).or_default().push(corr);
        }

        // process epochs that fell behind the waiting window
        let mut outputs = Vec::new();
        if let Some(last_time) = last_time {
            let out_wait = Duration::from_seconds(self.sampl as f64);
            let ready: Vec<Epoch> = self
                .buffer
                .range(..last_time - out_wait)
                .map(|(key, _)| *key)
                .collect();
            for res_time in ready {
                self.res_time = Some(res_time);
                if let Some(output) = self.process_epoch(res_time) {
                    outputs.push(output);
                }
            }
        }
        outputs
    }

    /// Downstream state of one provider became stale: drop its buffered
    /// corrections and reset its satellite offsets.
    pub fn provider_changed(&mut self, mountpoint: &str) {
        let ac_name = match self.ac_name(mountpoint) {
            Some(name) => name,
            None => return,
        };
        for corrs in self.buffer.values_mut() {
            corrs.retain(|corr| corr.ac_name != ac_name);
        }
        if self.method == CmbMethod::Filter {
            for ii in 0..self.params.len() {
                if self.params[ii].kind == CmbParKind::OffAcSat && self.params[ii].ac == ac_name {
                    let index = self.params[ii].index;
                    self.params[ii].xx = 0.0;
                    for jj in 0..self.qq.nrows() {
                        self.qq[(index, jj)] = 0.0;
                        self.qq[(jj, index)] = 0.0;
                    }
                    self.qq[(index, index)] = self.params[ii].sig0 * self.params[ii].sig0;
                }
            }
        }
    }

    /*
     * Re-references a correction to the latest ephemeris: position and
     * clock deltas between the issues are folded into the correction.
     */
    fn switch_to_last_eph(&mut self, corr: &mut CmbCorr) -> Option<()> {
        let last = self.eph_store.eph_last(&corr.prn)?;
        let prev = self.eph_store.eph_prev(&corr.prn)?;

        let old_pv = prev.position(corr.time).ok()?;
        let new_pv = last.position(corr.time).ok()?;

        let dx = new_pv.xyz - old_pv.xyz;
        let dv = new_pv.vel - old_pv.vel;
        let dc = new_pv.clk - old_pv.clk;

        let d_rao = ecef_to_rsw(&new_pv.xyz, &new_pv.vel, &dx);
        let d_dot_rao = ecef_to_rsw(&new_pv.xyz, &new_pv.vel, &dv);

        info!(
            "switch corr {} {:3} -> {:3} {:8.4}",
            corr.prn,
            corr.iod,
            last.iod(),
            dc * Constants::C
        );

        corr.iod = last.iod();
        corr.orb_corr.iod = corr.iod;
        corr.clk_corr.iod = corr.iod;
        corr.orb_corr.xr += d_rao;
        corr.orb_corr.dot_xr += d_dot_rao;
        corr.clk_corr.d_clk -= dc;
        Some(())
    }

    fn process_epoch(&mut self, res_time: Epoch) -> Option<CombinedOutput> {
        let corrs = self.buffer.remove(&res_time)?;

        // observation statistics and master presence
        let mut master_present = false;
        for ac in self.acs.iter_mut() {
            ac.num_obs = corrs.iter().filter(|corr| corr.ac_name == ac.name).count();
            if ac.name == self.master_orbit_ac && ac.num_obs > 0 {
                master_present = true;
            }
        }

        if master_present {
            self.master_missing = 0;
        } else {
            self.master_missing += 1;
            if self.master_missing <= self.master_gap {
                info!("missing master, epoch skipped");
                return None;
            }
            self.master_missing = 0;
            if let Some(substitute) = self.acs.iter().find(|ac| ac.num_obs > 0) {
                info!(
                    "switching master AC {} -> {}",
                    self.master_orbit_ac, substitute.name
                );
                self.master_orbit_ac = substitute.name.clone();
            } else {
                return None;
            }
        }

        let mut res_corr: BTreeMap<Prn, CmbCorr> = BTreeMap::new();
        let (success, dx) = match self.method {
            CmbMethod::Filter => self.epoch_filter(res_time, corrs, &mut res_corr),
            CmbMethod::SingleEpoch => self.epoch_single(res_time, corrs, &mut res_corr),
        };
        if !success {
            return None;
        }

        // update parameters and collect the satellite clocks
        for par in self.params.iter_mut() {
            par.xx += dx[par.index];
            if par.kind == CmbParKind::ClkSat {
                if let Some(prn) = par.prn {
                    if let Some(corr) = res_corr.get_mut(&prn) {
                        corr.dclk_result = par.xx / Constants::C;
                    }
                }
            }
        }

        Some(self.dump_results(res_time, res_corr))
    }

    /*
     * Orbit screening: per satellite mean radial/along/cross over the
     * centers, iterative rejection of the largest deviation.
     */
    fn check_orbits(&mut self, corrs: &mut Vec<CmbCorr>) {
        loop {
            // means per satellite
            let mut sums: BTreeMap<Prn, (Vector3<f64>, usize)> = BTreeMap::new();
            for corr in corrs.iter() {
                let entry = sums.entry(corr.prn).or_insert((Vector3::zeros(), 0));
                entry.0 += corr.orb_corr.xr;
                entry.1 += 1;
            }

            // deviation from the mean, maximum per satellite
            let mut max_diff: BTreeMap<Prn, (usize, f64)> = BTreeMap::new();
            for (index, corr) in corrs.iter_mut().enumerate() {
                let (sum, count) = sums.get(&corr.prn).unwrap();
                let mean = sum / *count as f64;
                corr.diff_rao = corr.orb_corr.xr - mean;
                let norm = corr.diff_rao.norm();
                let entry = max_diff.entry(corr.prn).or_insert((index, norm));
                if norm > entry.1 {
                    *entry = (index, norm);
                }
            }

            if self.acs.len() == 1 {
                break;
            }

            let mut removed = false;
            let mut drop_indices: Vec<usize> = Vec::new();
            for (index, corr) in corrs.iter().enumerate() {
                let count = sums.get(&corr.prn).unwrap().1;
                if count < 2 {
                    drop_indices.push(index);
                    continue;
                }
                let (max_index, norm) = max_diff.get(&corr.prn).unwrap();
                if *max_index == index && *norm > MAX_DISPLACEMENT {
                    warn!(
                        "orbit outlier: {} {} {} {:.3}",
                        corr.ac_name, corr.prn, corr.iod, norm
                    );
                    drop_indices.push(index);
                    removed = true;
                }
            }
            for index in drop_indices.into_iter().rev() {
                corrs.remove(index);
            }
            if !removed {
                break;
            }
        }
    }

    fn create_amat(
        &self,
        corrs: &[CmbCorr],
        x0: &DVector<f64>,
        res_corr: &mut BTreeMap<Prn, CmbCorr>,
    ) -> Option<(DMatrix<f64>, DVector<f64>, DVector<f64>)> {
        let n_par = self.params.len();
        let n_obs = corrs.len();
        if n_obs == 0 {
            return None;
        }

        let n_con = if self.method == CmbMethod::Filter {
            1 + Prn::MAX_GPS as usize
        } else {
            0
        };

        let mut aa = DMatrix::zeros(n_obs + n_con, n_par);
        let mut ll = DVector::zeros(n_obs + n_con);
        let mut pp = DVector::from_element(n_obs + n_con, 1.0 / (SIG_OBS * SIG_OBS));

        for (row, corr) in corrs.iter().enumerate() {
            if corr.ac_name == self.master_orbit_ac && !res_corr.contains_key(&corr.prn) {
                res_corr.insert(corr.prn, corr.clone());
            }
            for par in self.params.iter() {
                aa[(row, par.index)] = par.partial(&corr.ac_name, &corr.prn);
            }
            let modeled: f64 = (0..n_par).map(|col| aa[(row, col)] * x0[col]).sum();
            ll[row] = corr.clk_corr.d_clk * Constants::C - modeled;
        }

        if self.method == CmbMethod::Filter {
            // sum of all satellite clocks is zero
            pp[n_obs] = REGULARIZATION_WEIGHT;
            for par in self.params.iter() {
                let observed = corrs
                    .iter()
                    .any(|corr| par.partial(&corr.ac_name, &corr.prn) != 0.0);
                if observed && par.kind == CmbParKind::ClkSat {
                    aa[(n_obs, par.index)] = 1.0;
                }
            }
            // per satellite: the AC offsets sum to zero
            for number in 1..=Prn::MAX_GPS {
                let prn = Prn::new(gnss_rs::prelude::Constellation::GPS, number, 0);
                let row = n_obs + number as usize;
                pp[row] = REGULARIZATION_WEIGHT;
                for par in self.params.iter() {
                    let observed = corrs
                        .iter()
                        .any(|corr| par.partial(&corr.ac_name, &corr.prn) != 0.0);
                    if observed && par.kind == CmbParKind::OffAcSat && par.prn == Some(prn) {
                        aa[(row, par.index)] = 1.0;
                    }
                }
            }
        }

        Some((aa, ll, pp))
    }

    fn epoch_filter(
        &mut self,
        res_time: Epoch,
        mut corrs: Vec<CmbCorr>,
        res_corr: &mut BTreeMap<Prn, CmbCorr>,
    ) -> (bool, DVector<f64>) {
        let n_par = self.params.len();

        // prediction
        let mut x0 = DVector::zeros(n_par);
        for ii in 0..n_par {
            let index = self.params[ii].index;
            if self.params[ii].epo_spec {
                self.params[ii].xx = 0.0;
                for jj in 0..self.qq.nrows() {
                    self.qq[(index, jj)] = 0.0;
                    self.qq[(jj, index)] = 0.0;
                }
                self.qq[(index, index)] = self.params[ii].sig0 * self.params[ii].sig0;
            } else {
                self.qq[(index, index)] += self.params[ii].sig_p * self.params[ii].sig_p;
            }
            x0[index] = self.params[ii].xx;
        }

        self.check_orbits(&mut corrs);

        // fallback covariance for the outlier restarts
        let mut qq_reset = self.qq.clone();

        loop {
            res_corr.clear();
            let (aa, ll, pp) = match self.create_amat(&corrs, &x0, res_corr) {
                Some(matrices) => matrices,
                None => return (false, DVector::zeros(n_par)),
            };

            let mut dx = DVector::zeros(n_par);
            if kalman(&aa, &ll, &pp, &mut self.qq, &mut dx).is_err() {
                return (false, DVector::zeros(n_par));
            }
            let vv = &ll - &aa * &dx;

            // only the observation rows take part in the screening
            let mut max_res = 0.0;
            let mut max_index = 0;
            for row in 0..corrs.len() {
                if vv[row].abs() > max_res {
                    max_res = vv[row].abs();
                    max_index = row;
                }
            }
            debug!(
                "{} maximum residuum {:.3} {} {}",
                epoch::gps_sec_of_week(res_time),
                max_res,
                corrs[max_index].ac_name,
                corrs[max_index].prn
            );

            if max_res > self.max_res {
                let outlier = corrs.remove(max_index);
                warn!("combination outlier {} {}", outlier.ac_name, outlier.prn);
                for par in self.params.iter() {
                    if par.kind == CmbParKind::OffAcSat
                        && par.ac == outlier.ac_name
                        && par.prn == Some(outlier.prn)
                    {
                        let index = par.index;
                        for jj in 0..qq_reset.nrows() {
                            qq_reset[(index, jj)] = 0.0;
                            qq_reset[(jj, index)] = 0.0;
                        }
                        qq_reset[(index, index)] = par.sig0 * par.sig0;
                    }
                }
                self.qq = qq_reset.clone();
                if corrs.is_empty() {
                    return (false, DVector::zeros(n_par));
                }
            } else {
                return (true, dx);
            }
        }
    }

    fn epoch_single(
        &mut self,
        _res_time: Epoch,
        mut corrs: Vec<CmbCorr>,
        res_corr: &mut BTreeMap<Prn, CmbCorr>,
    ) -> (bool, DVector<f64>) {
        self.check_orbits(&mut corrs);

        loop {
            // only satellites present in the master take part
            let master_prns: Vec<Prn> = corrs
                .iter()
                .filter(|corr| corr.ac_name == self.master_orbit_ac)
                .map(|corr| corr.prn)
                .collect();
            corrs.retain(|corr| master_prns.contains(&corr.prn));
            if corrs.is_empty() {
                return (false, DVector::zeros(0));
            }

            // epoch local parameters: offsets of the non master centers
            // and one clock per observed satellite
            let mut params = Vec::new();
            let mut next = 0;
            let ac_names: Vec<&String> = corrs
                .iter()
                .map(|corr| &corr.ac_name)
                .sorted()
                .dedup()
                .collect();
            for ac in ac_names.iter() {
                if **ac != self.master_orbit_ac {
                    params.push(CmbParam::new(CmbParKind::OffAcGps, next, ac.as_str(), None));
                    next += 1;
                    if self.use_glonass {
                        params.push(CmbParam::new(
                            CmbParKind::OffAcGlo,
                            next,
                            ac.as_str(),
                            None,
                        ));
                        next += 1;
                    }
                }
            }
            let prns: Vec<Prn> = corrs
                .iter()
                .map(|corr| corr.prn)
                .sorted()
                .dedup()
                .collect();
            for prn in prns.iter() {
                params.push(CmbParam::new(CmbParKind::ClkSat, next, "", Some(*prn)));
                next += 1;
            }
            self.params = params;

            let n_par = self.params.len();
            let x0 = DVector::zeros(n_par);
            res_corr.clear();
            let (aa, ll, pp) = match self.create_amat(&corrs, &x0, res_corr) {
                Some(matrices) => matrices,
                None => return (false, DVector::zeros(n_par)),
            };

            // weighted least squares
            let mut atp = aa.transpose();
            for (col, weight) in pp.iter().enumerate() {
                for row in 0..n_par {
                    atp[(row, col)] *= *weight;
                }
            }
            let nn = &atp * &aa;
            let qq = match nn.try_inverse() {
                Some(qq) => qq,
                None => return (false, DVector::zeros(n_par)),
            };
            let dx = &qq * (&atp * &ll);
            let vv = &ll - &aa * &dx;
            self.qq = qq;

            let mut max_res = 0.0;
            let mut max_index = 0;
            for row in 0..corrs.len() {
                if vv[row].abs() > max_res {
                    max_res = vv[row].abs();
                    max_index = row;
                }
            }

            if max_res > self.max_res {
                let outlier = corrs.remove(max_index);
                warn!("combination outlier {} {}", outlier.ac_name, outlier.prn);
                if corrs.is_empty() {
                    return (false, DVector::zeros(n_par));
                }
            } else {
                return (true, dx);
            }
        }
    }

    /*
     * Consensus corrections and the RTNet block for the uploader.
     * Orbits come from the master, the clock is the combined one.
     */
    fn dump_results(
        &mut self,
        res_time: Epoch,
        res_corr: BTreeMap<Prn, CmbCorr>,
    ) -> CombinedOutput {
        let mut orb_corrections = Vec::new();
        let mut clk_corrections = Vec::new();

        let (year, month, day, hour, minute, sec) = epoch::civil(res_time);
        let mut rtnet = format!(
            "*  {:4} {:2} {:2} {} {} {:12.8}\n",
            year, month, day, hour, minute, sec
        );

        for (prn, corr) in res_corr.iter() {
            let mut orb_corr = corr.orb_corr.clone();
            orb_corr.sta_id = "INTERNAL".to_string();
            orb_corrections.push(orb_corr.clone());

            let mut clk_corr = corr.clk_corr.clone();
            clk_corr.sta_id = "INTERNAL".to_string();
            clk_corr.d_clk = corr.dclk_result;
            clk_corr.dot_d_clk = 0.0;
            clk_corr.dot_dot_d_clk = 0.0;
            clk_corrections.push(clk_corr.clone());

            // corrected satellite state for the RTNet block
            let eph = match self.eph_store.eph_with_iod(prn, corr.iod) {
                Some(eph) => eph,
                None => continue,
            };
            let mut eph = eph.clone();
            eph.set_orb_corr(orb_corr);
            eph.set_clk_corr(clk_corr);
            let pv = match eph.position_corrected(res_time) {
                Ok(pv) => pv,
                Err(_) => continue,
            };

            // antenna phase center -> center of mass
            let mut com_offset = Vector3::zeros();
            if let Some(ref antex) = self.antex {
                let mjd = epoch::mjd_dec(res_time);
                let x_sun = gnss_ppp::astro::sun(mjd);
                match antex.sat_com_correction(prn, &x_sun, &pv.xyz) {
                    Some(offset) => com_offset = offset,
                    None => debug!("antenna not found {}", prn),
                }
            }

            rtnet.push_str(&format!(
                "{} APC 3 {:15.4} {:15.4} {:15.4} Clk 1 {:15.4} Vel 3 {:15.4} {:15.4} {:15.4} CoM 3 {:15.4} {:15.4} {:15.4}\n",
                prn,
                pv.xyz[0],
                pv.xyz[1],
                pv.xyz[2],
                pv.clk * Constants::C,
                pv.vel[0],
                pv.vel[1],
                pv.vel[2],
                pv.xyz[0] - com_offset[0],
                pv.xyz[1] - com_offset[1],
                pv.xyz[2] - com_offset[2],
            ));
        }
        rtnet.push_str("EOE\n");

        CombinedOutput {
            time: res_time,
            orb_corrections,
            clk_corrections,
            rtnet,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss_rnx::eph::{EphGps, EphModel};
    use gnss_rs::prelude::Constellation;

    fn gps_eph(prn_number: u8, iode: f64, toc: Epoch) -> Eph {
        let (week, sow) = epoch::gps_week_sec(toc);
        let model = EphGps {
            clock_bias: 1.0e-4,
            iode,
            crs: 12.0,
            delta_n: 4.5e-9,
            m0: 0.3 * prn_number as f64,
            cuc: 3.0e-6,
            e: 0.01,
            cus: 7.0e-6,
            sqrt_a: 5153.7,
            toe_sec: sow,
            omega0: -2.0 + 0.5 * prn_number as f64,
            i0: 0.96,
            crc: 200.0,
            omega: 0.6,
            omega_dot: -8.0e-9,
            idot: 4.0e-10,
            toe_week: week as f64,
            iodc: iode,
            ..Default::default()
        };
        Eph::new(
            Prn::new(Constellation::GPS, prn_number, 0),
            toc,
            EphModel::Gps(model),
        )
    }

    fn acs() -> Vec<CmbAc> {
        vec![
            CmbAc {
                mountpoint: "MP_A".to_string(),
                name: "A".to_string(),
                weight: 1.0,
            },
            CmbAc {
                mountpoint: "MP_B".to_string(),
                name: "B".to_string(),
                weight: 1.0,
            },
            CmbAc {
                mountpoint: "MP_C".to_string(),
                name: "C".to_string(),
                weight: 1.0,
            },
        ]
    }

    fn corr_pair(
        mountpoint: &str,
        prn: Prn,
        time: Epoch,
        iod: u32,
        dclk_m: f64,
    ) -> (OrbCorr, ClkCorr) {
        (
            OrbCorr {
                prn,
                iod,
                sta_id: mountpoint.to_string(),
                time,
                update_int: 0,
                xr: Vector3::new(0.01, -0.02, 0.005),
                dot_xr: Vector3::zeros(),
            },
            ClkCorr {
                prn,
                iod,
                sta_id: mountpoint.to_string(),
                time,
                update_int: 0,
                d_clk: dclk_m / Constants::C,
                dot_d_clk: 0.0,
                dot_dot_d_clk: 0.0,
            },
        )
    }

    fn setup(method: CmbMethod) -> (Combiner, Epoch, Vec<Prn>) {
        let mut combiner = Combiner::new(&acs(), method, 10, false, 999.0, 1, None);
        let toc = epoch::from_gps_week_sec(2220, 345600.0);
        let prns: Vec<Prn> = (1..=4)
            .map(|number| Prn::new(Constellation::GPS, number, 0))
            .collect();
        for prn in prns.iter() {
            combiner.put_eph(gps_eph(prn.number(), 44.0, toc));
        }
        (combiner, toc, prns)
    }

    fn feed_epoch(
        combiner: &mut Combiner,
        time: Epoch,
        mountpoints: &[&str],
        prns: &[Prn],
    ) -> Vec<CombinedOutput> {
        let mut outputs = Vec::new();
        for mountpoint in mountpoints {
            let mut orbs = Vec::new();
            let mut clks = Vec::new();
            for prn in prns.iter() {
                let (orb, clk) = corr_pair(
                    mountpoint,
                    *prn,
                    time,
                    44,
                    0.5 + 0.1 * prn.number() as f64,
                );
                orbs.push(orb);
                clks.push(clk);
            }
            combiner.add_orb_corrections(&orbs);
            outputs.extend(combiner.add_clk_corrections(&clks));
        }
        outputs
    }

    #[test]
    fn combined_epoch_emitted() {
        let (mut combiner, t0, prns) = setup(CmbMethod::Filter);
        let mut outputs = Vec::new();
        for k in 0..4 {
            let time = t0 + Duration::from_seconds(k as f64 * 10.0);
            outputs.extend(feed_epoch(
                &mut combiner,
                time,
                &["MP_A", "MP_B", "MP_C"],
                &prns,
            ));
        }
        assert!(!outputs.is_empty(), "no combined epoch left the engine");
        let first = &outputs[0];
        assert_eq!(first.time, t0);
        assert_eq!(first.clk_corrections.len(), prns.len());
        assert_eq!(first.orb_corrections.len(), prns.len());
        assert!(first.rtnet.contains("EOE"));
        assert!(first.rtnet.contains("G01 APC 3"));
        // the sum zero datum removes the common part: the consensus
        // clock carries the per satellite offset around the mean
        let mean = 0.5 + 0.1 * 2.5;
        for clk in first.clk_corrections.iter() {
            let expected = 0.5 + 0.1 * clk.prn.number() as f64 - mean;
            let got = clk.d_clk * Constants::C;
            assert!(
                (got - expected).abs() < 0.01,
                "{}: {} vs {}",
                clk.prn,
                got,
                expected
            );
        }
        // sum of satellite clock parameters pinned to zero
        let sum: f64 = combiner
            .params
            .iter()
            .filter(|par| par.kind == CmbParKind::ClkSat)
            .map(|par| par.xx)
            .sum();
        assert!(sum.abs() < 0.01, "sum = {}", sum);
    }

    #[test]
    fn master_failover() {
        let (mut combiner, t0, prns) = setup(CmbMethod::Filter);
        let mut emitted: Vec<(Epoch, CombinedOutput)> = Vec::new();
        for k in 0..8 {
            let time = t0 + Duration::from_seconds(k as f64 * 10.0);
            // master drops out from epoch 2 on
            let mountpoints: &[&str] = if k < 2 {
                &["MP_A", "MP_B", "MP_C"]
            } else {
                &["MP_B", "MP_C"]
            };
            for output in feed_epoch(&mut combiner, time, mountpoints, &prns) {
                emitted.push((output.time, output));
            }
        }
        // epoch 0 and 1 from master A, epoch 2 skipped (missing master),
        // from epoch 3 on B is promoted
        assert_eq!(combiner.master_ac(), "B");
        let times: Vec<f64> = emitted
            .iter()
            .map(|(time, _)| epoch::gps_sec_of_week(*time))
            .collect();
        assert!(times.contains(&345600.0));
        assert!(times.contains(&345610.0));
        assert!(!times.contains(&345620.0), "gap epoch must be skipped");
        assert!(times.contains(&345630.0));
    }

    #[test]
    fn stale_iod_clock_dropped() {
        let (mut combiner, t0, prns) = setup(CmbMethod::Filter);
        let prn = prns[0];
        // orbit with iod 44 stored
        let (orb, _) = corr_pair("MP_A", prn, t0, 44, 0.0);
        combiner.add_orb_corrections(&[orb]);
        // clock tagged with an older issue never enters the buffer
        let (_, clk) = corr_pair("MP_A", prn, t0, 43, 0.5);
        combiner.add_clk_corrections(&[clk]);
        assert!(combiner.buffer.is_empty());
        // matching issue passes
        let (_, clk) = corr_pair("MP_A", prn, t0, 44, 0.5);
        combiner.add_clk_corrections(&[clk]);
        assert_eq!(combiner.buffer.len(), 1);
    }

    #[test]
    fn ephemeris_switch_adjusts_clock() {
        let (mut combiner, t0, prns) = setup(CmbMethod::Filter);
        let prn = prns[0];
        // a newer issue arrives with a slightly different clock bias;
        // the mean anomaly is propagated so both issues describe the
        // same trajectory
        let toc2 = t0 + Duration::from_seconds(3600.0);
        let mut newer = gps_eph(prn.number(), 45.0, toc2);
        if let EphModel::Gps(ref mut gps) = newer.model {
            gps.clock_bias += 1.0e-9; // 1 ns
            let a0 = gps.sqrt_a * gps.sqrt_a;
            let n = (Constants::GM_GPS / (a0 * a0 * a0)).sqrt() + gps.delta_n;
            gps.m0 += n * 3600.0;
        }
        combiner.put_eph(newer);

        let time = t0 + Duration::from_seconds(7200.0);
        let (orb, clk) = corr_pair("MP_A", prn, time, 44, 0.5);
        combiner.add_orb_corrections(&[orb]);
        combiner.add_clk_corrections(&[clk.clone()]);

        let buffered = combiner.buffer.values().next().expect("buffered epoch");
        let corr = &buffered[0];
        assert_eq!(corr.iod, 45, "correction re-anchored to the new issue");
        // clock adjusted by the difference between the issues, ~1 ns
        let dclk = (corr.clk_corr.d_clk - clk.d_clk).abs();
        assert!(dclk > 0.5e-9 && dclk < 2.0e-9, "dclk = {}", dclk);
    }

    #[test]
    fn orbit_outlier_screening() {
        let (mut combiner, t0, prns) = setup(CmbMethod::Filter);
        let prn = prns[0];
        let mut corrs = Vec::new();
        for (mountpoint, radial) in [("MP_A", 0.01), ("MP_B", 0.02), ("MP_C", 0.9)] {
            let (mut orb, clk) = corr_pair(mountpoint, prn, t0, 44, 0.5);
            orb.xr = Vector3::new(radial, 0.0, 0.0);
            combiner.add_orb_corrections(&[orb.clone()]);
            let ac_name = combiner.ac_name(mountpoint).unwrap();
            corrs.push(CmbCorr {
                prn,
                time: t0,
                iod: 44,
                ac_name,
                clk_corr: clk,
                orb_corr: orb,
                dclk_result: 0.0,
                diff_rao: Vector3::zeros(),
            });
        }
        combiner.check_orbits(&mut corrs);
        assert_eq!(corrs.len(), 2, "the deviating center is dropped");
        assert!(corrs.iter().all(|corr| corr.ac_name != "C"));
    }

    #[test]
    fn single_epoch_method() {
        let (mut combiner, t0, prns) = setup(CmbMethod::SingleEpoch);
        let mut outputs = Vec::new();
        for k in 0..4 {
            let time = t0 + Duration::from_seconds(k as f64 * 10.0);
            outputs.extend(feed_epoch(
                &mut combiner,
                time,
                &["MP_A", "MP_B", "MP_C"],
                &prns,
            ));
        }
        assert!(!outputs.is_empty());
        let first = &outputs[0];
        assert_eq!(first.clk_corrections.len(), prns.len());
        for clk in first.clk_corrections.iter() {
            let expected = 0.5 + 0.1 * clk.prn.number() as f64;
            let got = clk.d_clk * Constants::C;
            // the master is the reference: exact recovery
            assert!((got - expected).abs() < 1.0e-6, "{}", got);
        }
    }
}
