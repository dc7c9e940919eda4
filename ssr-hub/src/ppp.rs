//! PPP client: owns the estimator side ephemeris store, attaches the
//! decoded corrections and biases, and runs the filter epoch by epoch.
//! All state mutation happens on the calling task.
use gnss_ppp::epoch_data::build_epoch;
use gnss_ppp::filter::{Filter, Solution};
use gnss_ppp::options::PppOptions;
use gnss_ppp::Error;
use gnss_rnx::antex::Antex;
use gnss_rnx::corr::{ClkCorr, OrbCorr, SatCodeBias};
use gnss_rnx::eph::{Eph, EphStore};
use gnss_rnx::obs::SatObs;
use gnss_rnx::prn::Prn;
use hifitime::Epoch;
use log::debug;
use std::collections::HashMap;

pub struct PppClient {
    store: EphStore,
    filter: Filter,
    opts: PppOptions,
    code_biases: HashMap<Prn, SatCodeBias>,
}

impl PppClient {
    pub fn new(opts: PppOptions, antex: Option<Antex>) -> Self {
        Self {
            store: EphStore::new(),
            filter: Filter::new(opts.clone(), antex),
            opts,
            code_biases: HashMap::new(),
        }
    }

    pub fn put_eph(&mut self, eph: Eph) {
        self.store.put(eph);
    }

    /// Attaches orbit corrections to the ephemeris issue they refer to.
    /// A correction without a matching issue is dropped for this epoch.
    pub fn put_orb_corrections(&mut self, corrections: &[OrbCorr]) {
        for corr in corrections.iter() {
            match self.store.eph_with_iod_mut(&corr.prn, corr.iod) {
                Some(eph) => eph.set_orb_corr(corr.clone()),
                None => debug!("orbit correction without ephemeris: {}", corr.prn),
            }
        }
    }

    /// Attaches clock corrections, same issue matching as the orbits
    pub fn put_clk_corrections(&mut self, corrections: &[ClkCorr]) {
        for corr in corrections.iter() {
            match self.store.eph_with_iod_mut(&corr.prn, corr.iod) {
                Some(eph) => eph.set_clk_corr(corr.clone()),
                None => debug!("clock correction without ephemeris: {}", corr.prn),
            }
        }
    }

    /// Latest code biases per satellite
    pub fn put_code_biases(&mut self, biases: &[SatCodeBias]) {
        for bias in biases.iter() {
            self.code_biases.insert(bias.prn, bias.clone());
        }
    }

    /// Runs the filter over one observation epoch
    pub fn process_epoch(
        &mut self,
        obs_list: &[SatObs],
        time: Epoch,
    ) -> Result<Solution, Error> {
        // apply the code biases to the raw observations
        let mut corrected: Vec<SatObs> = obs_list.to_vec();
        for obs in corrected.iter_mut() {
            if let Some(sat_bias) = self.code_biases.get(&obs.prn) {
                for frq in obs.obs.iter_mut() {
                    if let Some(entry) = sat_bias
                        .biases
                        .iter()
                        .find(|entry| entry.rnx_type == frq.rnx_type)
                    {
                        frq.code += entry.value;
                    }
                }
            }
        }

        let mut epoch_data = build_epoch(time, &corrected, &self.store, &self.opts);
        self.filter.update(&mut epoch_data)
    }
}
