//! Per epoch satellite data: ionosphere free combinations and satellite
//! states derived from the raw observations.
use crate::options::PppOptions;
use gnss_rnx::constants::{Constants, Frequency};
use gnss_rnx::eph::EphStore;
use gnss_rnx::obs::SatObs;
use gnss_rnx::prn::Prn;
use hifitime::{Duration, Epoch};
use log::debug;
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// Derived quantities of one satellite within one epoch
#[derive(Debug, Clone, Default)]
pub struct SatData {
    pub prn: Prn,
    /// ionosphere free code combination [m]
    pub p3: f64,
    /// ionosphere free phase combination [m]
    pub l3: f64,
    pub has_phase: bool,
    /// effective wavelength of the combination [m]
    pub lambda3: f64,
    /// ionosphere free coefficients of the two bands
    pub lk_a: f64,
    pub lk_b: f64,
    /// satellite position [m]
    pub xx: Vector3<f64>,
    /// satellite velocity [m/s]
    pub vv: Vector3<f64>,
    /// satellite clock correction [m]
    pub clk: f64,
    /// elevation [rad]
    pub ele: f64,
    /// azimuth [rad]
    pub az: f64,
    /// receiver - satellite range [m]
    pub rho: f64,
    /// loss of lock on either band
    pub slip: bool,
    /// row of this satellite in the current design matrix, 0 = unused
    pub obs_index: usize,
}

impl SatData {
    pub fn system(&self) -> char {
        self.prn.system()
    }
}

/// One filter epoch
#[derive(Debug, Clone, Default)]
pub struct EpochData {
    pub time: Epoch,
    pub sat_data: BTreeMap<Prn, SatData>,
}

impl EpochData {
    pub fn size_all(&self) -> usize {
        self.sat_data.len()
    }
    pub fn size_sys(&self, sys: char) -> usize {
        self.sat_data
            .values()
            .filter(|sat| sat.system() == sys)
            .count()
    }
}

/*
 * Band characters of the two signals forming the ionosphere free
 * combination, per system.
 */
fn iono_free_bands(sys: char) -> Option<(char, char)> {
    match sys {
        'G' | 'R' | 'J' => Some(('1', '2')),
        'E' => Some(('1', '5')),
        'C' => Some(('2', '7')),
        _ => None,
    }
}

/// Builds the filter epoch from raw observations and the ephemeris store.
/// Satellites without a dual frequency code pair, without ephemeris, or
/// (when corrections are required) without attached corrections are
/// dropped.
pub fn build_epoch(
    time: Epoch,
    obs_list: &[SatObs],
    store: &EphStore,
    opts: &PppOptions,
) -> EpochData {
    let mut epoch_data = EpochData {
        time,
        ..Default::default()
    };

    for obs in obs_list.iter() {
        let sys = obs.prn.system();
        if !opts.use_system(sys) {
            continue;
        }
        let (band_a, band_b) = match iono_free_bands(sys) {
            Some(bands) => bands,
            None => continue,
        };
        let (frq_a, frq_b) = match Frequency::iono_free_pair(obs.prn.sv.constellation) {
            Some(pair) => pair,
            None => continue,
        };

        let eph = match store.eph_last(&obs.prn) {
            Some(eph) => eph,
            None => {
                debug!("no ephemeris for {}", obs.prn);
                continue;
            },
        };

        let slot = match &eph.model {
            gnss_rnx::eph::EphModel::Glo(glo) => glo.slot(),
            _ => 0,
        };
        let freq_a = frq_a.frequency(slot);
        let freq_b = frq_b.frequency(slot);
        let lk_a = freq_a * freq_a / (freq_a * freq_a - freq_b * freq_b);
        let lk_b = -freq_b * freq_b / (freq_a * freq_a - freq_b * freq_b);

        let obs_a = obs.band(band_a);
        let obs_b = obs.band(band_b);
        let (obs_a, obs_b) = match (obs_a, obs_b) {
            (Some(a), Some(b)) if a.code_valid && b.code_valid => (a, b),
            _ => continue,
        };

        let p3 = lk_a * obs_a.code + lk_b * obs_b.code;
        let has_phase = obs_a.phase_valid && obs_b.phase_valid;
        let l3 = if has_phase {
            lk_a * frq_a.wavelength(slot) * obs_a.phase + lk_b * frq_b.wavelength(slot) * obs_b.phase
        } else {
            0.0
        };
        let lambda3 = Constants::C / (freq_a + freq_b);

        // satellite state at emission time
        let t_tx = time - Duration::from_seconds(p3 / Constants::C);
        let pv = if opts.use_orb_clk_corr {
            match eph.position_corrected(t_tx) {
                Ok(pv) => pv,
                Err(_) => {
                    debug!("no usable corrections for {}", obs.prn);
                    continue;
                },
            }
        } else {
            match eph.position(t_tx) {
                Ok(pv) => pv,
                Err(_) => continue,
            }
        };

        let sat = SatData {
            prn: obs.prn,
            p3,
            l3,
            has_phase,
            lambda3,
            lk_a,
            lk_b,
            xx: pv.xyz,
            vv: pv.vel,
            clk: pv.clk * Constants::C,
            slip: obs_a.slip || obs_b.slip,
            ..Default::default()
        };
        epoch_data.sat_data.insert(obs.prn, sat);
    }

    epoch_data
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss::prelude::Constellation;
    use gnss_rnx::obs::FreqObs;

    #[test]
    fn iono_free_coefficients() {
        // GPS: lk_a ~ 2.546, lk_b ~ -1.546, lk_a + lk_b = 1
        let f1 = Frequency::G1.frequency(0);
        let f2 = Frequency::G2.frequency(0);
        let lk_a = f1 * f1 / (f1 * f1 - f2 * f2);
        let lk_b = -f2 * f2 / (f1 * f1 - f2 * f2);
        assert!((lk_a - 2.5457).abs() < 1.0e-3);
        assert!((lk_a + lk_b - 1.0).abs() < 1.0e-12);
    }

    #[test]
    fn build_drops_without_ephemeris() {
        let store = EphStore::new();
        let opts = PppOptions::default();
        let time = gnss_rnx::epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let mut obs = SatObs {
            sta_id: "TEST".to_string(),
            prn: Prn::new(Constellation::GPS, 5, 0),
            time,
            obs: vec![],
        };
        let mut l1 = FreqObs::new("1C");
        l1.code = 22.0e6;
        l1.code_valid = true;
        let mut l2 = FreqObs::new("2W");
        l2.code = 22.0e6;
        l2.code_valid = true;
        obs.obs = vec![l1, l2];

        let epoch_data = build_epoch(time, &[obs], &store, &opts);
        assert_eq!(epoch_data.size_all(), 0);
    }
}
