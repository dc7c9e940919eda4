//! Observation records, header model and v2/v3 signal code translation
use crate::prn::Prn;
use hifitime::Epoch;
use nalgebra::Vector3;
use std::collections::{BTreeMap, HashMap};

/// Observed signal on one carrier of one satellite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreqObs {
    /// 2 character RINEX v3 code ("1C", "2W", ...)
    pub rnx_type: String,
    pub code: f64,
    pub code_valid: bool,
    /// carrier phase [cycles]
    pub phase: f64,
    pub phase_valid: bool,
    pub doppler: f64,
    pub doppler_valid: bool,
    pub snr: f64,
    pub snr_valid: bool,
    /// signal tracking time [s]
    pub lock_time: f64,
    pub lock_time_valid: bool,
    /// loss of lock within the last epoch
    pub slip: bool,
    pub slip_counter: u16,
    pub bias_jump_counter: u16,
}

impl FreqObs {
    pub fn new(rnx_type: &str) -> Self {
        Self {
            rnx_type: rnx_type.to_string(),
            ..Default::default()
        }
    }
}

/// All observations of one satellite at one epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SatObs {
    pub sta_id: String,
    pub prn: Prn,
    pub time: Epoch,
    pub obs: Vec<FreqObs>,
}

impl SatObs {
    /// Observation on a given signal code, if tracked
    pub fn signal(&self, rnx_type: &str) -> Option<&FreqObs> {
        self.obs.iter().find(|obs| obs.rnx_type == rnx_type)
    }
    /// First tracked signal of a frequency band ('1', '2', ...)
    pub fn band(&self, band: char) -> Option<&FreqObs> {
        self.obs.iter().find(|obs| obs.rnx_type.starts_with(band))
    }
}

/// Observation file header model
#[derive(Debug, Clone, Default)]
pub struct ObsHeader {
    /// RINEX version, 2.x or 3.x
    pub version: f64,
    pub marker_name: String,
    pub marker_number: String,
    pub antenna_name: String,
    pub antenna_number: String,
    pub receiver_type: String,
    pub receiver_number: String,
    pub receiver_version: String,
    /// approximate marker position [m]
    pub approx_xyz: Vector3<f64>,
    /// antenna eccentricity, north / east / up [m]
    pub antenna_neu: Vector3<f64>,
    /// nominal sampling interval [s]
    pub interval: f64,
    pub start_time: Option<Epoch>,
    /// ordered observation codes per system
    pub obs_types: BTreeMap<char, Vec<String>>,
    /// phase shift corrections per (system, code) [cycles]
    pub phase_shifts: HashMap<(char, String), f64>,
    /// GLONASS code phase biases per signal code [m]
    pub glo_biases: HashMap<String, f64>,
    /// GLONASS slot to frequency channel assignment
    pub glo_slots: HashMap<Prn, i32>,
}

impl ObsHeader {
    /// Number of observation types of a system
    pub fn n_types(&self, sys: char) -> usize {
        self.obs_types.get(&sys).map(|types| types.len()).unwrap_or(0)
    }

    /// Observation code by index
    pub fn obs_type(&self, sys: char, index: usize) -> Option<&str> {
        self.obs_types
            .get(&sys)
            .and_then(|types| types.get(index))
            .map(|s| s.as_str())
    }

    /// Populates standard observation type lists when the header carries
    /// none. Callers that forbid default coding reject such files instead.
    pub fn set_default_obs_types(&mut self) {
        if !self.obs_types.is_empty() {
            return;
        }
        if self.version < 3.0 {
            let types: Vec<String> = ["C1", "P1", "L1", "S1", "C2", "P2", "L2", "S2"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            for sys in ['G', 'R', 'E', 'C', 'J', 'S'] {
                self.obs_types.insert(sys, types.clone());
            }
        } else {
            let type_sets: [(char, &[&str]); 6] = [
                ('G', &["C1C", "L1C", "S1C", "C2W", "L2W", "S2W", "C5X", "L5X", "S5X"]),
                ('R', &["C1C", "L1C", "S1C", "C2P", "L2P", "S2P"]),
                ('E', &["C1X", "L1X", "S1X", "C5X", "L5X", "S5X"]),
                ('C', &["C2I", "L2I", "S2I", "C7I", "L7I", "S7I"]),
                ('J', &["C1C", "L1C", "S1C", "C2S", "L2S", "S2S"]),
                ('S', &["C1C", "L1C", "S1C", "C5I", "L5I", "S5I"]),
            ];
            for (sys, types) in type_sets {
                self.obs_types
                    .insert(sys, types.iter().map(|s| s.to_string()).collect());
            }
        }
    }
}

/// Translates an observation code v2 -> v3
pub fn type2to3(sys: char, type_v2: &str) -> String {
    if type_v2 == "P1" {
        return if sys == 'G' { "C1W" } else { "C1P" }.to_string();
    }
    if type_v2 == "P2" {
        return if sys == 'G' { "C2W" } else { "C2P" }.to_string();
    }
    type_v2.to_string()
}

/// Translates an observation code v3 -> v2
pub fn type3to2(_sys: char, type_v3: &str) -> String {
    if type_v3 == "C1P" || type_v3 == "C1W" {
        return "P1".to_string();
    }
    if type_v3 == "C2P" || type_v3 == "C2W" {
        return "P2".to_string();
    }
    type_v3.chars().take(2).collect()
}

/// Default tracking mode priorities per system. Entries are either
/// "&lt;bands&gt;&&lt;attributes&gt;" or a bare attribute list applying
/// to every band; '_' matches a code without attribute, '?' any.
pub fn signal_priorities(sys: char) -> Vec<&'static str> {
    match sys {
        'G' => vec!["12&PWCSLXYN", "5&IQX"],
        'R' => vec!["12&PC", "3&IQX"],
        'E' => vec!["16&BCX", "578&IQX"],
        'J' => vec!["1&SLXCZ", "26&SLX", "5&IQX"],
        'C' => vec!["IQX"],
        'I' => vec!["ABCX"],
        'S' => vec!["1&C", "5&IQX"],
        _ => vec![],
    }
}

/// Picks the v3 code that a v2 writer should use for `type_v2` among the
/// available codes, honouring the attribute priorities.
pub fn select_v2_signal<'a>(
    sys: char,
    type_v2: &str,
    available: &[&'a str],
    priorities: &[&str],
) -> Option<&'a str> {
    let band = type_v2.chars().nth(1)?;

    let mut preferred = "";
    for entry in priorities.iter() {
        match entry.split_once('&') {
            Some((bands, attributes)) => {
                if bands.contains(band) {
                    preferred = attributes;
                }
            },
            None => preferred = entry,
        }
    }

    for pref in preferred.chars() {
        for code in available.iter() {
            let attribute_match = pref == '?'
                || (code.len() == 2 && pref == '_')
                || (code.len() == 3 && code.chars().nth(2) == Some(pref));
            if attribute_match && type3to2(sys, code) == type_v2 {
                return Some(code);
            }
        }
    }
    None
}

/// Flags an observation epoch in the future or older than 10 minutes
/// against the reference clock.
pub fn wrong_obs_epoch(obs_time: Epoch, now: Epoch) -> bool {
    const MAX_DT: f64 = 600.0;
    let dt = (now - obs_time).to_seconds();
    dt < 0.0 || dt.abs() > MAX_DT
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::epoch;

    #[test]
    fn translation_v2_v3() {
        assert_eq!(type2to3('G', "P1"), "C1W");
        assert_eq!(type2to3('R', "P1"), "C1P");
        assert_eq!(type2to3('G', "P2"), "C2W");
        assert_eq!(type2to3('R', "P2"), "C2P");
        assert_eq!(type2to3('G', "C1"), "C1");
        assert_eq!(type3to2('G', "C1W"), "P1");
        assert_eq!(type3to2('R', "C2P"), "P2");
        assert_eq!(type3to2('G', "L1C"), "L1");
        assert_eq!(type3to2('E', "C5X"), "C5");
    }

    #[test]
    fn translation_round_trip() {
        // type2to3(type3to2(x)) lands on x or the legal fallback
        for (sys, code3) in [('G', "C1W"), ('R', "C1P"), ('G', "C1C"), ('E', "C5X")] {
            let code2 = type3to2(sys, code3);
            let back = type2to3(sys, &code2);
            assert!(
                back == code3 || back == code3[..2].to_string(),
                "{} -> {} -> {}",
                code3,
                code2,
                back
            );
        }
    }

    #[test]
    fn v2_signal_selection() {
        let priorities = signal_priorities('G');
        // P2 prefers the Z tracking code
        let chosen = select_v2_signal('G', "P2", &["C2X", "C2W"], &priorities);
        assert_eq!(chosen, Some("C2W"));
        // L1: W wins over C per the "12&PWCSLXYN" order
        let chosen = select_v2_signal('G', "L1", &["L1C", "L1W"], &priorities);
        assert_eq!(chosen, Some("L1W"));
        // band 5 takes its preference from the "5&IQX" entry
        let chosen = select_v2_signal('G', "L5", &["L5Q"], &priorities);
        assert_eq!(chosen, Some("L5Q"));
        // nothing tracked on the band
        assert_eq!(
            select_v2_signal('G', "L2", &["L1C"], &priorities),
            None
        );
    }

    #[test]
    fn default_obs_types() {
        let mut header = ObsHeader {
            version: 3.04,
            ..Default::default()
        };
        header.set_default_obs_types();
        assert!(header.n_types('G') > 0);
        assert_eq!(header.obs_type('G', 0), Some("C1C"));
        // does not overwrite an existing typing
        let before = header.obs_types.clone();
        header.set_default_obs_types();
        assert_eq!(before, header.obs_types);
    }

    #[test]
    fn wrong_epoch_guard() {
        let now = epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let ok = epoch::from_civil(2022, 7, 13, 11, 58, 0.0);
        let future = epoch::from_civil(2022, 7, 13, 12, 1, 0.0);
        let stale = epoch::from_civil(2022, 7, 13, 11, 40, 0.0);
        assert!(!wrong_obs_epoch(ok, now));
        assert!(wrong_obs_epoch(future, now));
        assert!(wrong_obs_epoch(stale, now));
    }
}
