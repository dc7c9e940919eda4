//! Key-value configuration surface, read once at startup
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error")]
    IoError(#[from] std::io::Error),
    #[error("configuration parsing")]
    Parsing(#[from] serde_json::Error),
    #[error("malformed combination stream entry: {0}")]
    BadCmbStream(String),
}

/// Custom Helmert transformation parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrafoParams {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub dxr: f64,
    pub dyr: f64,
    pub dzr: f64,
    pub ox: f64,
    pub oy: f64,
    pub oz: f64,
    pub oxr: f64,
    pub oyr: f64,
    pub ozr: f64,
    pub sc: f64,
    pub scr: f64,
    pub t0: f64,
}

/// One analysis center of the combination
#[derive(Debug, Clone, PartialEq)]
pub struct CmbAc {
    pub mountpoint: String,
    pub name: String,
    pub weight: f64,
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// input correction streams (mountpoint identifiers)
    pub streams: Vec<String>,
    /// combination inputs, "<mountpoint> <name> <weight>" per entry
    pub cmb_streams: Vec<String>,
    /// "Filter" or "Single-Epoch"
    pub cmb_method: String,
    /// combination sampling [s]
    pub cmb_sampl: u32,
    pub cmb_use_glonass: bool,
    /// combination outlier threshold [m]
    pub cmb_maxres: f64,
    /// epochs the master may miss before a failover
    pub cmb_master_gap: u32,

    pub upload_mountpoint: String,
    /// clock RINEX sampling [s]
    pub upload_sampl_clk_rnx: u32,
    /// SP3 sampling [min]
    pub upload_sampl_sp3: u32,
    /// orbit correction sampling [s], 0 = combined messages
    pub upload_sampl_rtcm_eph_corr: f64,
    /// target reference frame
    pub crd_trafo: String,
    /// upload center of mass instead of antenna phase center
    pub upload_com: bool,
    pub ssr_provider_id: u16,
    pub ssr_solution_id: u8,
    pub ssr_iod: u8,

    pub antex_file: String,

    /// outage threshold [min]
    pub advise_fail: u32,
    /// recovery threshold [min]
    pub advise_reco: u32,
    /// latency report interval [s]
    pub misc_intr: u32,
    /// mountpoint filter of the latency reports, "ALL" for every stream
    pub misc_mount: String,

    pub trafo: TrafoParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            streams: Vec::new(),
            cmb_streams: Vec::new(),
            cmb_method: "Filter".to_string(),
            cmb_sampl: 10,
            cmb_use_glonass: false,
            cmb_maxres: 999.0,
            cmb_master_gap: 1,
            upload_mountpoint: String::new(),
            upload_sampl_clk_rnx: 10,
            upload_sampl_sp3: 15,
            upload_sampl_rtcm_eph_corr: 0.0,
            crd_trafo: "IGS08".to_string(),
            upload_com: false,
            ssr_provider_id: 258,
            ssr_solution_id: 1,
            ssr_iod: 1,
            antex_file: String::new(),
            advise_fail: 15,
            advise_reco: 5,
            misc_intr: 60,
            misc_mount: "ALL".to_string(),
            trafo: TrafoParams::default(),
        }
    }
}

impl Config {
    /// Reads the configuration file
    pub fn read(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Parses the combination stream entries
    pub fn cmb_acs(&self) -> Result<Vec<CmbAc>, Error> {
        let mut acs = Vec::with_capacity(self.cmb_streams.len());
        for entry in self.cmb_streams.iter() {
            let items: Vec<&str> = entry.split_ascii_whitespace().collect();
            if items.len() != 3 {
                return Err(Error::BadCmbStream(entry.clone()));
            }
            acs.push(CmbAc {
                mountpoint: items[0].to_string(),
                name: items[1].to_string(),
                weight: items[2]
                    .parse()
                    .map_err(|_| Error::BadCmbStream(entry.clone()))?,
            });
        }
        Ok(acs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.cmb_sampl, 10);
        assert_eq!(config.cmb_maxres, 999.0);
        assert_eq!(config.crd_trafo, "IGS08");
    }

    #[test]
    fn ac_entries() {
        let config = Config {
            cmb_streams: vec![
                "SSRA00ONE0 ONE 1.0".to_string(),
                "SSRA00TWO0 TWO 0.5".to_string(),
            ],
            ..Default::default()
        };
        let acs = config.cmb_acs().unwrap();
        assert_eq!(acs.len(), 2);
        assert_eq!(acs[0].name, "ONE");
        assert_eq!(acs[1].weight, 0.5);

        let bad = Config {
            cmb_streams: vec!["ONLYTWO FIELDS".to_string()],
            ..Default::default()
        };
        assert!(bad.cmb_acs().is_err());
    }

    #[test]
    fn json_round_trip() {
        let text = r#"{
            "cmbStreams": ["SSRA00ONE0 ONE 1.0"],
            "cmbMethod": "Single-Epoch",
            "cmbSampl": 5,
            "crdTrafo": "ETRF2000"
        }"#;
        let config: Config = serde_json::from_str(text).unwrap();
        assert_eq!(config.cmb_method, "Single-Epoch");
        assert_eq!(config.cmb_sampl, 5);
        assert_eq!(config.crd_trafo, "ETRF2000");
        // untouched keys keep their defaults
        assert_eq!(config.cmb_maxres, 999.0);
    }
}
