#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

pub mod antex;
pub mod constants;
pub mod coords;
pub mod corr;
pub mod crc;
pub mod eph;
pub mod epoch;
pub mod obs;
pub mod prn;

pub mod prelude {
    pub use crate::antex::Antex;
    pub use crate::constants::{Constants, Frequency};
    pub use crate::corr::{
        ClkCorr, OrbCorr, SatCodeBias, SatPhaseBias, SsrEpoch, Ura, VTec, VTecLayer,
    };
    pub use crate::eph::{CheckState, Eph, EphStore};
    pub use crate::obs::{FreqObs, ObsHeader, SatObs};
    pub use crate::prn::Prn;
    pub use gnss_rs::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale, Unit};
}
