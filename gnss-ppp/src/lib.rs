#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

use thiserror::Error;

pub mod astro;
pub mod epoch_data;
pub mod filter;
pub mod kalman;
pub mod models;
pub mod options;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("not enough observations")]
    NotEnoughObs,
    #[error("bancroft initialization failed")]
    Bancroft,
    #[error("geodetic conversion failed")]
    Geodetic,
    #[error("filter update rejected, no consistent satellite subset")]
    NoConsistentSubset,
    #[error("matrix factorization failed")]
    Factorization,
}

impl From<gnss_rnx::coords::Error> for Error {
    fn from(_: gnss_rnx::coords::Error) -> Self {
        Error::Geodetic
    }
}

pub mod prelude {
    pub use crate::epoch_data::{EpochData, SatData};
    pub use crate::filter::{Filter, Solution};
    pub use crate::models::{Iono, Tides, Tropo, WindUp};
    pub use crate::options::PppOptions;
    pub use crate::Error;
}
