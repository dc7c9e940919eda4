#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

use thiserror::Error;

pub mod bits;
pub mod codes;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod msg;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// incomplete frame, keep the buffer and wait for more bytes
    #[error("not enough bytes")]
    NotEnoughBytes,
    #[error("no preamble byte in buffer")]
    NoPreamble,
    #[error("frame checksum mismatch")]
    CrcMismatch,
    #[error("message type {0} is not an SSR message")]
    UnknownMessage(u16),
    #[error("truncated payload")]
    TruncatedPayload,
    #[error("field out of range")]
    FieldRange,
}

pub mod prelude {
    pub use crate::codes::{code_type_from_rnx, code_type_to_rnx};
    pub use crate::decoder::{SsrDecoder, SsrEvent};
    pub use crate::encoder::SsrEncoder;
    pub use crate::frame::{frame, Frame};
    pub use crate::msg::{
        ClockOrbit, CoKind, CoSat, CodeBias, CodeBiasSat, PhaseBias, PhaseBiasEntry, PhaseBiasSat,
        SsrMessage, System, Vtec, VtecLayer,
    };
    pub use crate::Error;
}
