//! Satellite identifier with navigation message variant flag
use gnss::prelude::{Constellation, SV};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// [Prn] identifies a satellite like [SV] does, plus a flag that
/// distinguishes navigation message variants broadcast by the same vehicle
/// (Galileo I/NAV vs F/NAV in particular). Two corrections for the same
/// vehicle but different flags refer to different clock references and
/// never mix.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Prn {
    /// Space vehicle
    pub sv: SV,
    /// Navigation message variant. 1 = I/NAV for Galileo, 0 otherwise.
    pub flag: u8,
}

/// Parsing related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParsingError {
    #[error("sv parsing error")]
    SvParsing(#[from] gnss::sv::ParsingError),
    #[error("flag parsing error")]
    FlagParsing(#[from] std::num::ParseIntError),
}

impl Prn {
    /// Largest PRN number over all systems
    pub const MAX: usize = 256;
    /// Largest GPS PRN number
    pub const MAX_GPS: u8 = 32;
    /// Largest GLONASS slot number
    pub const MAX_GLONASS: u8 = 26;

    /// Builds a new [Prn]
    pub fn new(constellation: Constellation, number: u8, flag: u8) -> Self {
        Self {
            sv: SV::new(constellation, number),
            flag,
        }
    }
    /// System character 'G' 'R' 'E' 'C' 'J' 'S' 'I'
    pub fn system(&self) -> char {
        if self.sv.constellation.is_sbas() {
            return 'S';
        }
        match self.sv.constellation {
            Constellation::GPS => 'G',
            Constellation::Glonass => 'R',
            Constellation::Galileo => 'E',
            Constellation::BeiDou => 'C',
            Constellation::QZSS => 'J',
            Constellation::IRNSS => 'I',
            _ => '?',
        }
    }
    /// PRN number within the system
    pub fn number(&self) -> u8 {
        self.sv.prn
    }
    /// Canonical form including the variant flag, e.g. "E03_1"
    pub fn to_internal_string(&self) -> String {
        format!("{}{:02}_{}", self.system(), self.sv.prn, self.flag)
    }
    /// Dense index over all systems, used by fixed size per satellite tables
    pub fn index(&self) -> usize {
        let base = match self.system() {
            'G' => 0,
            'R' => 32,
            'E' => 32 + 26,
            'C' => 32 + 26 + 36,
            'J' => 32 + 26 + 36 + 37,
            'S' => 32 + 26 + 36 + 37 + 10,
            _ => 32 + 26 + 36 + 37 + 10 + 38,
        };
        base + self.sv.prn as usize
    }
}

impl From<SV> for Prn {
    fn from(sv: SV) -> Self {
        Self { sv, flag: 0 }
    }
}

impl std::fmt::Display for Prn {
    /*
     * Prints self as "XYY" standard form, flag omitted
     */
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{:02}", self.system(), self.sv.prn)
    }
}

impl std::str::FromStr for Prn {
    type Err = ParsingError;
    /*
     * Accepts both "G01" and the canonical "G01_0" form
     */
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string.split_once('_') {
            Some((sv, flag)) => Ok(Self {
                sv: SV::from_str(sv.trim())?,
                flag: flag.trim().parse::<u8>()?,
            }),
            None => Ok(Self {
                sv: SV::from_str(string.trim())?,
                flag: 0,
            }),
        }
    }
}
