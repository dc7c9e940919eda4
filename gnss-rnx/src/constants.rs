//! Physical constants and signal frequencies
use gnss::prelude::Constellation;

/// Physical constants, IS-GPS / GLONASS ICD / BDS ICD values.
pub struct Constants;

impl Constants {
    /// Speed of light [m/s]
    pub const C: f64 = 299792458.0;
    /// Earth rotation rate [rad/s]
    pub const OMEGA: f64 = 7292115.1467e-11;
    /// Semi major axis of the GRS80 ellipsoid [m]
    pub const A_ELL: f64 = 6378137.000;
    /// Inverse flattening of the GRS80 ellipsoid
    pub const F_INV: f64 = 298.2572236;
    /// Mean Earth radius used by the single layer ionosphere model [m]
    pub const R_GEOC: f64 = 6370000.000;
    /// GM, GPS value of the WGS84 [m³/s²]
    pub const GM_GPS: f64 = 398.6005e12;
    /// GM, PZ90 / Galileo value [m³/s²]
    pub const GM_WGS: f64 = 398.60044e12;
    /// GM, BDS (CGCS2000) value [m³/s²]
    pub const GM_BDS: f64 = 398.6004418e12;
    /// Earth rotation rate used by the BDS GEO algorithm [rad/s]
    pub const OMEGA_BDS: f64 = 7292115.0000e-11;
    /// Seconds per GPS week
    pub const SEC_PER_WEEK: f64 = 604800.0;
    /// BDS week number offset with respect to GPS week
    pub const BDS_WEEK_OFFSET: u32 = 1356;
    /// BDT is 14 s behind GPST
    pub const BDS_LEAP: f64 = 14.0;
}

/// Carrier frequency identifier, one per ANTEX frequency tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Frequency {
    G1,
    G2,
    G5,
    R1,
    R2,
    E1,
    E5,
    E6,
    E7,
    E8,
    J1,
    J2,
    J5,
    J6,
    S1,
    S5,
    C2,
    C6,
    C7,
}

impl Frequency {
    /// Carrier frequency in [Hz]. GLONASS FDMA signals require the
    /// frequency channel number.
    pub fn frequency(&self, slot: i32) -> f64 {
        match self {
            Self::G1 | Self::E1 | Self::J1 | Self::S1 => 1575420000.0,
            Self::G2 | Self::J2 => 1227600000.0,
            Self::G5 | Self::E5 | Self::J5 | Self::S5 => 1176450000.0,
            Self::R1 => 1602000000.0 + 562500.0 * slot as f64,
            Self::R2 => 1246000000.0 + 437500.0 * slot as f64,
            Self::E7 | Self::C7 => 1207140000.0,
            Self::E8 => 1191795000.0,
            Self::E6 | Self::J6 => 1278750000.0,
            Self::C2 => 1561098000.0,
            Self::C6 => 1268520000.0,
        }
    }
    /// Carrier wavelength in [m]
    pub fn wavelength(&self, slot: i32) -> f64 {
        Constants::C / self.frequency(slot)
    }
    /// The two frequencies forming the ionosphere free combination
    /// for this constellation.
    pub fn iono_free_pair(constellation: Constellation) -> Option<(Self, Self)> {
        match constellation {
            Constellation::GPS | Constellation::QZSS => Some((Self::G1, Self::G2)),
            Constellation::Glonass => Some((Self::R1, Self::R2)),
            Constellation::Galileo => Some((Self::E1, Self::E5)),
            Constellation::BeiDou => Some((Self::C2, Self::C7)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn frequencies() {
        assert_eq!(Frequency::G1.frequency(0), 1575420000.0);
        assert_eq!(Frequency::R1.frequency(-7), 1602000000.0 - 7.0 * 562500.0);
        let lambda_l1 = Frequency::G1.wavelength(0);
        assert!((lambda_l1 - 0.1902936728).abs() < 1e-9);
    }
    #[test]
    fn iono_free_pairs() {
        assert_eq!(
            Frequency::iono_free_pair(Constellation::GPS),
            Some((Frequency::G1, Frequency::G2))
        );
        assert_eq!(Frequency::iono_free_pair(Constellation::SBAS), None);
    }
}
