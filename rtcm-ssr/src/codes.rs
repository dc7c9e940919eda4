//! SSR signal and tracking mode indicators against RINEX v3 codes
use crate::msg::System;

/*
 * One table per system, indexed by the wire code type value. The RINEX
 * code is the 2 character band + attribute form used throughout the
 * correction records.
 */
const GPS_CODES: [(u8, &str); 20] = [
    (0, "1C"),
    (1, "1P"),
    (2, "1W"),
    (3, "1Y"),
    (4, "1M"),
    (5, "2C"),
    (6, "2D"),
    (7, "2S"),
    (8, "2L"),
    (9, "2X"),
    (10, "2P"),
    (11, "2W"),
    (12, "2Y"),
    (13, "2M"),
    (14, "5I"),
    (15, "5Q"),
    (16, "5X"),
    (17, "1S"),
    (18, "1L"),
    (19, "1X"),
];

const GLONASS_CODES: [(u8, &str); 13] = [
    (0, "1C"),
    (1, "1P"),
    (2, "2C"),
    (3, "2P"),
    (4, "4A"),
    (5, "4B"),
    (6, "4X"),
    (7, "6A"),
    (8, "6B"),
    (9, "6X"),
    (10, "3I"),
    (11, "3Q"),
    (12, "3X"),
];

const GALILEO_CODES: [(u8, &str); 19] = [
    (0, "1A"),
    (1, "1B"),
    (2, "1C"),
    (3, "1X"),
    (4, "1Z"),
    (5, "5I"),
    (6, "5Q"),
    (7, "5X"),
    (8, "7I"),
    (9, "7Q"),
    (10, "7X"),
    (11, "8I"),
    (12, "8Q"),
    (13, "8X"),
    (14, "6A"),
    (15, "6B"),
    (16, "6C"),
    (17, "6X"),
    (18, "6Z"),
];

const QZSS_CODES: [(u8, &str); 19] = [
    (0, "1C"),
    (1, "1S"),
    (2, "1L"),
    (3, "2S"),
    (4, "2L"),
    (5, "2X"),
    (6, "5I"),
    (7, "5Q"),
    (8, "5X"),
    (9, "6S"),
    (10, "6L"),
    (11, "6X"),
    (12, "1X"),
    (13, "1Z"),
    (14, "5D"),
    (15, "5P"),
    (16, "5Z"),
    (17, "6E"),
    (18, "6Z"),
];

const SBAS_CODES: [(u8, &str); 4] = [(0, "1C"), (1, "5I"), (2, "5Q"), (3, "5X")];

const BDS_CODES: [(u8, &str); 15] = [
    (0, "2I"),
    (1, "2Q"),
    (2, "2X"),
    (3, "6I"),
    (4, "6Q"),
    (5, "6X"),
    (6, "7I"),
    (7, "7Q"),
    (8, "7X"),
    (9, "1D"),
    (10, "1P"),
    (11, "1X"),
    (12, "2D"),
    (13, "2P"),
    (14, "2X"),
];

fn table(system: System) -> &'static [(u8, &'static str)] {
    match system {
        System::Gps => &GPS_CODES,
        System::Glo => &GLONASS_CODES,
        System::Gal => &GALILEO_CODES,
        System::Qzss => &QZSS_CODES,
        System::Sbas => &SBAS_CODES,
        System::Bds => &BDS_CODES,
    }
}

/// Wire code type -> 2 character RINEX v3 code
pub fn code_type_to_rnx(system: System, code: u8) -> Option<&'static str> {
    table(system)
        .iter()
        .find(|(value, _)| *value == code)
        .map(|(_, rnx)| *rnx)
}

/// 2 character RINEX v3 code -> wire code type. When a code maps to more
/// than one indicator the first (lowest) one wins.
pub fn code_type_from_rnx(system: System, rnx: &str) -> Option<u8> {
    table(system)
        .iter()
        .find(|(_, name)| *name == rnx)
        .map(|(value, _)| *value)
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn gps_entries() {
        assert_eq!(code_type_to_rnx(System::Gps, 0), Some("1C"));
        assert_eq!(code_type_to_rnx(System::Gps, 11), Some("2W"));
        assert_eq!(code_type_to_rnx(System::Gps, 20), None);
        assert_eq!(code_type_from_rnx(System::Gps, "2W"), Some(11));
    }
    #[test]
    fn round_trip_all_systems() {
        for system in [
            System::Gps,
            System::Glo,
            System::Gal,
            System::Qzss,
            System::Sbas,
            System::Bds,
        ] {
            for (value, rnx) in table(system).iter() {
                let back = code_type_from_rnx(system, rnx).unwrap();
                // ambiguous codes resolve to the first indicator
                assert_eq!(code_type_to_rnx(system, back), Some(*rnx));
                assert!(back <= *value);
            }
        }
    }
}
