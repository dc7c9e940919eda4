//! ANTEX antenna lookup: receiver phase center variations and satellite
//! center of mass offsets.
use crate::constants::Frequency;
use crate::prn::Prn;
use log::warn;
use nalgebra::Vector3;
use std::collections::HashMap;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error")]
    IoError(#[from] std::io::Error),
    #[error("unbalanced antenna section")]
    UnbalancedAntenna,
    #[error("unbalanced frequency section")]
    UnbalancedFrequency,
}

/// Per frequency map: phase center offset and zenith indexed pattern
#[derive(Debug, Clone, Default)]
struct FrqMap {
    /// north / east / up offset [m]
    neu: [f64; 3],
    /// zenith angle indexed phase pattern [m]
    pattern: Vec<f64>,
}

/// One antenna entry
#[derive(Debug, Clone, Default)]
struct AntMap {
    zen1: f64,
    zen2: f64,
    d_zen: f64,
    frq_map: HashMap<Frequency, FrqMap>,
}

/// Antenna map database indexed by the ANTEX name string
#[derive(Debug, Default)]
pub struct Antex {
    maps: HashMap<String, AntMap>,
}

fn frequency_tag(tag: &str) -> Option<Frequency> {
    match tag {
        "G01" => Some(Frequency::G1),
        "G02" => Some(Frequency::G2),
        "G05" => Some(Frequency::G5),
        "R01" => Some(Frequency::R1),
        "R02" => Some(Frequency::R2),
        "E01" => Some(Frequency::E1),
        "E05" => Some(Frequency::E5),
        "E06" => Some(Frequency::E6),
        "E07" => Some(Frequency::E7),
        "E08" => Some(Frequency::E8),
        "J01" => Some(Frequency::J1),
        "J02" => Some(Frequency::J2),
        "J05" => Some(Frequency::J5),
        "J06" => Some(Frequency::J6),
        "C02" => Some(Frequency::C2),
        "C06" => Some(Frequency::C6),
        "C07" => Some(Frequency::C7),
        _ => None,
    }
}

impl Antex {
    /// Reads an ANTEX stream
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self, Error> {
        let mut maps = HashMap::new();
        let mut new_ant: Option<(String, AntMap)> = None;
        let mut new_frq: Option<FrqMap> = None;

        for line in reader.lines() {
            let line = line?;
            let label = if line.len() > 60 { &line[60..] } else { "" };

            if label.starts_with("START OF ANTENNA") {
                if new_ant.is_some() {
                    return Err(Error::UnbalancedAntenna);
                }
                new_ant = Some((String::new(), AntMap::default()));
            } else if label.starts_with("END OF ANTENNA") {
                match new_ant.take() {
                    Some((name, map)) => {
                        maps.insert(name, map);
                    },
                    None => return Err(Error::UnbalancedAntenna),
                }
            } else if let Some((ref mut name, ref mut ant)) = new_ant {
                if label.starts_with("TYPE / SERIAL NO") {
                    // satellite antennas are indexed by their PRN string
                    let satellite = ["BLOCK I", "GLONASS", "QZSS", "BEIDOU", "GALILEO", "IRNSS"]
                        .iter()
                        .any(|prefix| line.starts_with(prefix));
                    *name = if satellite {
                        line.get(20..23).unwrap_or("").to_string()
                    } else {
                        line.get(0..20).unwrap_or("").trim_end().to_string()
                    };
                } else if label.starts_with("ZEN1 / ZEN2 / DZEN") {
                    let mut items = line.split_ascii_whitespace();
                    ant.zen1 = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    ant.zen2 = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    ant.d_zen = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                } else if label.starts_with("START OF FREQUENCY") {
                    if new_frq.is_some() {
                        return Err(Error::UnbalancedFrequency);
                    }
                    new_frq = Some(FrqMap::default());
                } else if label.starts_with("END OF FREQUENCY") {
                    match new_frq.take() {
                        Some(frq) => {
                            if let Some(frq_type) =
                                line.get(3..6).and_then(frequency_tag)
                            {
                                ant.frq_map.insert(frq_type, frq);
                            }
                        },
                        None => return Err(Error::UnbalancedFrequency),
                    }
                } else if let Some(ref mut frq) = new_frq {
                    if label.starts_with("NORTH / EAST / UP") {
                        let mut items = line.split_ascii_whitespace();
                        for neu in frq.neu.iter_mut() {
                            *neu = items
                                .next()
                                .and_then(|s| s.parse::<f64>().ok())
                                .unwrap_or(0.0)
                                * 1.0e-3;
                        }
                    } else if line.get(3..8) == Some("NOAZI") {
                        frq.pattern = line[8..]
                            .split_ascii_whitespace()
                            .filter_map(|s| s.parse::<f64>().ok())
                            .map(|v| v * 1.0e-3)
                            .collect();
                    }
                }
            }
        }
        Ok(Self { maps })
    }

    /// Receiver antenna correction: phase center variation at the given
    /// elevation plus the projected phase center offset [m].
    /// `None` when the antenna or the frequency is unknown; the caller
    /// treats that as zero. The artificial name "NULLANTENNA" is zero by
    /// definition.
    pub fn rcv_corr(
        &self,
        ant_name: &str,
        frq_type: Frequency,
        ele_sat: f64,
        az_sat: f64,
    ) -> Option<f64> {
        if ant_name.contains("NULLANTENNA") {
            return Some(0.0);
        }
        let map = match self.maps.get(ant_name) {
            Some(map) => map,
            None => {
                warn!("ANTEX: antenna {:?} not found", ant_name);
                return None;
            },
        };
        let frq = map.frq_map.get(&frq_type)?;

        // nearest neighbour in zenith angle
        let mut var = 0.0;
        if !frq.pattern.is_empty() {
            let zen_sat = 90.0 - ele_sat.to_degrees();
            let mut zen_diff = 999.999;
            let mut zen = map.zen1;
            let mut index = 0;
            while zen <= map.zen2 && index < frq.pattern.len() {
                let new_diff = (zen - zen_sat).abs();
                if new_diff < zen_diff {
                    zen_diff = new_diff;
                    var = frq.pattern[index];
                }
                zen += map.d_zen;
                index += 1;
            }
        }

        Some(
            var - frq.neu[0] * az_sat.cos() * ele_sat.cos()
                - frq.neu[1] * az_sat.sin() * ele_sat.cos()
                - frq.neu[2] * ele_sat.sin(),
        )
    }

    /// Satellite phase center to center of mass offset in ECEF [m],
    /// built through the Sun oriented body frame.
    pub fn sat_com_correction(
        &self,
        prn: &Prn,
        x_sun: &Vector3<f64>,
        x_sat: &Vector3<f64>,
    ) -> Option<Vector3<f64>> {
        let frq_type = match prn.system() {
            'G' => Frequency::G1,
            'R' => Frequency::R1,
            _ => return None,
        };
        let map = self.maps.get(&prn.to_string())?;
        let frq = map.frq_map.get(&frq_type)?;

        let sz = (-x_sat).normalize();
        let sun = x_sun.normalize();
        let sy = sz.cross(&sun).normalize();
        let sx = sy.cross(&sz);

        Some(sx * frq.neu[0] + sy * frq.neu[1] + sz * frq.neu[2])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::BufReader;

    const ANT_NAME: &str = "TEST ANTENNA    NONE";

    fn header() -> String {
        let mut text = String::new();
        text.push_str(&format!("{:60}START OF ANTENNA\n", ""));
        text.push_str(&format!("{:60}TYPE / SERIAL NO\n", ANT_NAME));
        text.push_str(&format!(
            "{:60}ZEN1 / ZEN2 / DZEN\n",
            "     0.0    90.0     5.0"
        ));
        text.push_str(&format!("{:60}START OF FREQUENCY\n", "   G01"));
        text.push_str(&format!(
            "{:>10.2}{:>10.2}{:>10.2}{:30}NORTH / EAST / UP\n",
            1.0, -2.0, 80.0, ""
        ));
        text.push_str("   NOAZI");
        for ii in 0..19 {
            text.push_str(&format!("{:>8.2}", ii as f64 * 0.1));
        }
        text.push('\n');
        text.push_str(&format!("{:60}END OF FREQUENCY\n", "   G01"));
        text.push_str(&format!("{:60}END OF ANTENNA\n", ""));
        text
    }

    #[test]
    fn parse_and_lookup() {
        let text = header();
        let mut reader = BufReader::new(text.as_bytes());
        let antex = Antex::read(&mut reader).unwrap();

        // zenith pass: zenith angle 0, pattern value 0.0, up offset down
        let corr = antex
            .rcv_corr(ANT_NAME, Frequency::G1, std::f64::consts::FRAC_PI_2, 0.0)
            .unwrap();
        assert!((corr - (0.0 - 0.080)).abs() < 1.0e-9, "corr = {}", corr);

        // unknown antenna yields None, NULLANTENNA yields zero
        assert!(antex
            .rcv_corr("UNKNOWN", Frequency::G1, 0.5, 0.0)
            .is_none());
        assert_eq!(
            antex.rcv_corr("NULLANTENNA", Frequency::G1, 0.5, 0.0),
            Some(0.0)
        );
    }

    #[test]
    fn nearest_zenith_bin() {
        let text = header();
        let mut reader = BufReader::new(text.as_bytes());
        let antex = Antex::read(&mut reader).unwrap();
        // elevation 60 deg -> zenith 30 deg -> bin 6 -> 0.6 mm
        let corr = antex
            .rcv_corr(ANT_NAME, Frequency::G1, 60.0f64.to_radians(), 0.0)
            .unwrap();
        let pattern = 0.6e-3;
        let offset = -(1.0e-3) * 60.0f64.to_radians().cos()
            - (-2.0e-3) * 0.0
            - 80.0e-3 * 60.0f64.to_radians().sin();
        assert!((corr - (pattern + offset)).abs() < 1.0e-6);
    }
}
