//! RTNet stream parser: per epoch ASCII blocks carrying the precise
//! orbit/clock/bias solution to re-encode.
use gnss_rnx::epoch;
use gnss_rnx::prn::Prn;
use hifitime::Epoch;
use log::warn;
use nalgebra::{DMatrix, Vector3};
use std::str::FromStr;

/// One phase bias signal of a satellite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtnetPhaseBias {
    pub rnx_type: String,
    pub bias: f64,
    pub integer_indicator: u8,
    pub wide_lane_indicator: u8,
    pub discontinuity_counter: u8,
}

/// Parsed per satellite record
#[derive(Debug, Clone, Default)]
pub struct RtnetSat {
    pub prn: Prn,
    /// antenna phase center position [m]
    pub apc: Vector3<f64>,
    /// clock [m]
    pub clk: f64,
    pub vel: Vector3<f64>,
    /// center of mass position [m]
    pub com: Option<Vector3<f64>>,
    pub code_biases: Vec<(String, f64)>,
    /// yaw angle [rad], normalized to [0, 2π)
    pub yaw_angle: f64,
    /// yaw rate [rad/s]
    pub yaw_rate: f64,
    pub phase_biases: Vec<RtnetPhaseBias>,
}

/// VTEC block of one epoch
#[derive(Debug, Clone)]
pub struct RtnetVtec {
    pub update_interval: f64,
    pub layers: Vec<(f64, DMatrix<f64>, DMatrix<f64>)>,
}

/// One complete RTNet epoch
#[derive(Debug, Clone, Default)]
pub struct RtnetEpoch {
    pub time: Option<Epoch>,
    pub sats: Vec<RtnetSat>,
    pub dispersive_consistency: u8,
    pub mw_consistency: u8,
    pub vtec: Option<RtnetVtec>,
}

/// Buffering RTNet reader: complete epochs (terminated by "EOE") are
/// parsed out, the unfinished tail stays buffered.
#[derive(Debug, Default)]
pub struct RtnetReader {
    buffer: String,
}

impl RtnetReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends stream content and returns the last completed epoch,
    /// if any. Earlier completed epochs in the same chunk are dropped,
    /// only the most recent one is re-encoded.
    pub fn feed(&mut self, chunk: &str) -> Option<RtnetEpoch> {
        self.buffer.push_str(chunk);

        let epoch_end = self.buffer.rfind("EOE")?;
        let epoch_begin = match self.buffer[..epoch_end].rfind('*') {
            Some(begin) => begin,
            None => {
                // nothing but garbage in front of the terminator
                self.buffer.drain(..epoch_end + 3);
                return None;
            },
        };
        let block: String = self.buffer[epoch_begin..epoch_end].to_string();
        self.buffer.drain(..epoch_end + 3);
        parse_epoch(&block)
    }
}

fn parse_epoch(block: &str) -> Option<RtnetEpoch> {
    let mut lines = block.lines().filter(|line| !line.trim().is_empty());
    let first = lines.next()?;
    let mut items = first.split_ascii_whitespace();
    if items.next() != Some("*") {
        return None;
    }
    let mut date = [0.0f64; 6];
    for field in date.iter_mut() {
        *field = items.next().and_then(|s| s.parse().ok())?;
    }
    let mut result = RtnetEpoch {
        time: Some(epoch::from_civil(
            date[0] as i32,
            date[1] as u8,
            date[2] as u8,
            date[3] as u8,
            date[4] as u8,
            date[5],
        )),
        ..Default::default()
    };

    for line in lines {
        let mut items = line.split_ascii_whitespace().peekable();
        let key = match items.next() {
            Some(key) => key,
            None => continue,
        };

        if key == "IND" {
            let disp = items.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let mw = items.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            result.dispersive_consistency = disp;
            result.mw_consistency = mw;
            continue;
        }
        if key == "VTEC" {
            result.vtec = parse_vtec(&mut items);
            continue;
        }

        // satellite line
        let mut prn = match Prn::from_str(key) {
            Ok(prn) => prn,
            Err(_) => {
                warn!("rtnet: unparsable line key {:?}", key);
                continue;
            },
        };
        if prn.system() == 'E' {
            prn.flag = 1; // I/NAV
        }
        let mut sat = RtnetSat {
            prn,
            ..Default::default()
        };

        while let Some(tag) = items.next() {
            let n_val: usize = match items.next().and_then(|s| s.parse().ok()) {
                Some(n) => n,
                None => break,
            };
            match tag {
                "APC" => {
                    for ii in 0..n_val.min(3) {
                        sat.apc[ii] = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    }
                },
                "Clk" => {
                    if n_val == 1 {
                        sat.clk = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    }
                },
                "Vel" => {
                    for ii in 0..n_val.min(3) {
                        sat.vel[ii] = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    }
                },
                "CoM" => {
                    let mut com = Vector3::zeros();
                    for ii in 0..n_val.min(3) {
                        com[ii] = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    }
                    sat.com = Some(com);
                },
                "CodeBias" => {
                    for _ in 0..n_val {
                        let rnx_type = items.next().unwrap_or("").to_string();
                        let value = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                        if !rnx_type.is_empty() {
                            sat.code_biases.push((rnx_type, value));
                        }
                    }
                },
                "YawAngle" => {
                    let mut yaw: f64 =
                        items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    if yaw < 0.0 {
                        yaw += 2.0 * std::f64::consts::PI;
                    } else if yaw > 2.0 * std::f64::consts::PI {
                        yaw -= 2.0 * std::f64::consts::PI;
                    }
                    sat.yaw_angle = yaw;
                },
                "YawRate" => {
                    sat.yaw_rate = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                },
                "PhaseBias" => {
                    for _ in 0..n_val {
                        let rnx_type = items.next().unwrap_or("").to_string();
                        let bias = items.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                        let integer_indicator =
                            items.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                        let wide_lane_indicator =
                            items.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                        let discontinuity_counter =
                            items.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                        if !rnx_type.is_empty() {
                            sat.phase_biases.push(RtnetPhaseBias {
                                rnx_type,
                                bias,
                                integer_indicator,
                                wide_lane_indicator,
                                discontinuity_counter,
                            });
                        }
                    }
                },
                _ => {
                    // unknown tag: skip its values
                    for _ in 0..n_val {
                        items.next();
                    }
                },
            }
        }
        result.sats.push(sat);
    }
    Some(result)
}

fn parse_vtec<'a, I: Iterator<Item = &'a str>>(
    items: &mut std::iter::Peekable<I>,
) -> Option<RtnetVtec> {
    let update_interval: f64 = items.next().and_then(|s| s.parse().ok())?;
    let num_layers: usize = items.next().and_then(|s| s.parse().ok())?;
    let mut layers = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let _index: usize = items.next().and_then(|s| s.parse().ok())?;
        let degree: usize = items.next().and_then(|s| s.parse().ok())?;
        let order: usize = items.next().and_then(|s| s.parse().ok())?;
        let height: f64 = items.next().and_then(|s| s.parse().ok())?;
        let mut cos = DMatrix::zeros(degree + 1, order + 1);
        let mut sin = DMatrix::zeros(degree + 1, order + 1);
        for matrix in [&mut cos, &mut sin] {
            for n in 0..=degree {
                for m in 0..=order {
                    matrix[(n, m)] = items.next().and_then(|s| s.parse().ok())?;
                }
            }
        }
        layers.push((height, cos, sin));
    }
    Some(RtnetVtec {
        update_interval,
        layers,
    })
}
