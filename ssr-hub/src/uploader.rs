//! Re-encoder: RTNet precise solutions against the broadcast ephemeris,
//! emitted as SSR RTCM3, clock RINEX records and SP3 records.
use crate::config::TrafoParams;
use crate::rtnet::{RtnetEpoch, RtnetReader, RtnetSat};
use gnss_rnx::constants::Constants;
use gnss_rnx::coords::ecef_to_rsw;
use gnss_rnx::corr::update_interval_code;
use gnss_rnx::eph::{Eph, EphStore};
use gnss_rnx::epoch;
use gnss_rnx::prn::Prn;
use hifitime::Epoch;
use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use rtcm_ssr::codes::code_type_from_rnx;
use rtcm_ssr::encoder::SsrEncoder;
use rtcm_ssr::msg::{
    ClockOrbit, CoKind, CoSat, CodeBias, CodeBiasSat, PhaseBias, PhaseBiasEntry, PhaseBiasSat,
    SsrMessage, System, Vtec, VtecLayer,
};
use std::collections::HashMap;

/// 14 parameter Helmert transformation with drift, translations [m],
/// rotations [arcsec], scale [ppb], rates per year, reference epoch in
/// decimal years.
#[derive(Debug, Clone)]
pub struct TrafoFrame {
    pub name: String,
    dx: f64,
    dy: f64,
    dz: f64,
    dxr: f64,
    dyr: f64,
    dzr: f64,
    ox: f64,
    oy: f64,
    oz: f64,
    oxr: f64,
    oyr: f64,
    ozr: f64,
    sc: f64,
    scr: f64,
    t0: f64,
    /// approximate center of the frame's service area
    mean_sta: Vector3<f64>,
}

impl TrafoFrame {
    /// Built in frame parameters; `None` for IGS08 (no transformation)
    pub fn by_name(name: &str, custom: &TrafoParams) -> Option<TrafoFrame> {
        let frame = match name {
            "ETRF2000" => TrafoFrame {
                name: name.to_string(),
                dx: 0.0521,
                dy: 0.0493,
                dz: -0.0585,
                dxr: 0.0001,
                dyr: 0.0001,
                dzr: -0.0018,
                ox: 0.000891,
                oy: 0.005390,
                oz: -0.008712,
                oxr: 0.000081,
                oyr: 0.000490,
                ozr: -0.000792,
                sc: 1.34,
                scr: 0.08,
                t0: 2000.0,
                mean_sta: Vector3::new(3661090.0, 845230.0, 5136850.0),
            },
            "NAD83" => TrafoFrame {
                name: name.to_string(),
                dx: 0.99343,
                dy: -1.90331,
                dz: -0.52655,
                dxr: 0.00079,
                dyr: -0.00060,
                dzr: -0.00134,
                ox: -0.02591467,
                oy: -0.00942645,
                oz: -0.01159935,
                oxr: -0.00006667,
                oyr: 0.00075744,
                ozr: 0.00005133,
                sc: 1.71504,
                scr: -0.10201,
                t0: 1997.0,
                mean_sta: Vector3::new(-1092950.0, -4383600.0, 4487420.0),
            },
            "GDA94" => TrafoFrame {
                name: name.to_string(),
                dx: -0.08468,
                dy: -0.01942,
                dz: 0.03201,
                dxr: 0.00142,
                dyr: 0.00134,
                dzr: 0.00090,
                ox: 0.0004254,
                oy: -0.0022578,
                oz: -0.0024015,
                oxr: -0.0015461,
                oyr: -0.0011820,
                ozr: -0.0011551,
                sc: 9.710,
                scr: 0.109,
                t0: 1994.0,
                mean_sta: Vector3::new(-4052050.0, 4212840.0, -2545110.0),
            },
            "SIRGAS2000" => TrafoFrame {
                name: name.to_string(),
                dx: 0.0020,
                dy: 0.0041,
                dz: 0.0039,
                dxr: 0.0,
                dyr: 0.0,
                dzr: 0.0,
                ox: 0.000170,
                oy: -0.000030,
                oz: 0.000070,
                oxr: 0.0,
                oyr: 0.0,
                ozr: 0.0,
                sc: -1.000,
                scr: 0.0,
                t0: 0.0,
                mean_sta: Vector3::new(3740860.0, -4964290.0, -1425420.0),
            },
            "SIRGAS95" => TrafoFrame {
                name: name.to_string(),
                dx: 0.0077,
                dy: 0.0058,
                dz: -0.0138,
                dxr: 0.0,
                dyr: 0.0,
                dzr: 0.0,
                ox: 0.0,
                oy: 0.0,
                oz: -0.000030,
                oxr: 0.0,
                oyr: 0.0,
                ozr: 0.0,
                sc: 1.570,
                scr: 0.0,
                t0: 0.0,
                mean_sta: Vector3::new(3135390.0, -5017670.0, -2374440.0),
            },
            "DREF91" => TrafoFrame {
                name: name.to_string(),
                dx: -0.0118,
                dy: 0.1432,
                dz: -0.1117,
                dxr: 0.0001,
                dyr: 0.0001,
                dzr: -0.0018,
                ox: 0.003291,
                oy: 0.006190,
                oz: -0.011012,
                oxr: 0.000081,
                oyr: 0.000490,
                ozr: -0.000792,
                sc: 12.24,
                scr: 0.08,
                t0: 2000.0,
                mean_sta: Vector3::new(3959579.0, 721719.0, 4931539.0),
            },
            "Custom" => TrafoFrame {
                name: name.to_string(),
                dx: custom.dx,
                dy: custom.dy,
                dz: custom.dz,
                dxr: custom.dxr,
                dyr: custom.dyr,
                dzr: custom.dzr,
                ox: custom.ox,
                oy: custom.oy,
                oz: custom.oz,
                oxr: custom.oxr,
                oyr: custom.oyr,
                ozr: custom.ozr,
                sc: custom.sc,
                scr: custom.scr,
                t0: custom.t0,
                mean_sta: Vector3::zeros(),
            },
            _ => return None,
        };
        Some(frame)
    }

    /// Transforms a position in place, returning the scale induced clock
    /// adjustment [s] at the mean station distance.
    pub fn apply(&self, gps_week: u32, xyz: &mut Vector3<f64>) -> f64 {
        // epoch in years since the frame reference epoch
        let dt = (gps_week as f64 - (1042.0 + 6.0 / 7.0)) / 365.2422 * 7.0 + 2000.0 - self.t0;

        let dx = Vector3::new(
            self.dx + dt * self.dxr,
            self.dy + dt * self.dyr,
            self.dz + dt * self.dzr,
        );

        const ARC_SEC: f64 = 180.0 * 3600.0 / std::f64::consts::PI;
        let ox = (self.ox + dt * self.oxr) / ARC_SEC;
        let oy = (self.oy + dt * self.oyr) / ARC_SEC;
        let oz = (self.oz + dt * self.ozr) / ARC_SEC;

        let sc = 1.0 + self.sc * 1e-9 + dt * self.scr * 1e-9;

        // clock correction proportional to the topocentric distance
        let rho = (*xyz - self.mean_sta).norm();
        let dc = rho * (sc - 1.0) / sc / Constants::C;

        let r_mat = Matrix3::new(1.0, -oz, oy, oz, 1.0, -ox, -oy, ox, 1.0);
        *xyz = sc * r_mat * *xyz + dx;
        dc
    }
}

/// Clock RINEX record (relativity removed)
#[derive(Debug, Clone, PartialEq)]
pub struct ClockRinexRecord {
    pub time: Epoch,
    pub prn: Prn,
    /// clock [s]
    pub clk: f64,
}

/// SP3 record: center of mass position and clock
#[derive(Debug, Clone, PartialEq)]
pub struct Sp3Record {
    pub time: Epoch,
    pub prn: Prn,
    pub com: Vector3<f64>,
    /// clock [s]
    pub clk: f64,
}

/// Everything produced for one RTNet epoch
#[derive(Debug, Default)]
pub struct UploadOutput {
    pub rtcm: Vec<u8>,
    pub rnx: Vec<ClockRinexRecord>,
    pub sp3: Vec<Sp3Record>,
}

/// Epoch locked ephemeris choice per satellite
struct UsedEph {
    iod: u32,
}

/// The RTNet to RTCM3 re-encoder
pub struct Uploader {
    eph_store: EphStore,
    /// reception instants, drives the prefer-previous-issue window
    received: HashMap<Prn, Epoch>,
    reader: RtnetReader,
    used_eph: HashMap<Prn, UsedEph>,
    trafo: Option<TrafoFrame>,
    upload_com: bool,
    provider_id: u16,
    solution_id: u8,
    ssr_iod: u8,
    /// clock correction sampling [s]
    sampl_clk_corr: f64,
    /// orbit correction sampling [s], 0 = combined messages
    sampl_eph_corr: f64,
    /// clock RINEX sampling [s]
    sampl_clk_rnx: u32,
    /// SP3 sampling [s]
    sampl_sp3: u32,
}

/// A fresh issue is ignored this long in favour of the previous one
const MIN_EPH_AGE: f64 = 60.0;

impl Uploader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trafo: Option<TrafoFrame>,
        upload_com: bool,
        provider_id: u16,
        solution_id: u8,
        ssr_iod: u8,
        sampl_clk_corr: f64,
        sampl_eph_corr: f64,
        sampl_clk_rnx: u32,
        sampl_sp3_min: u32,
    ) -> Self {
        Self {
            eph_store: EphStore::new(),
            received: HashMap::new(),
            reader: RtnetReader::new(),
            used_eph: HashMap::new(),
            trafo,
            upload_com,
            provider_id,
            solution_id,
            ssr_iod,
            sampl_clk_corr,
            sampl_eph_corr,
            sampl_clk_rnx,
            sampl_sp3: sampl_sp3_min * 60,
        }
    }

    /// Feeds a broadcast ephemeris
    pub fn put_eph(&mut self, eph: Eph, now: Epoch) {
        let prn = eph.prn;
        if self.eph_store.put(eph) == gnss_rnx::eph::PutOutcome::New {
            self.received.insert(prn, now);
        }
    }

    /// Feeds RTNet stream content; a completed epoch is re-encoded
    pub fn decode_rtnet(&mut self, chunk: &str, now: Epoch) -> Option<UploadOutput> {
        let epoch_block = self.reader.feed(chunk)?;
        let epoch_time = epoch_block.time?;
        debug!("uploader: decode {:?}", epoch_time);
        Some(self.process_epoch(&epoch_block, epoch_time, now))
    }

    /*
     * Selects the ephemeris issue the corrections refer to: prefer the
     * previous issue while the latest is younger than a minute, and hold
     * the choice fixed between orbit sampling boundaries so clock and
     * orbit messages share their IOD.
     */
    fn select_eph(&mut self, prn: &Prn, epoch_time: Epoch, now: Epoch) -> Option<Eph> {
        let last = self.eph_store.eph_last(prn)?.clone();
        let prev = self.eph_store.eph_prev(prn).cloned();

        let mut eph = last.clone();
        if let (Some(prev), Some(received)) = (prev.as_ref(), self.received.get(prn)) {
            if (now - *received).to_seconds() < MIN_EPH_AGE {
                eph = prev.clone();
            }
        }

        if self.sampl_eph_corr > 0.0 {
            let sow = epoch::gps_sec_of_week(epoch_time);
            if sow % self.sampl_eph_corr == 0.0 {
                self.used_eph.insert(*prn, UsedEph { iod: eph.iod() });
            } else {
                let used = self.used_eph.get(prn)?;
                if last.iod() == used.iod {
                    eph = last;
                } else if prev.as_ref().map(|p| p.iod()) == Some(used.iod) {
                    eph = prev.unwrap();
                } else {
                    return None;
                }
            }
        }
        Some(eph)
    }

    fn process_epoch(
        &mut self,
        epoch_block: &RtnetEpoch,
        epoch_time: Epoch,
        now: Epoch,
    ) -> UploadOutput {
        let mut output = UploadOutput::default();

        let (gps_week, gps_sow) = epoch::gps_week_sec(epoch_time);
        let (_, bds_sow) = epoch::bds_week_sec(epoch_time);
        let (y, m, d, _, _, _) = epoch::civil(epoch_time);
        let glo_daysec = (gps_sow + 3.0 * 3600.0 - epoch::gps_leap_seconds(y, m, d) as f64)
            .rem_euclid(86400.0);

        let epoch_secs = |system: System| -> u32 {
            match system {
                System::Glo => glo_daysec as u32,
                System::Bds => bds_sow as u32,
                _ => gps_sow as u32,
            }
        };

        // update interval codes
        let mut clk_upd = 2; // 5 s
        let mut eph_upd = clk_upd;
        if self.sampl_clk_corr > 5.0 && self.sampl_eph_corr <= 5.0 {
            eph_upd = update_interval_code(self.sampl_clk_corr);
        }
        if self.sampl_clk_corr > 5.0 {
            clk_upd = update_interval_code(self.sampl_clk_corr);
        }
        if self.sampl_eph_corr > 5.0 {
            eph_upd = update_interval_code(self.sampl_eph_corr);
        }

        let mut co_sats: HashMap<System, Vec<CoSat>> = HashMap::new();
        let mut bias_sats: HashMap<System, Vec<CodeBiasSat>> = HashMap::new();
        let mut phase_sats: HashMap<System, Vec<PhaseBiasSat>> = HashMap::new();

        for sat in epoch_block.sats.iter() {
            let system = match System::from_char(sat.prn.system()) {
                Some(system) => system,
                None => continue,
            };
            let eph = match self.select_eph(&sat.prn, epoch_time, now) {
                Some(eph) => eph,
                None => {
                    debug!("uploader: no ephemeris for {}", sat.prn);
                    continue;
                },
            };

            if let Some((co_sat, rnx, sp3)) =
                self.process_satellite(&eph, gps_week, epoch_time, sat)
            {
                co_sats.entry(system).or_default().push(co_sat);
                if let Some(rnx) = rnx {
                    output.rnx.push(rnx);
                }
                if let Some(sp3) = sp3 {
                    output.sp3.push(sp3);
                }
            }

            // code biases
            if !sat.code_biases.is_empty() {
                let mut record = CodeBiasSat {
                    id: sat.prn.number(),
                    biases: Vec::new(),
                };
                for (rnx_type, value) in sat.code_biases.iter() {
                    match code_type_from_rnx(system, rnx_type) {
                        Some(code_type) => record.biases.push((code_type, *value)),
                        None => warn!("unknown code type {} {}", sat.prn, rnx_type),
                    }
                }
                if !record.biases.is_empty() {
                    bias_sats.entry(system).or_default().push(record);
                }
            }

            // phase biases
            if !sat.phase_biases.is_empty() {
                let mut record = PhaseBiasSat {
                    id: sat.prn.number(),
                    yaw: sat.yaw_angle,
                    yaw_rate: sat.yaw_rate,
                    biases: Vec::new(),
                };
                for bias in sat.phase_biases.iter() {
                    match code_type_from_rnx(system, &bias.rnx_type) {
                        Some(code_type) => record.biases.push(PhaseBiasEntry {
                            code_type,
                            integer_indicator: bias.integer_indicator != 0,
                            wide_lane_indicator: bias.wide_lane_indicator,
                            discontinuity_counter: bias.discontinuity_counter,
                            bias: bias.bias,
                        }),
                        None => warn!("unknown phase type {} {}", sat.prn, bias.rnx_type),
                    }
                }
                if !record.biases.is_empty() {
                    phase_sats.entry(system).or_default().push(record);
                }
            }
        }

        // emission: clock/orbit, code bias, phase bias, VTEC
        let mut encoder = SsrEncoder::new();
        let systems_present: Vec<System> = System::ALL
            .iter()
            .copied()
            .filter(|system| co_sats.contains_key(system))
            .collect();

        for (position, system) in systems_present.iter().enumerate() {
            let more = position + 1 < systems_present.len();
            let sats = co_sats.remove(system).unwrap();
            if self.sampl_eph_corr == 0.0 {
                encoder.push(&SsrMessage::ClockOrbit(ClockOrbit {
                    system: *system,
                    kind: CoKind::Combined,
                    epoch_time: epoch_secs(*system),
                    update_interval: clk_upd,
                    multiple_message: more,
                    sat_ref_datum: false,
                    ssr_iod: self.ssr_iod,
                    provider_id: self.provider_id,
                    solution_id: self.solution_id,
                    sats,
                }));
            } else {
                if epoch::gps_sec_of_week(epoch_time) % self.sampl_eph_corr == 0.0 {
                    encoder.push(&SsrMessage::ClockOrbit(ClockOrbit {
                        system: *system,
                        kind: CoKind::Orbit,
                        epoch_time: epoch_secs(*system),
                        update_interval: eph_upd,
                        multiple_message: true,
                        sat_ref_datum: false,
                        ssr_iod: self.ssr_iod,
                        provider_id: self.provider_id,
                        solution_id: self.solution_id,
                        sats: sats.clone(),
                    }));
                }
                encoder.push(&SsrMessage::ClockOrbit(ClockOrbit {
                    system: *system,
                    kind: CoKind::Clock,
                    epoch_time: epoch_secs(*system),
                    update_interval: clk_upd,
                    multiple_message: more,
                    sat_ref_datum: false,
                    ssr_iod: self.ssr_iod,
                    provider_id: self.provider_id,
                    solution_id: self.solution_id,
                    sats,
                }));
            }
        }

        for system in System::ALL {
            if let Some(sats) = bias_sats.remove(&system) {
                encoder.push(&SsrMessage::CodeBias(CodeBias {
                    system,
                    epoch_time: epoch_secs(system),
                    update_interval: clk_upd,
                    multiple_message: false,
                    ssr_iod: self.ssr_iod,
                    provider_id: self.provider_id,
                    solution_id: self.solution_id,
                    sats,
                }));
            }
        }
        for system in System::ALL {
            if let Some(sats) = phase_sats.remove(&system) {
                encoder.push(&SsrMessage::PhaseBias(PhaseBias {
                    system,
                    epoch_time: epoch_secs(system),
                    update_interval: clk_upd,
                    multiple_message: false,
                    ssr_iod: self.ssr_iod,
                    provider_id: self.provider_id,
                    solution_id: self.solution_id,
                    dispersive_consistency: epoch_block.dispersive_consistency != 0,
                    mw_consistency: epoch_block.mw_consistency != 0,
                    sats,
                }));
            }
        }

        if let Some(ref vtec) = epoch_block.vtec {
            encoder.push(&SsrMessage::Vtec(Vtec {
                epoch_time: gps_sow as u32,
                update_interval: update_interval_code(vtec.update_interval),
                multiple_message: false,
                ssr_iod: self.ssr_iod,
                provider_id: self.provider_id,
                solution_id: self.solution_id,
                quality: 0.0,
                layers: vtec
                    .layers
                    .iter()
                    .map(|(height, cos, sin)| VtecLayer {
                        height: *height,
                        cos: cos.clone(),
                        sin: sin.clone(),
                    })
                    .collect(),
            }));
        }

        output.rtcm = encoder.take();
        output
    }

    /*
     * Delta between the precise solution and the broadcast state:
     * position in the orbital frame, clock against the broadcast clock
     * with the frame scale term removed.
     */
    fn process_satellite(
        &self,
        eph: &Eph,
        gps_week: u32,
        epoch_time: Epoch,
        sat: &RtnetSat,
    ) -> Option<(CoSat, Option<ClockRinexRecord>, Option<Sp3Record>)> {
        let broadcast = eph.position(epoch_time).ok()?;

        let mut x_precise = if self.upload_com {
            sat.com.unwrap_or(sat.apc)
        } else {
            sat.apc
        };

        let mut dc = 0.0;
        if let Some(ref trafo) = self.trafo {
            dc = trafo.apply(gps_week, &mut x_precise);
        }

        let dx = broadcast.xyz - x_precise;
        let dv = broadcast.vel - sat.vel;

        let rsw = ecef_to_rsw(&broadcast.xyz, &broadcast.vel, &dx);
        let dot_rsw = ecef_to_rsw(&broadcast.xyz, &broadcast.vel, &dv);

        let d_clk = sat.clk - (broadcast.clk - dc) * Constants::C;

        let co_sat = CoSat {
            id: sat.prn.number(),
            iod: eph.iod(),
            delta: [rsw[0], rsw[1], rsw[2]],
            dot_delta: [dot_rsw[0], dot_rsw[1], dot_rsw[2]],
            clock: [d_clk, 0.0, 0.0],
            hr_clock: 0.0,
        };

        // relativity removed for the file products
        let relativity = -2.0 * x_precise.dot(&sat.vel) / Constants::C;
        let sp3_clk = (sat.clk - relativity) / Constants::C;

        let sow = epoch::gps_sec_of_week(epoch_time);
        let rnx = if self.sampl_clk_rnx == 0 || (sow as u64) % self.sampl_clk_rnx as u64 == 0 {
            Some(ClockRinexRecord {
                time: epoch_time,
                prn: sat.prn,
                clk: sp3_clk,
            })
        } else {
            None
        };
        let sp3 = if self.sampl_sp3 == 0 || (sow as u64) % self.sampl_sp3 as u64 == 0 {
            Some(Sp3Record {
                time: epoch_time,
                prn: sat.prn,
                com: sat.com.unwrap_or(sat.apc),
                clk: sp3_clk,
            })
        } else {
            None
        };

        Some((co_sat, rnx, sp3))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss_rnx::eph::{EphGps, EphModel};
    use gnss_rs::prelude::Constellation;
    use rtcm_ssr::decoder::{SsrDecoder, SsrEvent};

    fn gps_eph(prn_number: u8, toc: Epoch) -> Eph {
        let (week, sow) = epoch::gps_week_sec(toc);
        let model = EphGps {
            clock_bias: 1.0e-4,
            iode: 44.0,
            e: 0.01,
            m0: 1.2,
            sqrt_a: 5153.7,
            toe_sec: sow,
            omega0: -2.0,
            i0: 0.96,
            omega: 0.6,
            toe_week: week as f64,
            iodc: 44.0,
            ..Default::default()
        };
        Eph::new(
            Prn::new(Constellation::GPS, prn_number, 0),
            toc,
            EphModel::Gps(model),
        )
    }

    #[test]
    fn helmert_round_trip() {
        let custom = TrafoParams::default();
        let frame = TrafoFrame::by_name("ETRF2000", &custom).unwrap();
        let inverse = {
            let mut inv = frame.clone();
            inv.dx = -inv.dx;
            inv.dy = -inv.dy;
            inv.dz = -inv.dz;
            inv.dxr = -inv.dxr;
            inv.dyr = -inv.dyr;
            inv.dzr = -inv.dzr;
            inv.ox = -inv.ox;
            inv.oy = -inv.oy;
            inv.oz = -inv.oz;
            inv.oxr = -inv.oxr;
            inv.oyr = -inv.oyr;
            inv.ozr = -inv.ozr;
            inv.sc = -inv.sc;
            inv.scr = -inv.scr;
            inv
        };
        let original = Vector3::new(13861877.0, -8969840.2, 20379814.3);
        let mut xyz = original;
        frame.apply(2220, &mut xyz);
        assert!((xyz - original).norm() > 0.01); // the frame moved it
        inverse.apply(2220, &mut xyz);
        assert!(
            (xyz - original).norm() < 1.0e-3,
            "round trip error {}",
            (xyz - original).norm()
        );
    }

    #[test]
    fn unknown_frame() {
        assert!(TrafoFrame::by_name("IGS08", &TrafoParams::default()).is_none());
        assert!(TrafoFrame::by_name("ETRF2000", &TrafoParams::default()).is_some());
    }

    #[test]
    fn rtnet_to_rtcm() {
        let toc = epoch::from_gps_week_sec(2220, 345600.0);
        let now = toc + hifitime::Duration::from_seconds(600.0);
        let mut uploader = Uploader::new(None, false, 258, 1, 1, 5.0, 0.0, 5, 0);
        // received long ago: the latest issue is used directly
        uploader.put_eph(gps_eph(5, toc), toc);

        let broadcast = gps_eph(5, toc).position(toc).unwrap();
        // precise solution: 0.5 m radial offset, clock 2.0 m away from
        // the broadcast value
        let radial = broadcast.xyz.normalize();
        let x_precise = broadcast.xyz - radial * 0.5;
        let clk_precise = broadcast.clk * Constants::C + 2.0;

        let (yy, m, d, hh, mm, ss) = epoch::civil(toc);
        let block = format!(
            "* {} {:02} {:02} {:02} {:02} {:.3}\nG05 APC 3 {:.4} {:.4} {:.4} Clk 1 {:.4} Vel 3 {:.4} {:.4} {:.4}\nEOE\n",
            yy,
            m,
            d,
            hh,
            mm,
            ss,
            x_precise[0],
            x_precise[1],
            x_precise[2],
            clk_precise,
            broadcast.vel[0],
            broadcast.vel[1],
            broadcast.vel[2],
        );

        let output = uploader.decode_rtnet(&block, now).expect("epoch encoded");
        assert!(!output.rtcm.is_empty());
        assert_eq!(output.rnx.len(), 1);
        assert_eq!(output.sp3.len(), 1);

        // the emitted correction round trips through the wire decoder
        let mut decoder = SsrDecoder::new("LOOP");
        decoder.feed(&output.rtcm, now);
        let flush = SsrMessage::ClockOrbit(ClockOrbit {
            system: System::Gps,
            kind: CoKind::Combined,
            epoch_time: 345605,
            update_interval: 0,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            sats: vec![CoSat {
                id: 5,
                iod: 44,
                ..Default::default()
            }],
        })
        .to_frame();
        let events = decoder.feed(&flush, now);

        let orb = events
            .iter()
            .find_map(|event| match event {
                SsrEvent::OrbCorrections(list) => Some(&list[0]),
                _ => None,
            })
            .expect("orbit correction decoded");
        assert_eq!(orb.iod, 44);
        // broadcast minus precise: +0.5 m radial
        assert!((orb.xr[0] - 0.5).abs() < 0.01, "radial = {}", orb.xr[0]);

        let clk = events
            .iter()
            .find_map(|event| match event {
                SsrEvent::ClkCorrections(list) => Some(&list[0]),
                _ => None,
            })
            .expect("clock correction decoded");
        assert!(
            (clk.d_clk * Constants::C - 2.0).abs() < 0.01,
            "clk = {}",
            clk.d_clk * Constants::C
        );
    }

    #[test]
    fn fresh_ephemeris_held_back() {
        let toc = epoch::from_gps_week_sec(2220, 345600.0);
        let mut uploader = Uploader::new(None, false, 258, 1, 1, 5.0, 0.0, 0, 0);
        uploader.put_eph(gps_eph(5, toc), toc);
        let toc2 = toc + hifitime::Duration::from_seconds(7200.0);
        let mut newer = gps_eph(5, toc2);
        if let EphModel::Gps(ref mut gps) = newer.model {
            gps.iode = 45.0;
        }
        // the new issue arrived just now
        let now = toc2 + hifitime::Duration::from_seconds(10.0);
        uploader.put_eph(newer, now);

        let prn = Prn::new(Constellation::GPS, 5, 0);
        let eph = uploader.select_eph(&prn, toc2, now).unwrap();
        assert_eq!(eph.iod(), 44, "previous issue preferred");

        // a minute later the new issue takes over
        let later = now + hifitime::Duration::from_seconds(120.0);
        let eph = uploader.select_eph(&prn, toc2, later).unwrap();
        assert_eq!(eph.iod(), 45);
    }
}
