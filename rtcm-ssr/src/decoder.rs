//! Resumable SSR byte stream decoder
use crate::codes::code_type_to_rnx;
use crate::frame::Frame;
use crate::msg::{ClockOrbit, CoKind, CodeBias, PhaseBias, SsrMessage, System, Vtec};
use crate::Error;
use gnss_rnx::constants::Constants;
use gnss_rnx::corr::{
    ClkCorr, FrqCodeBias, FrqPhaseBias, OrbCorr, SatCodeBias, SatPhaseBias, VTec, VTecLayer,
};
use gnss_rnx::epoch;
use gnss_rnx::prn::Prn;
use gnss_rs::prelude::Constellation;
use hifitime::{Duration, Epoch};
use log::{debug, warn};
use nalgebra::Vector3;
use std::collections::{BTreeMap, HashMap};

/// Record batches leaving the decoder, in strictly non decreasing epoch
/// order per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SsrEvent {
    OrbCorrections(Vec<OrbCorr>),
    ClkCorrections(Vec<ClkCorr>),
    CodeBiases(Vec<SatCodeBias>),
    PhaseBiases(Vec<SatPhaseBias>),
    VTec(VTec),
    /// provider / solution / SSR IOD triple changed: downstream state
    /// referring to this stream is stale
    ProviderChanged,
}

/// Decoder state of one correction stream. Feed raw bytes as they arrive;
/// partial frames stay buffered until completed, corrupted spans are
/// skipped one byte at a time.
pub struct SsrDecoder {
    sta_id: String,
    buffer: Vec<u8>,
    /// most recent orbit issue of data per satellite
    iods: HashMap<Prn, u32>,
    /// last full clock correction per satellite, base of high rate updates
    last_clk: HashMap<Prn, ClkCorr>,
    orb_buffer: BTreeMap<Epoch, Vec<OrbCorr>>,
    clk_buffer: BTreeMap<Epoch, Vec<ClkCorr>>,
    code_buffer: BTreeMap<Epoch, Vec<SatCodeBias>>,
    phase_buffer: BTreeMap<Epoch, Vec<SatPhaseBias>>,
    vtec_buffer: BTreeMap<Epoch, VTec>,
    provider: Option<(u16, u8, u8)>,
}

impl SsrDecoder {
    pub fn new(sta_id: &str) -> Self {
        Self {
            sta_id: sta_id.to_string(),
            buffer: Vec::new(),
            iods: HashMap::new(),
            last_clk: HashMap::new(),
            orb_buffer: BTreeMap::new(),
            clk_buffer: BTreeMap::new(),
            code_buffer: BTreeMap::new(),
            phase_buffer: BTreeMap::new(),
            vtec_buffer: BTreeMap::new(),
            provider: None,
        }
    }

    /// Consumes a chunk of the byte stream. `now` is the host clock on
    /// the GPS timescale, used to place the short epoch fields in time.
    pub fn feed(&mut self, bytes: &[u8], now: Epoch) -> Vec<SsrEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        loop {
            if self.buffer.is_empty() {
                break;
            }
            match Frame::decode(&self.buffer) {
                Err(Error::NotEnoughBytes) => break, // wait for more bytes
                Err(Error::NoPreamble) | Err(Error::CrcMismatch) => {
                    self.buffer.remove(0);
                },
                Err(_) => {
                    self.buffer.remove(0);
                },
                Ok(frame) => {
                    let size = frame.size;
                    match SsrMessage::decode(frame.payload) {
                        Ok(message) => {
                            self.buffer.drain(..size);
                            self.process(message, now, &mut events);
                        },
                        Err(Error::UnknownMessage(number)) => {
                            // a well formed frame of some other RTCM type
                            debug!("{}: skipping message {}", self.sta_id, number);
                            self.buffer.drain(..size);
                        },
                        Err(_) => {
                            self.buffer.remove(0);
                        },
                    }
                },
            }
        }
        events
    }

    fn process(&mut self, message: SsrMessage, now: Epoch, events: &mut Vec<SsrEvent>) {
        let last_time = match &message {
            SsrMessage::ClockOrbit(msg) => {
                self.check_provider(msg, events);
                self.epoch_time(msg.system, msg.epoch_time, now)
            },
            SsrMessage::CodeBias(msg) => self.epoch_time(msg.system, msg.epoch_time, now),
            SsrMessage::PhaseBias(msg) => self.epoch_time(msg.system, msg.epoch_time, now),
            SsrMessage::Vtec(msg) => self.epoch_time(System::Gps, msg.epoch_time, now),
        };

        match message {
            SsrMessage::ClockOrbit(msg) => self.take_clock_orbit(&msg, last_time),
            SsrMessage::CodeBias(msg) => self.take_code_bias(&msg, last_time),
            SsrMessage::PhaseBias(msg) => self.take_phase_bias(&msg, last_time),
            SsrMessage::Vtec(msg) => self.take_vtec(&msg, last_time),
        }

        self.flush(last_time, events);
    }

    /*
     * Provider / solution / SSR IOD change detection, ignoring the
     * all zero triple some casters emit.
     */
    fn check_provider(&mut self, msg: &ClockOrbit, events: &mut Vec<SsrEvent>) {
        if msg.provider_id == 0 && msg.solution_id == 0 && msg.ssr_iod == 0 {
            return;
        }
        let triple = (msg.provider_id, msg.solution_id, msg.ssr_iod);
        match self.provider {
            Some(previous) if previous != triple => {
                warn!("{}: provider changed", self.sta_id);
                events.push(SsrEvent::ProviderChanged);
            },
            _ => {},
        }
        self.provider = Some(triple);
    }

    /*
     * Reconstructs the full epoch from the second of week (second of day
     * for GLONASS, BDS timescale offset for BDS) and rolls it into the
     * 12 hour window around the host clock.
     */
    fn epoch_time(&self, system: System, epoch_sec: u32, now: Epoch) -> Epoch {
        let (week, _) = epoch::gps_week_sec(now);
        let mut sec = epoch_sec as f64;
        match system {
            System::Glo => {
                let (y, m, d, _, _, _) = epoch::civil(now);
                sec = sec - 3.0 * 3600.0 + epoch::gps_leap_seconds(y, m, d) as f64;
            },
            System::Bds => {
                sec += Constants::BDS_LEAP;
                if sec > Constants::SEC_PER_WEEK {
                    sec -= Constants::SEC_PER_WEEK;
                }
            },
            _ => {},
        }
        let mut time = epoch::from_gps_week_sec(week, sec);
        let max_diff = Duration::from_seconds(12.0 * 3600.0);
        while time < now - max_diff {
            time = time + max_diff;
        }
        while time > now + max_diff {
            time = time - max_diff;
        }
        time
    }

    fn prn(system: System, id: u8, flag: u8) -> Prn {
        let constellation = match system {
            System::Gps => Constellation::GPS,
            System::Glo => Constellation::Glonass,
            System::Gal => Constellation::Galileo,
            System::Qzss => Constellation::QZSS,
            System::Sbas => Constellation::SBAS,
            System::Bds => Constellation::BeiDou,
        };
        Prn::new(constellation, id, flag)
    }

    fn take_clock_orbit(&mut self, msg: &ClockOrbit, time: Epoch) {
        // I/NAV clock is the reference for Galileo SSR corrections
        let flag = if msg.system == System::Gal { 1 } else { 0 };

        for sat in msg.sats.iter() {
            let prn = Self::prn(msg.system, sat.id, flag);

            if matches!(msg.kind, CoKind::Orbit | CoKind::Combined) {
                let corr = OrbCorr {
                    prn,
                    iod: sat.iod,
                    sta_id: self.sta_id.clone(),
                    time,
                    update_int: msg.update_interval,
                    xr: Vector3::new(sat.delta[0], sat.delta[1], sat.delta[2]),
                    dot_xr: Vector3::new(
                        sat.dot_delta[0],
                        sat.dot_delta[1],
                        sat.dot_delta[2],
                    ),
                };
                self.orb_buffer.entry(time).or_default().push(corr);
                self.iods.insert(prn, sat.iod);
            }

            if matches!(msg.kind, CoKind::Clock | CoKind::Combined) {
                let mut corr = ClkCorr {
                    prn,
                    iod: 0,
                    sta_id: self.sta_id.clone(),
                    time,
                    update_int: msg.update_interval,
                    d_clk: sat.clock[0] / Constants::C,
                    dot_d_clk: sat.clock[1] / Constants::C,
                    dot_dot_d_clk: sat.clock[2] / Constants::C,
                };
                self.last_clk.insert(prn, corr.clone());
                // a clock is only usable once an orbit issue is known
                if let Some(iod) = self.iods.get(&prn) {
                    corr.iod = *iod;
                    self.clk_buffer.entry(time).or_default().push(corr);
                }
            }

            if msg.kind == CoKind::HighRate {
                if let Some(last) = self.last_clk.get(&prn) {
                    let mut corr = last.clone();
                    corr.time = time;
                    corr.update_int = msg.update_interval;
                    corr.d_clk += sat.hr_clock / Constants::C;
                    if let Some(iod) = self.iods.get(&prn) {
                        corr.iod = *iod;
                        self.clk_buffer.entry(time).or_default().push(corr);
                    }
                }
            }
        }
    }

    fn take_code_bias(&mut self, msg: &CodeBias, time: Epoch) {
        for sat in msg.sats.iter() {
            let prn = Self::prn(msg.system, sat.id, 0);
            let mut record = SatCodeBias {
                prn,
                sta_id: self.sta_id.clone(),
                time,
                update_int: msg.update_interval,
                biases: Vec::with_capacity(sat.biases.len()),
            };
            for (code_type, value) in sat.biases.iter() {
                if let Some(rnx_type) = code_type_to_rnx(msg.system, *code_type) {
                    record.biases.push(FrqCodeBias {
                        rnx_type: rnx_type.to_string(),
                        value: *value,
                    });
                }
            }
            self.code_buffer.entry(time).or_default().push(record);
        }
    }

    fn take_phase_bias(&mut self, msg: &PhaseBias, time: Epoch) {
        for sat in msg.sats.iter() {
            let prn = Self::prn(msg.system, sat.id, 0);
            let mut record = SatPhaseBias {
                prn,
                sta_id: self.sta_id.clone(),
                time,
                update_int: msg.update_interval,
                disp_bias_consistency: msg.dispersive_consistency as u8,
                mw_consistency: msg.mw_consistency as u8,
                yaw: sat.yaw,
                yaw_rate: sat.yaw_rate,
                biases: Vec::with_capacity(sat.biases.len()),
            };
            for entry in sat.biases.iter() {
                if let Some(rnx_type) = code_type_to_rnx(msg.system, entry.code_type) {
                    record.biases.push(FrqPhaseBias {
                        rnx_type: rnx_type.to_string(),
                        value: entry.bias,
                        fix_indicator: entry.integer_indicator as u8,
                        fix_wide_lane_indicator: entry.wide_lane_indicator,
                        jump_counter: entry.discontinuity_counter as u16,
                    });
                }
            }
            self.phase_buffer.entry(time).or_default().push(record);
        }
    }

    fn take_vtec(&mut self, msg: &Vtec, time: Epoch) {
        if msg.layers.is_empty() {
            return;
        }
        let record = VTec {
            sta_id: self.sta_id.clone(),
            time,
            update_int: msg.update_interval,
            layers: msg
                .layers
                .iter()
                .map(|layer| VTecLayer {
                    height: layer.height,
                    c: layer.cos.clone(),
                    s: layer.sin.clone(),
                })
                .collect(),
        };
        self.vtec_buffer.insert(time, record);
    }

    /*
     * Emits every buffered epoch strictly older than the newest decoded
     * one. Later or equal epochs wait for the next message.
     */
    fn flush(&mut self, last_time: Epoch, events: &mut Vec<SsrEvent>) {
        let orb_keys: Vec<Epoch> = self
            .orb_buffer
            .range(..last_time)
            .map(|(key, _)| *key)
            .collect();
        for key in orb_keys {
            if let Some(list) = self.orb_buffer.remove(&key) {
                events.push(SsrEvent::OrbCorrections(list));
            }
        }
        let clk_keys: Vec<Epoch> = self
            .clk_buffer
            .range(..last_time)
            .map(|(key, _)| *key)
            .collect();
        for key in clk_keys {
            if let Some(list) = self.clk_buffer.remove(&key) {
                events.push(SsrEvent::ClkCorrections(list));
            }
        }
        let code_keys: Vec<Epoch> = self
            .code_buffer
            .range(..last_time)
            .map(|(key, _)| *key)
            .collect();
        for key in code_keys {
            if let Some(list) = self.code_buffer.remove(&key) {
                events.push(SsrEvent::CodeBiases(list));
            }
        }
        let phase_keys: Vec<Epoch> = self
            .phase_buffer
            .range(..last_time)
            .map(|(key, _)| *key)
            .collect();
        for key in phase_keys {
            if let Some(list) = self.phase_buffer.remove(&key) {
                events.push(SsrEvent::PhaseBiases(list));
            }
        }
        let vtec_keys: Vec<Epoch> = self
            .vtec_buffer
            .range(..last_time)
            .map(|(key, _)| *key)
            .collect();
        for key in vtec_keys {
            if let Some(record) = self.vtec_buffer.remove(&key) {
                events.push(SsrEvent::VTec(record));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::msg::CoSat;

    fn now() -> Epoch {
        epoch::from_gps_week_sec(2220, 345610.0)
    }

    fn combined(epoch_time: u32, iod: u32, provider: u16) -> Vec<u8> {
        SsrMessage::ClockOrbit(ClockOrbit {
            system: System::Gps,
            kind: CoKind::Combined,
            epoch_time,
            update_interval: 0,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 1,
            provider_id: provider,
            solution_id: 1,
            sats: vec![CoSat {
                id: 5,
                iod,
                delta: [0.5, -1.2, 0.07],
                dot_delta: [0.0, 0.0, 0.0],
                clock: [1.2, 0.0, 0.0],
                hr_clock: 0.0,
            }],
        })
        .to_frame()
    }

    #[test]
    fn epochs_flush_in_order() {
        let mut decoder = SsrDecoder::new("TEST");
        let events = decoder.feed(&combined(345600, 44, 258), now());
        // nothing older buffered yet
        assert!(events.is_empty());
        let events = decoder.feed(&combined(345605, 44, 258), now());
        // first epoch flushed once a later one arrived
        let orbs: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, SsrEvent::OrbCorrections(_)))
            .collect();
        assert_eq!(orbs.len(), 1);
        match &events[0] {
            SsrEvent::OrbCorrections(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].iod, 44);
                assert_eq!(list[0].prn.to_string(), "G05");
                assert!((list[0].xr[0] - 0.5).abs() < 1.0e-3);
            },
            other => panic!("unexpected event {:?}", other),
        }
        // the matching clock was anchored to the orbit issue
        assert!(events.iter().any(|event| match event {
            SsrEvent::ClkCorrections(list) => list[0].iod == 44,
            _ => false,
        }));
    }

    #[test]
    fn partial_frame_resumes() {
        let mut decoder = SsrDecoder::new("TEST");
        let frame_bytes = combined(345600, 44, 258);
        let (head, tail) = frame_bytes.split_at(7);
        assert!(decoder.feed(head, now()).is_empty());
        assert!(decoder.feed(tail, now()).is_empty());
        // the message was consumed: a later epoch flushes it
        let events = decoder.feed(&combined(345605, 44, 258), now());
        assert!(events
            .iter()
            .any(|event| matches!(event, SsrEvent::OrbCorrections(_))));
    }

    #[test]
    fn garbage_is_skipped() {
        let mut decoder = SsrDecoder::new("TEST");
        let mut stream = vec![0x00, 0xFF, 0x7E];
        stream.extend_from_slice(&combined(345600, 44, 258));
        stream.extend_from_slice(&combined(345605, 44, 258));
        let events = decoder.feed(&stream, now());
        assert!(events
            .iter()
            .any(|event| matches!(event, SsrEvent::OrbCorrections(_))));
    }

    #[test]
    fn false_preamble_recovers_with_more_data() {
        // a stray preamble byte claims a long frame; once enough bytes
        // arrive the checksum fails and the scan resynchronizes
        let mut decoder = SsrDecoder::new("TEST");
        let mut stream = vec![0xD3, 0x00, 0x08];
        stream.extend_from_slice(&combined(345600, 44, 258));
        assert!(decoder.feed(&stream, now()).is_empty());
        let events = decoder.feed(&combined(345605, 44, 258), now());
        assert!(events
            .iter()
            .any(|event| matches!(event, SsrEvent::OrbCorrections(_))));
    }

    #[test]
    fn provider_change_event() {
        let mut decoder = SsrDecoder::new("TEST");
        decoder.feed(&combined(345600, 44, 258), now());
        let events = decoder.feed(&combined(345605, 44, 259), now());
        assert!(events
            .iter()
            .any(|event| matches!(event, SsrEvent::ProviderChanged)));
    }

    #[test]
    fn clock_without_orbit_is_held() {
        let mut decoder = SsrDecoder::new("TEST");
        let clock_only = SsrMessage::ClockOrbit(ClockOrbit {
            system: System::Gps,
            kind: CoKind::Clock,
            epoch_time: 345600,
            update_interval: 0,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            sats: vec![CoSat {
                id: 5,
                clock: [1.2, 0.0, 0.0],
                ..Default::default()
            }],
        })
        .to_frame();
        decoder.feed(&clock_only, now());
        let events = decoder.feed(&combined(345605, 44, 258), now());
        // the early clock had no orbit issue to anchor to, nothing leaves
        assert!(!events
            .iter()
            .any(|event| matches!(event, SsrEvent::ClkCorrections(_))));
    }

    #[test]
    fn glonass_epoch_reconstruction() {
        let mut decoder = SsrDecoder::new("TEST");
        let t_now = now();
        // GLONASS day seconds of the current epoch
        let (y, m, d, _, _, _) = epoch::civil(t_now);
        let leap = epoch::gps_leap_seconds(y, m, d) as f64;
        let gps_sow = 345600.0;
        let glo_daysec =
            (gps_sow - leap + 3.0 * 3600.0).rem_euclid(86400.0) as u32;
        let msg = SsrMessage::ClockOrbit(ClockOrbit {
            system: System::Glo,
            kind: CoKind::Combined,
            epoch_time: glo_daysec,
            update_interval: 0,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            sats: vec![CoSat {
                id: 3,
                iod: 30,
                ..Default::default()
            }],
        })
        .to_frame();
        decoder.feed(&msg, t_now);
        // flush with a later GPS epoch
        let events = decoder.feed(&combined(345605, 44, 258), t_now);
        let orb = events
            .iter()
            .find_map(|event| match event {
                SsrEvent::OrbCorrections(list)
                    if list[0].prn.system() == 'R' =>
                {
                    Some(list[0].clone())
                },
                _ => None,
            })
            .expect("glonass orbit emitted");
        let (_, sow) = epoch::gps_week_sec(orb.time);
        assert!((sow - gps_sow).abs() < 1.0e-6, "sow = {}", sow);
    }
}
