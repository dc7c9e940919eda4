//! SSR message model and payload codec
use crate::bits::{BitReader, BitWriter};
use crate::Error;
use nalgebra::DMatrix;

/*
 * Field scales in SI units.
 */
const SCALE_RADIAL: f64 = 1.0e-4; // 0.1 mm
const SCALE_TRACK: f64 = 4.0e-4; // 0.4 mm
const SCALE_DOT_RADIAL: f64 = 1.0e-6; // 0.001 mm/s
const SCALE_DOT_TRACK: f64 = 4.0e-6; // 0.004 mm/s
const SCALE_C0: f64 = 1.0e-4;
const SCALE_C1: f64 = 1.0e-6;
const SCALE_C2: f64 = 2.0e-8; // 0.00002 mm/s^2
const SCALE_CODE_BIAS: f64 = 0.01;
const SCALE_PHASE_BIAS: f64 = 0.0001;
const SCALE_YAW: f64 = std::f64::consts::PI / 256.0;
const SCALE_YAW_RATE: f64 = std::f64::consts::PI / 8192.0;
const SCALE_VTEC_COEFF: f64 = 0.005;
const SCALE_VTEC_QUALITY: f64 = 0.05;
const SCALE_VTEC_HEIGHT: f64 = 10000.0;

/// VTEC message number
pub const MSG_VTEC: u16 = 1264;

/// Constellation addressed by an SSR message
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum System {
    Gps,
    Glo,
    Gal,
    Qzss,
    Sbas,
    Bds,
}

impl System {
    /// Fixed decoding order: the epoch time of an SSR group is taken
    /// from the first present constellation.
    pub const ALL: [System; 6] = [
        System::Gps,
        System::Glo,
        System::Gal,
        System::Qzss,
        System::Sbas,
        System::Bds,
    ];

    pub fn char(&self) -> char {
        match self {
            System::Gps => 'G',
            System::Glo => 'R',
            System::Gal => 'E',
            System::Qzss => 'J',
            System::Sbas => 'S',
            System::Bds => 'C',
        }
    }

    pub fn from_char(sys: char) -> Option<Self> {
        match sys {
            'G' => Some(System::Gps),
            'R' => Some(System::Glo),
            'E' => Some(System::Gal),
            'J' => Some(System::Qzss),
            'S' => Some(System::Sbas),
            'C' => Some(System::Bds),
            _ => None,
        }
    }

    /// Width of the epoch time field: second of day for GLONASS,
    /// second of week otherwise
    fn epoch_bits(&self) -> u32 {
        match self {
            System::Glo => 17,
            _ => 20,
        }
    }

    fn sat_id_bits(&self) -> u32 {
        match self {
            System::Glo => 5,
            System::Qzss => 4,
            _ => 6,
        }
    }

    fn iod_bits(&self) -> u32 {
        match self {
            System::Gal => 10,
            System::Sbas => 9,
            System::Bds => 10,
            _ => 8,
        }
    }

    /*
     * Message number bases: 1057.. for GPS, 1063.. for GLONASS, the
     * extension blocks from 1240 for the remaining constellations.
     */
    fn co_base(&self) -> u16 {
        match self {
            System::Gps => 1057,
            System::Glo => 1063,
            System::Gal => 1240,
            System::Qzss => 1246,
            System::Sbas => 1252,
            System::Bds => 1258,
        }
    }

    fn phase_bias_type(&self) -> u16 {
        match self {
            System::Gps => 1265,
            System::Glo => 1266,
            System::Gal => 1267,
            System::Qzss => 1268,
            System::Sbas => 1269,
            System::Bds => 1270,
        }
    }
}

/// Clock/orbit message flavour
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoKind {
    Orbit,
    Clock,
    Combined,
    HighRate,
}

/*
 * Offsets of the flavours within a constellation block. The GPS and
 * GLONASS blocks interleave the code bias message; the extension blocks
 * do the same, which keeps a single offset table valid for all.
 */
fn co_message_number(system: System, kind: CoKind) -> u16 {
    let base = system.co_base();
    match kind {
        CoKind::Orbit => base,
        CoKind::Clock => base + 1,
        CoKind::Combined => base + 3,
        CoKind::HighRate => base + 5,
    }
}

fn code_bias_message_number(system: System) -> u16 {
    system.co_base() + 2
}

fn parse_message_number(number: u16) -> Option<(System, MsgKind)> {
    for system in System::ALL {
        let base = system.co_base();
        if number == base {
            return Some((system, MsgKind::Co(CoKind::Orbit)));
        }
        if number == base + 1 {
            return Some((system, MsgKind::Co(CoKind::Clock)));
        }
        if number == base + 2 {
            return Some((system, MsgKind::CodeBias));
        }
        if number == base + 3 {
            return Some((system, MsgKind::Co(CoKind::Combined)));
        }
        if number == base + 5 {
            return Some((system, MsgKind::Co(CoKind::HighRate)));
        }
        if number == system.phase_bias_type() {
            return Some((system, MsgKind::PhaseBias));
        }
    }
    if number == MSG_VTEC {
        return Some((System::Gps, MsgKind::Vtec));
    }
    None
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MsgKind {
    Co(CoKind),
    CodeBias,
    PhaseBias,
    Vtec,
}

/// Per satellite content of a clock/orbit message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoSat {
    pub id: u8,
    pub iod: u32,
    /// radial / along / cross offset [m]
    pub delta: [f64; 3],
    /// radial / along / cross rate [m/s]
    pub dot_delta: [f64; 3],
    /// clock polynomial c0 [m], c1 [m/s], c2 [m/s²]
    pub clock: [f64; 3],
    /// high rate clock [m]
    pub hr_clock: f64,
}

/// Orbit / clock / combined / high rate clock message
#[derive(Debug, Clone, PartialEq)]
pub struct ClockOrbit {
    pub system: System,
    pub kind: CoKind,
    /// second of week (second of day for GLONASS)
    pub epoch_time: u32,
    pub update_interval: u8,
    pub multiple_message: bool,
    pub sat_ref_datum: bool,
    pub ssr_iod: u8,
    pub provider_id: u16,
    pub solution_id: u8,
    pub sats: Vec<CoSat>,
}

impl ClockOrbit {
    fn encode(&self, writer: &mut BitWriter) {
        let sys = self.system;
        writer.u(12, co_message_number(sys, self.kind) as u64);
        writer.u(sys.epoch_bits(), self.epoch_time as u64);
        writer.u(4, self.update_interval as u64);
        writer.u(1, self.multiple_message as u64);
        if matches!(self.kind, CoKind::Orbit | CoKind::Combined) {
            writer.u(1, self.sat_ref_datum as u64);
        }
        writer.u(4, self.ssr_iod as u64);
        writer.u(16, self.provider_id as u64);
        writer.u(4, self.solution_id as u64);
        writer.u(6, self.sats.len() as u64);
        for sat in self.sats.iter() {
            writer.u(sys.sat_id_bits(), sat.id as u64);
            match self.kind {
                CoKind::Orbit | CoKind::Combined => {
                    writer.u(sys.iod_bits(), sat.iod as u64);
                    writer.scaled(22, sat.delta[0], SCALE_RADIAL);
                    writer.scaled(20, sat.delta[1], SCALE_TRACK);
                    writer.scaled(20, sat.delta[2], SCALE_TRACK);
                    writer.scaled(21, sat.dot_delta[0], SCALE_DOT_RADIAL);
                    writer.scaled(19, sat.dot_delta[1], SCALE_DOT_TRACK);
                    writer.scaled(19, sat.dot_delta[2], SCALE_DOT_TRACK);
                    if self.kind == CoKind::Combined {
                        writer.scaled(22, sat.clock[0], SCALE_C0);
                        writer.scaled(21, sat.clock[1], SCALE_C1);
                        writer.scaled(27, sat.clock[2], SCALE_C2);
                    }
                },
                CoKind::Clock => {
                    writer.scaled(22, sat.clock[0], SCALE_C0);
                    writer.scaled(21, sat.clock[1], SCALE_C1);
                    writer.scaled(27, sat.clock[2], SCALE_C2);
                },
                CoKind::HighRate => {
                    writer.scaled(22, sat.hr_clock, SCALE_C0);
                },
            }
        }
    }

    fn decode(
        system: System,
        kind: CoKind,
        reader: &mut BitReader,
    ) -> Result<Self, Error> {
        let epoch_time = reader.u(system.epoch_bits())? as u32;
        let update_interval = reader.u(4)? as u8;
        let multiple_message = reader.u(1)? != 0;
        let sat_ref_datum = if matches!(kind, CoKind::Orbit | CoKind::Combined) {
            reader.u(1)? != 0
        } else {
            false
        };
        let ssr_iod = reader.u(4)? as u8;
        let provider_id = reader.u(16)? as u16;
        let solution_id = reader.u(4)? as u8;
        let num_sats = reader.u(6)? as usize;
        let mut sats = Vec::with_capacity(num_sats);
        for _ in 0..num_sats {
            let mut sat = CoSat {
                id: reader.u(system.sat_id_bits())? as u8,
                ..Default::default()
            };
            match kind {
                CoKind::Orbit | CoKind::Combined => {
                    sat.iod = reader.u(system.iod_bits())? as u32;
                    sat.delta[0] = reader.scaled(22, SCALE_RADIAL)?;
                    sat.delta[1] = reader.scaled(20, SCALE_TRACK)?;
                    sat.delta[2] = reader.scaled(20, SCALE_TRACK)?;
                    sat.dot_delta[0] = reader.scaled(21, SCALE_DOT_RADIAL)?;
                    sat.dot_delta[1] = reader.scaled(19, SCALE_DOT_TRACK)?;
                    sat.dot_delta[2] = reader.scaled(19, SCALE_DOT_TRACK)?;
                    if kind == CoKind::Combined {
                        sat.clock[0] = reader.scaled(22, SCALE_C0)?;
                        sat.clock[1] = reader.scaled(21, SCALE_C1)?;
                        sat.clock[2] = reader.scaled(27, SCALE_C2)?;
                    }
                },
                CoKind::Clock => {
                    sat.clock[0] = reader.scaled(22, SCALE_C0)?;
                    sat.clock[1] = reader.scaled(21, SCALE_C1)?;
                    sat.clock[2] = reader.scaled(27, SCALE_C2)?;
                },
                CoKind::HighRate => {
                    sat.hr_clock = reader.scaled(22, SCALE_C0)?;
                },
            }
            sats.push(sat);
        }
        Ok(Self {
            system,
            kind,
            epoch_time,
            update_interval,
            multiple_message,
            sat_ref_datum,
            ssr_iod,
            provider_id,
            solution_id,
            sats,
        })
    }
}

/// Per satellite code biases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeBiasSat {
    pub id: u8,
    /// (code type indicator, bias [m])
    pub biases: Vec<(u8, f64)>,
}

/// Code bias message
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBias {
    pub system: System,
    pub epoch_time: u32,
    pub update_interval: u8,
    pub multiple_message: bool,
    pub ssr_iod: u8,
    pub provider_id: u16,
    pub solution_id: u8,
    pub sats: Vec<CodeBiasSat>,
}

impl CodeBias {
    fn encode(&self, writer: &mut BitWriter) {
        let sys = self.system;
        writer.u(12, code_bias_message_number(sys) as u64);
        writer.u(sys.epoch_bits(), self.epoch_time as u64);
        writer.u(4, self.update_interval as u64);
        writer.u(1, self.multiple_message as u64);
        writer.u(4, self.ssr_iod as u64);
        writer.u(16, self.provider_id as u64);
        writer.u(4, self.solution_id as u64);
        writer.u(6, self.sats.len() as u64);
        for sat in self.sats.iter() {
            writer.u(sys.sat_id_bits(), sat.id as u64);
            writer.u(5, sat.biases.len() as u64);
            for (code_type, bias) in sat.biases.iter() {
                writer.u(5, *code_type as u64);
                writer.scaled(14, *bias, SCALE_CODE_BIAS);
            }
        }
    }

    fn decode(system: System, reader: &mut BitReader) -> Result<Self, Error> {
        let epoch_time = reader.u(system.epoch_bits())? as u32;
        let update_interval = reader.u(4)? as u8;
        let multiple_message = reader.u(1)? != 0;
        let ssr_iod = reader.u(4)? as u8;
        let provider_id = reader.u(16)? as u16;
        let solution_id = reader.u(4)? as u8;
        let num_sats = reader.u(6)? as usize;
        let mut sats = Vec::with_capacity(num_sats);
        for _ in 0..num_sats {
            let id = reader.u(system.sat_id_bits())? as u8;
            let num_biases = reader.u(5)? as usize;
            let mut biases = Vec::with_capacity(num_biases);
            for _ in 0..num_biases {
                let code_type = reader.u(5)? as u8;
                let bias = reader.scaled(14, SCALE_CODE_BIAS)?;
                biases.push((code_type, bias));
            }
            sats.push(CodeBiasSat { id, biases });
        }
        Ok(Self {
            system,
            epoch_time,
            update_interval,
            multiple_message,
            ssr_iod,
            provider_id,
            solution_id,
            sats,
        })
    }
}

/// One phase bias entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseBiasEntry {
    pub code_type: u8,
    pub integer_indicator: bool,
    pub wide_lane_indicator: u8,
    pub discontinuity_counter: u8,
    /// bias [m]
    pub bias: f64,
}

/// Per satellite phase biases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseBiasSat {
    pub id: u8,
    /// yaw angle [rad], [0, 2π)
    pub yaw: f64,
    /// yaw rate [rad/s]
    pub yaw_rate: f64,
    pub biases: Vec<PhaseBiasEntry>,
}

/// Phase bias message
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseBias {
    pub system: System,
    pub epoch_time: u32,
    pub update_interval: u8,
    pub multiple_message: bool,
    pub ssr_iod: u8,
    pub provider_id: u16,
    pub solution_id: u8,
    pub dispersive_consistency: bool,
    pub mw_consistency: bool,
    pub sats: Vec<PhaseBiasSat>,
}

impl PhaseBias {
    fn encode(&self, writer: &mut BitWriter) {
        let sys = self.system;
        writer.u(12, sys.phase_bias_type() as u64);
        writer.u(sys.epoch_bits(), self.epoch_time as u64);
        writer.u(4, self.update_interval as u64);
        writer.u(1, self.multiple_message as u64);
        writer.u(4, self.ssr_iod as u64);
        writer.u(16, self.provider_id as u64);
        writer.u(4, self.solution_id as u64);
        writer.u(1, self.dispersive_consistency as u64);
        writer.u(1, self.mw_consistency as u64);
        writer.u(6, self.sats.len() as u64);
        for sat in self.sats.iter() {
            writer.u(sys.sat_id_bits(), sat.id as u64);
            writer.scaled_u(9, sat.yaw, SCALE_YAW);
            writer.scaled(8, sat.yaw_rate, SCALE_YAW_RATE);
            writer.u(5, sat.biases.len() as u64);
            for entry in sat.biases.iter() {
                writer.u(5, entry.code_type as u64);
                writer.u(1, entry.integer_indicator as u64);
                writer.u(2, entry.wide_lane_indicator as u64);
                writer.u(4, entry.discontinuity_counter as u64);
                writer.scaled(20, entry.bias, SCALE_PHASE_BIAS);
            }
        }
    }

    fn decode(system: System, reader: &mut BitReader) -> Result<Self, Error> {
        let epoch_time = reader.u(system.epoch_bits())? as u32;
        let update_interval = reader.u(4)? as u8;
        let multiple_message = reader.u(1)? != 0;
        let ssr_iod = reader.u(4)? as u8;
        let provider_id = reader.u(16)? as u16;
        let solution_id = reader.u(4)? as u8;
        let dispersive_consistency = reader.u(1)? != 0;
        let mw_consistency = reader.u(1)? != 0;
        let num_sats = reader.u(6)? as usize;
        let mut sats = Vec::with_capacity(num_sats);
        for _ in 0..num_sats {
            let id = reader.u(system.sat_id_bits())? as u8;
            let yaw = reader.scaled_u(9, SCALE_YAW)?;
            let yaw_rate = reader.scaled(8, SCALE_YAW_RATE)?;
            let num_biases = reader.u(5)? as usize;
            let mut biases = Vec::with_capacity(num_biases);
            for _ in 0..num_biases {
                biases.push(PhaseBiasEntry {
                    code_type: reader.u(5)? as u8,
                    integer_indicator: reader.u(1)? != 0,
                    wide_lane_indicator: reader.u(2)? as u8,
                    discontinuity_counter: reader.u(4)? as u8,
                    bias: reader.scaled(20, SCALE_PHASE_BIAS)?,
                });
            }
            sats.push(PhaseBiasSat {
                id,
                yaw,
                yaw_rate,
                biases,
            });
        }
        Ok(Self {
            system,
            epoch_time,
            update_interval,
            multiple_message,
            ssr_iod,
            provider_id,
            solution_id,
            dispersive_consistency,
            mw_consistency,
            sats,
        })
    }
}

/// One ionospheric layer of the VTEC message, spherical harmonic
/// coefficients as (degree+1) x (order+1) matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct VtecLayer {
    /// layer height [m]
    pub height: f64,
    pub cos: DMatrix<f64>,
    pub sin: DMatrix<f64>,
}

/// VTEC spherical harmonics message
#[derive(Debug, Clone, PartialEq)]
pub struct Vtec {
    /// second of GPS week
    pub epoch_time: u32,
    pub update_interval: u8,
    pub multiple_message: bool,
    pub ssr_iod: u8,
    pub provider_id: u16,
    pub solution_id: u8,
    /// quality indicator [TECU]
    pub quality: f64,
    pub layers: Vec<VtecLayer>,
}

impl Vtec {
    fn encode(&self, writer: &mut BitWriter) {
        writer.u(12, MSG_VTEC as u64);
        writer.u(20, self.epoch_time as u64);
        writer.u(4, self.update_interval as u64);
        writer.u(1, self.multiple_message as u64);
        writer.u(4, self.ssr_iod as u64);
        writer.u(16, self.provider_id as u64);
        writer.u(4, self.solution_id as u64);
        writer.scaled_u(9, self.quality, SCALE_VTEC_QUALITY);
        writer.u(2, (self.layers.len() as u64).saturating_sub(1));
        for layer in self.layers.iter() {
            let degree = layer.cos.nrows() - 1;
            let order = layer.cos.ncols() - 1;
            writer.scaled_u(8, layer.height, SCALE_VTEC_HEIGHT);
            writer.u(4, (degree as u64).saturating_sub(1));
            writer.u(4, (order as u64).saturating_sub(1));
            // triangular coefficient sets, order limited by the degree
            for matrix in [&layer.cos, &layer.sin] {
                for n in 0..=degree {
                    for m in 0..=n.min(order) {
                        writer.scaled(16, matrix[(n, m)], SCALE_VTEC_COEFF);
                    }
                }
            }
        }
    }

    fn decode(reader: &mut BitReader) -> Result<Self, Error> {
        let epoch_time = reader.u(20)? as u32;
        let update_interval = reader.u(4)? as u8;
        let multiple_message = reader.u(1)? != 0;
        let ssr_iod = reader.u(4)? as u8;
        let provider_id = reader.u(16)? as u16;
        let solution_id = reader.u(4)? as u8;
        let quality = reader.scaled_u(9, SCALE_VTEC_QUALITY)?;
        let num_layers = reader.u(2)? as usize + 1;
        let mut layers = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            let height = reader.scaled_u(8, SCALE_VTEC_HEIGHT)?;
            let degree = reader.u(4)? as usize + 1;
            let order = reader.u(4)? as usize + 1;
            let mut cos = DMatrix::zeros(degree + 1, order + 1);
            let mut sin = DMatrix::zeros(degree + 1, order + 1);
            for matrix in [&mut cos, &mut sin] {
                for n in 0..=degree {
                    for m in 0..=n.min(order) {
                        matrix[(n, m)] = reader.scaled(16, SCALE_VTEC_COEFF)?;
                    }
                }
            }
            layers.push(VtecLayer { height, cos, sin });
        }
        Ok(Self {
            epoch_time,
            update_interval,
            multiple_message,
            ssr_iod,
            provider_id,
            solution_id,
            quality,
            layers,
        })
    }
}

/// Any decoded SSR message
#[derive(Debug, Clone, PartialEq)]
pub enum SsrMessage {
    ClockOrbit(ClockOrbit),
    CodeBias(CodeBias),
    PhaseBias(PhaseBias),
    Vtec(Vtec),
}

impl SsrMessage {
    /// Decodes one SSR payload
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut reader = BitReader::new(payload);
        let number = reader.u(12)? as u16;
        let (system, kind) =
            parse_message_number(number).ok_or(Error::UnknownMessage(number))?;
        match kind {
            MsgKind::Co(co_kind) => Ok(SsrMessage::ClockOrbit(ClockOrbit::decode(
                system,
                co_kind,
                &mut reader,
            )?)),
            MsgKind::CodeBias => Ok(SsrMessage::CodeBias(CodeBias::decode(
                system,
                &mut reader,
            )?)),
            MsgKind::PhaseBias => Ok(SsrMessage::PhaseBias(PhaseBias::decode(
                system,
                &mut reader,
            )?)),
            MsgKind::Vtec => Ok(SsrMessage::Vtec(Vtec::decode(&mut reader)?)),
        }
    }

    /// Encodes the payload (transport framing not included)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BitWriter::new();
        match self {
            SsrMessage::ClockOrbit(msg) => msg.encode(&mut writer),
            SsrMessage::CodeBias(msg) => msg.encode(&mut writer),
            SsrMessage::PhaseBias(msg) => msg.encode(&mut writer),
            SsrMessage::Vtec(msg) => msg.encode(&mut writer),
        }
        writer.into_bytes()
    }

    /// Encodes including the transport frame
    pub fn to_frame(&self) -> Vec<u8> {
        crate::frame::frame(&self.encode())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn combined() -> ClockOrbit {
        ClockOrbit {
            system: System::Gps,
            kind: CoKind::Combined,
            epoch_time: 345600,
            update_interval: 2,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            sats: vec![
                CoSat {
                    id: 5,
                    iod: 44,
                    delta: [0.5123, -1.2000, 0.0752],
                    dot_delta: [0.0001, -0.000224, 0.0],
                    clock: [1.2345, 0.0001, 0.0],
                    hr_clock: 0.0,
                },
                CoSat {
                    id: 17,
                    iod: 101,
                    delta: [-0.25, 0.6, -0.1],
                    dot_delta: [0.0, 0.0, 0.0],
                    clock: [-0.5, 0.0, 0.0],
                    hr_clock: 0.0,
                },
            ],
        }
    }

    #[test]
    fn combined_round_trip() {
        let msg = SsrMessage::ClockOrbit(combined());
        let payload = msg.encode();
        let parsed = SsrMessage::decode(&payload).unwrap();
        match (msg, parsed) {
            (SsrMessage::ClockOrbit(sent), SsrMessage::ClockOrbit(got)) => {
                assert_eq!(got.system, System::Gps);
                assert_eq!(got.kind, CoKind::Combined);
                assert_eq!(got.epoch_time, sent.epoch_time);
                assert_eq!(got.sats.len(), 2);
                // integers bit exact
                assert_eq!(got.sats[0].id, 5);
                assert_eq!(got.sats[0].iod, 44);
                // scaled fields within half an LSB
                for (sent_sat, got_sat) in sent.sats.iter().zip(got.sats.iter()) {
                    for ii in 0..3 {
                        assert!((sent_sat.delta[ii] - got_sat.delta[ii]).abs() <= 2.0e-4);
                        assert!(
                            (sent_sat.dot_delta[ii] - got_sat.dot_delta[ii]).abs() <= 2.0e-6
                        );
                        assert!((sent_sat.clock[ii] - got_sat.clock[ii]).abs() <= 1.0e-4);
                    }
                }
            },
            _ => panic!("variant mismatch"),
        }
    }

    #[test]
    fn glonass_epoch_field_width() {
        let msg = ClockOrbit {
            system: System::Glo,
            kind: CoKind::Clock,
            epoch_time: 86399,
            update_interval: 0,
            multiple_message: false,
            sat_ref_datum: false,
            ssr_iod: 0,
            provider_id: 0,
            solution_id: 0,
            sats: vec![CoSat {
                id: 12,
                clock: [0.1, 0.0, 0.0],
                ..Default::default()
            }],
        };
        let payload = SsrMessage::ClockOrbit(msg).encode();
        match SsrMessage::decode(&payload).unwrap() {
            SsrMessage::ClockOrbit(got) => {
                assert_eq!(got.system, System::Glo);
                assert_eq!(got.epoch_time, 86399);
                assert_eq!(got.sats[0].id, 12);
            },
            _ => panic!("variant mismatch"),
        }
    }

    #[test]
    fn code_bias_round_trip() {
        let msg = CodeBias {
            system: System::Gal,
            epoch_time: 100,
            update_interval: 2,
            multiple_message: false,
            ssr_iod: 0,
            provider_id: 42,
            solution_id: 3,
            sats: vec![CodeBiasSat {
                id: 3,
                biases: vec![(3, -1.23), (7, 4.56)],
            }],
        };
        let payload = SsrMessage::CodeBias(msg).encode();
        match SsrMessage::decode(&payload).unwrap() {
            SsrMessage::CodeBias(got) => {
                assert_eq!(got.system, System::Gal);
                assert_eq!(got.sats[0].biases.len(), 2);
                assert_eq!(got.sats[0].biases[0].0, 3);
                assert!((got.sats[0].biases[0].1 + 1.23).abs() <= 0.005);
                assert!((got.sats[0].biases[1].1 - 4.56).abs() <= 0.005);
            },
            _ => panic!("variant mismatch"),
        }
    }

    #[test]
    fn phase_bias_round_trip() {
        let msg = PhaseBias {
            system: System::Gps,
            epoch_time: 200,
            update_interval: 2,
            multiple_message: false,
            ssr_iod: 0,
            provider_id: 42,
            solution_id: 3,
            dispersive_consistency: true,
            mw_consistency: false,
            sats: vec![PhaseBiasSat {
                id: 7,
                yaw: 1.5,
                yaw_rate: -0.001,
                biases: vec![PhaseBiasEntry {
                    code_type: 11,
                    integer_indicator: true,
                    wide_lane_indicator: 2,
                    discontinuity_counter: 9,
                    bias: 0.0764,
                }],
            }],
        };
        let payload = SsrMessage::PhaseBias(msg).encode();
        match SsrMessage::decode(&payload).unwrap() {
            SsrMessage::PhaseBias(got) => {
                assert!(got.dispersive_consistency);
                assert!(!got.mw_consistency);
                let sat = &got.sats[0];
                assert!((sat.yaw - 1.5).abs() <= SCALE_YAW / 2.0);
                assert!((sat.yaw_rate + 0.001).abs() <= SCALE_YAW_RATE / 2.0);
                let entry = &sat.biases[0];
                assert_eq!(entry.code_type, 11);
                assert!(entry.integer_indicator);
                assert_eq!(entry.wide_lane_indicator, 2);
                assert_eq!(entry.discontinuity_counter, 9);
                assert!((entry.bias - 0.0764).abs() <= 0.00005);
            },
            _ => panic!("variant mismatch"),
        }
    }

    #[test]
    fn vtec_round_trip() {
        let mut cos = DMatrix::zeros(3, 3);
        cos[(0, 0)] = 22.5;
        cos[(2, 1)] = -4.32;
        let msg = Vtec {
            epoch_time: 3600,
            update_interval: 5,
            multiple_message: false,
            ssr_iod: 0,
            provider_id: 42,
            solution_id: 3,
            quality: 1.25,
            layers: vec![VtecLayer {
                height: 450000.0,
                cos,
                sin: DMatrix::zeros(3, 3),
            }],
        };
        let payload = SsrMessage::Vtec(msg).encode();
        match SsrMessage::decode(&payload).unwrap() {
            SsrMessage::Vtec(got) => {
                assert_eq!(got.layers.len(), 1);
                assert_eq!(got.layers[0].cos.nrows(), 3);
                assert!((got.layers[0].height - 450000.0).abs() < 1.0);
                assert!((got.layers[0].cos[(0, 0)] - 22.5).abs() <= 0.0025);
                assert!((got.layers[0].cos[(2, 1)] + 4.32).abs() <= 0.0025);
                assert!((got.quality - 1.25).abs() <= 0.025);
            },
            _ => panic!("variant mismatch"),
        }
    }

    #[test]
    fn unknown_message_number() {
        let mut writer = BitWriter::new();
        writer.u(12, 1005);
        writer.u(20, 0);
        let payload = writer.into_bytes();
        assert_eq!(
            SsrMessage::decode(&payload),
            Err(Error::UnknownMessage(1005))
        );
    }
}
