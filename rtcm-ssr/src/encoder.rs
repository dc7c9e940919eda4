//! SSR message emission into a framed output buffer
use crate::msg::SsrMessage;

/// Accumulates encoded SSR frames for one outgoing stream. The caller
/// decides message order and sampling; the encoder only concatenates
/// transport frames.
#[derive(Default)]
pub struct SsrEncoder {
    buffer: Vec<u8>,
}

impl SsrEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message as a transport frame
    pub fn push(&mut self, message: &SsrMessage) {
        self.buffer.extend_from_slice(&message.to_frame());
    }

    /// Bytes queued so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Takes the queued bytes, leaving the encoder empty
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decoder::{SsrDecoder, SsrEvent};
    use crate::msg::{ClockOrbit, CoKind, CoSat, System};
    use gnss_rnx::epoch;

    #[test]
    fn encode_decode_pipeline() {
        let mut encoder = SsrEncoder::new();
        for (sec, iod) in [(345600u32, 44u32), (345605, 44)] {
            encoder.push(&SsrMessage::ClockOrbit(ClockOrbit {
                system: System::Gps,
                kind: CoKind::Combined,
                epoch_time: sec,
                update_interval: 0,
                multiple_message: false,
                sat_ref_datum: false,
                ssr_iod: 1,
                provider_id: 258,
                solution_id: 1,
                sats: vec![CoSat {
                    id: 5,
                    iod,
                    delta: [0.25, 0.0, 0.0],
                    clock: [0.75, 0.0, 0.0],
                    ..Default::default()
                }],
            }));
        }
        let bytes = encoder.take();
        assert!(encoder.is_empty());

        let mut decoder = SsrDecoder::new("LOOP");
        let now = epoch::from_gps_week_sec(2220, 345610.0);
        let events = decoder.feed(&bytes, now);
        let orb = events
            .iter()
            .find_map(|event| match event {
                SsrEvent::OrbCorrections(list) => Some(&list[0]),
                _ => None,
            })
            .expect("orbit correction");
        assert!((orb.xr[0] - 0.25).abs() <= 1.0e-4);
        let clk = events
            .iter()
            .find_map(|event| match event {
                SsrEvent::ClkCorrections(list) => Some(&list[0]),
                _ => None,
            })
            .expect("clock correction");
        assert!(
            (clk.d_clk * gnss_rnx::constants::Constants::C - 0.75).abs() <= 1.0e-4
        );
        assert_eq!(clk.iod, 44);
    }
}
