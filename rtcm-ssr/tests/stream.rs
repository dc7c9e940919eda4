//! Stream level tests: several SSR messages of different kinds mixed
//! with garbage, decoded in one pass.
use gnss_rnx::constants::Constants;
use gnss_rnx::epoch;
use rtcm_ssr::decoder::{SsrDecoder, SsrEvent};
use rtcm_ssr::msg::{
    ClockOrbit, CoKind, CoSat, CodeBias, CodeBiasSat, PhaseBias, PhaseBiasEntry, PhaseBiasSat,
    SsrMessage, System,
};

fn now() -> hifitime::Epoch {
    epoch::from_gps_week_sec(2220, 345620.0)
}

fn combined(epoch_time: u32, iod: u32) -> SsrMessage {
    SsrMessage::ClockOrbit(ClockOrbit {
        system: System::Gps,
        kind: CoKind::Combined,
        epoch_time,
        update_interval: 0,
        multiple_message: false,
        sat_ref_datum: false,
        ssr_iod: 1,
        provider_id: 258,
        solution_id: 1,
        sats: vec![CoSat {
            id: 7,
            iod,
            delta: [0.3, -0.6, 0.1],
            dot_delta: [0.0001, 0.0, 0.0],
            clock: [0.8, 0.0, 0.0],
            hr_clock: 0.0,
        }],
    })
}

#[test]
fn mixed_stream_in_epoch_order() {
    let mut stream: Vec<u8> = Vec::new();
    stream.extend_from_slice(&combined(345600, 44).to_frame());
    stream.extend_from_slice(&[0x42, 0x42]); // junk between frames
    stream.extend_from_slice(
        &SsrMessage::CodeBias(CodeBias {
            system: System::Gps,
            epoch_time: 345600,
            update_interval: 0,
            multiple_message: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            sats: vec![CodeBiasSat {
                id: 7,
                biases: vec![(0, 1.25), (11, -0.75)],
            }],
        })
        .to_frame(),
    );
    stream.extend_from_slice(
        &SsrMessage::PhaseBias(PhaseBias {
            system: System::Gps,
            epoch_time: 345600,
            update_interval: 0,
            multiple_message: false,
            ssr_iod: 1,
            provider_id: 258,
            solution_id: 1,
            dispersive_consistency: true,
            mw_consistency: true,
            sats: vec![PhaseBiasSat {
                id: 7,
                yaw: 0.25,
                yaw_rate: 0.0,
                biases: vec![PhaseBiasEntry {
                    code_type: 11,
                    integer_indicator: true,
                    wide_lane_indicator: 1,
                    discontinuity_counter: 3,
                    bias: 0.0421,
                }],
            }],
        })
        .to_frame(),
    );
    stream.extend_from_slice(&combined(345610, 44).to_frame());

    let mut decoder = SsrDecoder::new("MIX");
    let events = decoder.feed(&stream, now());

    let orb = events
        .iter()
        .find_map(|event| match event {
            SsrEvent::OrbCorrections(list) => Some(&list[0]),
            _ => None,
        })
        .expect("orbit batch");
    assert_eq!(orb.prn.to_string(), "G07");
    assert_eq!(orb.iod, 44);
    assert_eq!(epoch::gps_sec_of_week(orb.time), 345600.0);

    let clk = events
        .iter()
        .find_map(|event| match event {
            SsrEvent::ClkCorrections(list) => Some(&list[0]),
            _ => None,
        })
        .expect("clock batch");
    assert_eq!(clk.iod, 44);
    assert!((clk.d_clk * Constants::C - 0.8).abs() <= 1.0e-4);

    let code = events
        .iter()
        .find_map(|event| match event {
            SsrEvent::CodeBiases(list) => Some(&list[0]),
            _ => None,
        })
        .expect("code bias batch");
    assert_eq!(code.biases.len(), 2);
    assert_eq!(code.biases[0].rnx_type, "1C");
    assert_eq!(code.biases[1].rnx_type, "2W");

    let phase = events
        .iter()
        .find_map(|event| match event {
            SsrEvent::PhaseBiases(list) => Some(&list[0]),
            _ => None,
        })
        .expect("phase bias batch");
    assert_eq!(phase.biases[0].rnx_type, "2W");
    assert_eq!(phase.biases[0].jump_counter, 3);
    assert_eq!(phase.disp_bias_consistency, 1);

    // every batch of a kind is strictly ordered by epoch
    let mut last_orbit_epoch = None;
    for event in events.iter() {
        if let SsrEvent::OrbCorrections(list) = event {
            let sow = epoch::gps_sec_of_week(list[0].time);
            if let Some(last) = last_orbit_epoch {
                assert!(sow > last);
            }
            last_orbit_epoch = Some(sow);
        }
    }
}

#[test]
fn chunked_delivery_is_equivalent() {
    let mut stream: Vec<u8> = Vec::new();
    for (sec, iod) in [(345600u32, 44u32), (345605, 44), (345610, 44)] {
        stream.extend_from_slice(&combined(sec, iod).to_frame());
    }

    // one shot
    let mut decoder = SsrDecoder::new("ONE");
    let all_at_once: Vec<SsrEvent> = decoder.feed(&stream, now());

    // byte by byte
    let mut decoder = SsrDecoder::new("ONE");
    let mut dribbled = Vec::new();
    for byte in stream.iter() {
        dribbled.extend(decoder.feed(&[*byte], now()));
    }

    let orbit_epochs = |events: &[SsrEvent]| -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                SsrEvent::OrbCorrections(list) => {
                    Some(epoch::gps_sec_of_week(list[0].time))
                },
                _ => None,
            })
            .collect()
    };
    assert_eq!(orbit_epochs(&all_at_once), orbit_epochs(&dribbled));
    assert_eq!(orbit_epochs(&all_at_once), vec![345600.0, 345605.0]);
}
