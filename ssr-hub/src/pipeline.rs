//! Thread wiring: stream decoders feed the combination task through
//! bounded channels, the combination feeds the uploader, every task
//! carries its own configuration copy and honours the shared
//! cancellation flag.
use crate::combiner::{CmbMethod, Combiner, CombinedOutput};
use crate::config::Config;
use crate::latency::LatencyChecker;
use crate::uploader::{TrafoFrame, Uploader};
use gnss_rnx::corr::{ClkCorr, OrbCorr, SatCodeBias, SatPhaseBias, VTec};
use gnss_rnx::eph::Eph;
use gnss_rnx::epoch;
use hifitime::{Epoch, TimeScale};
use log::{debug, info, warn};
use rtcm_ssr::decoder::{SsrDecoder, SsrEvent};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const CHANNEL_DEPTH: usize = 256;
const POLL: Duration = Duration::from_millis(200);

/// Host clock on the GPS timescale
pub fn now_gps() -> Epoch {
    Epoch::now()
        .unwrap_or_else(|_| epoch::from_gps_week_sec(0, 0.0))
        .to_time_scale(TimeScale::GPST)
}

/// Records flowing between the tasks
pub enum PipelineEvent {
    OrbCorrections(String, Vec<OrbCorr>),
    ClkCorrections(String, Vec<ClkCorr>),
    CodeBiases(String, Vec<SatCodeBias>),
    PhaseBiases(String, Vec<SatPhaseBias>),
    VTec(String, VTec),
    ProviderChanged(String),
}

/// Running pipeline; dropping it cancels every task
pub struct Pipeline {
    cancel: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Wires and spawns the tasks.
    /// `inputs` are raw SSR byte streams per mountpoint, `ephs` is the
    /// broadcast ephemeris bootstrap, `rtcm_out` receives the encoded
    /// upload stream, `corr_out` the plain text correction dump.
    pub fn run(
        config: &Config,
        inputs: Vec<(String, Box<dyn Read + Send>)>,
        ephs: Vec<Eph>,
        rtcm_out: Box<dyn Write + Send>,
        corr_out: Option<Box<dyn Write + Send>>,
    ) -> Result<Self, crate::config::Error> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        let (event_tx, event_rx) = sync_channel::<PipelineEvent>(CHANNEL_DEPTH);
        let (rtnet_tx, rtnet_rx) = sync_channel::<String>(CHANNEL_DEPTH);

        // one decoder task per input stream
        for (mountpoint, reader) in inputs {
            let tx = event_tx.clone();
            let cancel_flag = cancel.clone();
            let misc_intr = config.misc_intr;
            let advise_fail = config.advise_fail;
            let advise_reco = config.advise_reco;
            let handle = std::thread::Builder::new()
                .name(format!("decoder-{}", mountpoint))
                .spawn(move || {
                    decoder_task(
                        mountpoint,
                        reader,
                        tx,
                        cancel_flag,
                        misc_intr,
                        advise_fail,
                        advise_reco,
                    )
                })
                .expect("spawning decoder task");
            handles.push(handle);
        }
        drop(event_tx);

        // combination task
        {
            let acs = config.cmb_acs()?;
            let method = if config.cmb_method == "Single-Epoch" {
                CmbMethod::SingleEpoch
            } else {
                CmbMethod::Filter
            };
            let mut combiner = Combiner::new(
                &acs,
                method,
                config.cmb_sampl,
                config.cmb_use_glonass,
                config.cmb_maxres,
                config.cmb_master_gap,
                None,
            );
            for eph in ephs.iter() {
                combiner.put_eph(eph.clone());
            }
            let cancel_flag = cancel.clone();
            let handle = std::thread::Builder::new()
                .name("combiner".to_string())
                .spawn(move || combiner_task(combiner, event_rx, rtnet_tx, corr_out, cancel_flag))
                .expect("spawning combiner task");
            handles.push(handle);
        }

        // uploader task
        {
            let trafo = TrafoFrame::by_name(&config.crd_trafo, &config.trafo);
            let mut uploader = Uploader::new(
                trafo,
                config.upload_com,
                config.ssr_provider_id,
                config.ssr_solution_id,
                config.ssr_iod,
                config.cmb_sampl as f64,
                config.upload_sampl_rtcm_eph_corr,
                config.upload_sampl_clk_rnx,
                config.upload_sampl_sp3,
            );
            let now = now_gps();
            for eph in ephs.iter() {
                uploader.put_eph(eph.clone(), now);
            }
            let cancel_flag = cancel.clone();
            let handle = std::thread::Builder::new()
                .name("uploader".to_string())
                .spawn(move || uploader_task(uploader, rtnet_rx, rtcm_out, cancel_flag))
                .expect("spawning uploader task");
            handles.push(handle);
        }

        Ok(Self { cancel, handles })
    }

    /// Cooperative shutdown: in flight records are dropped
    pub fn shutdown(self) {
        self.cancel.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }

    /// Blocks until every task finished on its own (end of streams)
    pub fn wait(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn decoder_task(
    mountpoint: String,
    mut reader: Box<dyn Read + Send>,
    tx: SyncSender<PipelineEvent>,
    cancel: Arc<AtomicBool>,
    misc_intr: u32,
    advise_fail: u32,
    advise_reco: u32,
) {
    let mut decoder = SsrDecoder::new(&mountpoint);
    let mut latency = LatencyChecker::new(
        &mountpoint,
        10,
        advise_fail,
        advise_reco,
        misc_intr,
        now_gps(),
    );
    let mut chunk = [0u8; 4096];

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let length = match reader.read(&mut chunk) {
            Ok(0) => break, // end of stream
            Ok(length) => length,
            Err(error) => {
                warn!("{}: read error {}", mountpoint, error);
                for event in latency.check_reconnect(now_gps()) {
                    info!("{}: {:?}", mountpoint, event);
                }
                break;
            },
        };
        let now = now_gps();
        let events = decoder.feed(&chunk[..length], now);
        for event in latency.check_outage(!events.is_empty(), now) {
            info!("{}: {:?}", mountpoint, event);
        }
        for event in events {
            let forwarded = match event {
                SsrEvent::OrbCorrections(list) => {
                    PipelineEvent::OrbCorrections(mountpoint.clone(), list)
                },
                SsrEvent::ClkCorrections(list) => {
                    if let Some(first) = list.first() {
                        let sow = epoch::gps_sec_of_week(first.time) as i64;
                        if let Some(report) = latency.check_corr_latency(sow, now) {
                            info!("{}: {:?}", mountpoint, report);
                        }
                    }
                    PipelineEvent::ClkCorrections(mountpoint.clone(), list)
                },
                SsrEvent::CodeBiases(list) => {
                    PipelineEvent::CodeBiases(mountpoint.clone(), list)
                },
                SsrEvent::PhaseBiases(list) => {
                    PipelineEvent::PhaseBiases(mountpoint.clone(), list)
                },
                SsrEvent::VTec(record) => PipelineEvent::VTec(mountpoint.clone(), record),
                SsrEvent::ProviderChanged => {
                    PipelineEvent::ProviderChanged(mountpoint.clone())
                },
            };
            if tx.send(forwarded).is_err() {
                return; // downstream gone
            }
        }
    }
    debug!("{}: decoder task done", mountpoint);
}

fn combiner_task(
    mut combiner: Combiner,
    rx: Receiver<PipelineEvent>,
    rtnet_tx: SyncSender<String>,
    mut corr_out: Option<Box<dyn Write + Send>>,
    cancel: Arc<AtomicBool>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let event = match rx.recv_timeout(POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let outputs: Vec<CombinedOutput> = match event {
            PipelineEvent::OrbCorrections(_, list) => {
                combiner.add_orb_corrections(&list);
                Vec::new()
            },
            PipelineEvent::ClkCorrections(_, list) => combiner.add_clk_corrections(&list),
            PipelineEvent::ProviderChanged(mountpoint) => {
                combiner.provider_changed(&mountpoint);
                Vec::new()
            },
            // biases and VTEC pass the combination untouched
            _ => Vec::new(),
        };
        for output in outputs {
            if let Some(ref mut out) = corr_out {
                if let Err(error) = OrbCorr::write_epoch(out, &output.orb_corrections)
                    .and_then(|_| ClkCorr::write_epoch(out, &output.clk_corrections))
                {
                    warn!("correction dump failed: {}", error);
                }
            }
            if rtnet_tx.send(output.rtnet).is_err() {
                return;
            }
        }
    }
    debug!("combiner task done");
}

fn uploader_task(
    mut uploader: Uploader,
    rx: Receiver<String>,
    mut rtcm_out: Box<dyn Write + Send>,
    cancel: Arc<AtomicBool>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let rtnet = match rx.recv_timeout(POLL) {
            Ok(rtnet) => rtnet,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if let Some(output) = uploader.decode_rtnet(&rtnet, now_gps()) {
            if let Err(error) = rtcm_out.write_all(&output.rtcm) {
                warn!("upload sink failed: {}", error);
                return;
            }
            let _ = rtcm_out.flush();
        }
    }
    debug!("uploader task done");
}
