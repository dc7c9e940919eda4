//! Per stream latency statistics and outage supervision
use gnss_rnx::epoch;
use hifitime::Epoch;
use log::info;

/// Transitions and reports the monitor hands to the operator callback
#[derive(Debug, Clone, PartialEq)]
pub enum LatencyEvent {
    /// periodic latency summary
    Report {
        mean: f64,
        min: f64,
        max: f64,
        rms: f64,
        epochs: u32,
        gaps: u32,
    },
    BeginOutage {
        since: Epoch,
    },
    EndOutage {
        begin: Epoch,
        end: Epoch,
    },
    BeginCorrupted {
        since: Epoch,
    },
    EndCorrupted {
        begin: Epoch,
        end: Epoch,
    },
}

const MAX_DT: f64 = 1000.0;
const MAX_PAUSE: i64 = 960;

/// Watches one stream: latency statistics over a configured interval,
/// gap counting, and the outage / corruption state machine driving the
/// reconnect backoff.
pub struct LatencyChecker {
    sta_id: String,
    /// inspection segment [s], 0 disables the outage supervision
    insp_segm: i64,
    /// failure threshold [s]
    advise_fail: i64,
    /// recovery threshold [s]
    advise_reco: i64,
    /// statistics interval [s]
    misc_intr: i64,

    // statistics
    follow_sec: bool,
    old_sec: i64,
    new_sec: i64,
    num_gaps: u32,
    diff_sec: i64,
    num_lat: u32,
    sum_lat: f64,
    sum_lat_q: f64,
    mean_diff: f64,
    min_lat: f64,
    max_lat: f64,

    // decode segment counters
    num_succ: u32,
    sec_succ: i64,
    sec_fail: i64,
    init_pause: i64,
    curr_pause: i64,
    check_pause: Option<Epoch>,
    check_time: Epoch,
    check_seg: bool,

    // outage state
    decode_start: Option<Epoch>,
    decode_stop: Option<Epoch>,
    begin_out: Epoch,
    end_out: Epoch,
    from_reconnect: bool,

    // corruption state
    decode_start_corr: Option<Epoch>,
    decode_stop_corr: Option<Epoch>,
    begin_corr: Epoch,
    end_corr: Epoch,
}

impl LatencyChecker {
    pub fn new(
        sta_id: &str,
        insp_segm: u32,
        advise_fail_min: u32,
        advise_reco_min: u32,
        misc_intr: u32,
        now: Epoch,
    ) -> Self {
        Self {
            sta_id: sta_id.to_string(),
            insp_segm: insp_segm as i64,
            advise_fail: advise_fail_min as i64 * 60,
            advise_reco: advise_reco_min as i64 * 60,
            misc_intr: misc_intr as i64,
            follow_sec: false,
            old_sec: 0,
            new_sec: 0,
            num_gaps: 0,
            diff_sec: 0,
            num_lat: 0,
            sum_lat: 0.0,
            sum_lat_q: 0.0,
            mean_diff: 0.0,
            min_lat: MAX_DT,
            max_lat: -MAX_DT,
            num_succ: 0,
            sec_succ: 0,
            sec_fail: 0,
            init_pause: 0,
            curr_pause: 0,
            check_pause: None,
            check_time: now,
            check_seg: false,
            decode_start: None,
            decode_stop: Some(now),
            begin_out: now,
            end_out: now,
            from_reconnect: false,
            decode_start_corr: None,
            decode_stop_corr: Some(now),
            begin_corr: now,
            end_corr: now,
        }
    }

    /// Reconnect pause [s] for the exponential backoff
    pub fn current_pause(&self) -> i64 {
        self.curr_pause
    }

    fn secs(later: Epoch, earlier: Epoch) -> i64 {
        (later - earlier).to_seconds() as i64
    }

    /// To be called when the transport reconnects: begins an outage once
    /// the failure threshold is exceeded.
    pub fn check_reconnect(&mut self, now: Epoch) -> Vec<LatencyEvent> {
        let mut events = Vec::new();
        if self.insp_segm == 0 {
            return events;
        }

        if !self.from_reconnect {
            self.end_out = now;
        }
        self.from_reconnect = true;

        if self.decode_stop.is_some() {
            self.begin_out = now;
            if Self::secs(now, self.end_out) > self.advise_fail {
                info!("{}: outage since {}", self.sta_id, self.end_out);
                events.push(LatencyEvent::BeginOutage { since: self.end_out });
                self.decode_stop = None;
                self.decode_start = Some(now);
            }
        }
        events
    }

    /// To be called after every decode attempt
    pub fn check_outage(&mut self, decoded: bool, now: Epoch) -> Vec<LatencyEvent> {
        let mut events = Vec::new();
        if self.insp_segm == 0 {
            return events;
        }

        if decoded {
            self.num_succ += 1;
        }

        let pause_over = match self.check_pause {
            None => true,
            Some(pause) => Self::secs(now, pause) >= self.curr_pause,
        };
        if pause_over {
            if !self.check_seg && Self::secs(now, self.check_time) > self.insp_segm {
                self.check_seg = true;
            }

            if self.check_seg {
                self.check_time = now;

                if self.num_succ > 0 {
                    self.sec_succ += self.insp_segm;
                    self.sec_fail = 0;
                    if self.sec_succ > self.advise_reco {
                        self.sec_succ = self.advise_reco + 1;
                    }
                    self.num_succ = 0;
                    self.curr_pause = self.init_pause;
                    self.check_pause = None;
                } else {
                    self.sec_fail += self.insp_segm;
                    self.sec_succ = 0;
                    if self.sec_fail > self.advise_fail {
                        self.sec_fail = self.advise_fail + 1;
                    }
                    match self.check_pause {
                        None => self.check_pause = Some(now),
                        Some(_) => {
                            self.check_pause = None;
                            self.sec_fail += self.curr_pause - self.insp_segm;
                            self.curr_pause = (self.curr_pause * 2).clamp(1, MAX_PAUSE);
                        },
                    }
                }

                if self.sec_succ > 0 {
                    self.end_corr = now;
                }
                if self.sec_fail > 0 {
                    self.begin_corr = now;
                }

                if self.decode_stop_corr.is_some() {
                    self.begin_corr = now;
                    if Self::secs(now, self.end_corr) > self.advise_fail {
                        info!("{}: corrupted since {}", self.sta_id, self.end_corr);
                        events.push(LatencyEvent::BeginCorrupted {
                            since: self.end_corr,
                        });
                        self.sec_succ = 0;
                        self.num_succ = 0;
                        self.decode_stop_corr = None;
                        self.decode_start_corr = Some(now);
                    }
                } else if self.decode_start_corr.is_some() {
                    self.end_corr = now;
                    if Self::secs(now, self.begin_corr) > self.advise_reco {
                        info!("{}: corruption ended {}", self.sta_id, self.begin_corr);
                        events.push(LatencyEvent::EndCorrupted {
                            begin: self.begin_corr,
                            end: now,
                        });
                        self.decode_start_corr = None;
                        self.decode_stop_corr = Some(now);
                        self.sec_fail = 0;
                    }
                }
                self.check_seg = false;
            }
        }

        // end of outage threshold
        if self.from_reconnect {
            self.begin_out = now;
        }
        self.from_reconnect = false;

        if self.decode_start.is_some() {
            self.end_out = now;
            if Self::secs(now, self.begin_out) > self.advise_reco {
                info!("{}: outage ended {}", self.sta_id, self.begin_out);
                events.push(LatencyEvent::EndOutage {
                    begin: self.begin_out,
                    end: now,
                });
                self.decode_start = None;
                self.decode_stop = Some(now);
            }
        }
        events
    }

    /// Latency bookkeeping for a correction epoch (GPS second of week).
    /// Returns the interval report when a statistics window closes.
    pub fn check_corr_latency(&mut self, corr_sec: i64, now: Epoch) -> Option<LatencyEvent> {
        if corr_sec < 0 || self.misc_intr == 0 {
            return None;
        }

        self.new_sec = corr_sec;
        let (_, mut now_sec) = epoch::gps_week_sec(now);

        // week boundary
        const SEC_PER_WEEK: f64 = 7.0 * 24.0 * 3600.0;
        let dt = (now_sec - self.new_sec as f64).abs();
        if dt > 0.5 * SEC_PER_WEEK {
            if now_sec > self.new_sec as f64 {
                now_sec -= SEC_PER_WEEK;
            } else {
                now_sec += SEC_PER_WEEK;
            }
        }

        if self.new_sec == self.old_sec {
            return None;
        }

        let mut report = None;
        if self.new_sec % self.misc_intr < self.old_sec % self.misc_intr && self.num_lat > 0 {
            let mean = self.sum_lat / self.num_lat as f64;
            let rms = ((self.sum_lat_q - self.sum_lat * self.sum_lat / self.num_lat as f64)
                / self.num_lat as f64)
                .sqrt();
            report = Some(LatencyEvent::Report {
                mean,
                min: self.min_lat,
                max: self.max_lat,
                rms,
                epochs: self.num_lat,
                gaps: self.num_gaps,
            });
            self.mean_diff = self.diff_sec as f64 / self.num_lat as f64;
            self.diff_sec = 0;
            self.num_gaps = 0;
            self.sum_lat = 0.0;
            self.sum_lat_q = 0.0;
            self.num_lat = 0;
            self.min_lat = MAX_DT;
            self.max_lat = -MAX_DT;
        }

        if self.follow_sec {
            self.diff_sec += self.new_sec - self.old_sec;
            if self.mean_diff > 0.0
                && (self.new_sec - self.old_sec) as f64 > 1.5 * self.mean_diff
            {
                self.num_gaps += 1;
            }
        }

        let cur_lat = now_sec - self.new_sec as f64;
        self.sum_lat += cur_lat;
        self.sum_lat_q += cur_lat * cur_lat;
        if cur_lat < self.min_lat {
            self.min_lat = cur_lat;
        }
        if cur_lat >= self.max_lat {
            self.max_lat = cur_lat;
        }
        self.num_lat += 1;
        self.old_sec = self.new_sec;
        self.follow_sec = true;

        report
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hifitime::Duration;

    fn start() -> Epoch {
        epoch::from_gps_week_sec(2220, 345600.0)
    }

    #[test]
    fn latency_statistics_report() {
        let now0 = start();
        let mut checker = LatencyChecker::new("TEST", 0, 15, 5, 60, now0);
        let mut report = None;
        // corrections arrive 2.5 s late every 5 s, crossing one minute
        for ii in 0..=13 {
            let corr_sec = 345600 + ii * 5;
            let now = epoch::from_gps_week_sec(2220, corr_sec as f64 + 2.5);
            if let Some(event) = checker.check_corr_latency(corr_sec, now) {
                report = Some(event);
            }
        }
        match report.expect("one interval report") {
            LatencyEvent::Report {
                mean,
                min,
                max,
                epochs,
                gaps,
                ..
            } => {
                assert!((mean - 2.5).abs() < 0.01, "mean = {}", mean);
                assert!((min - 2.5).abs() < 0.01);
                assert!((max - 2.5).abs() < 0.01);
                assert!(epochs > 0);
                assert_eq!(gaps, 0);
            },
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn gaps_counted() {
        let now0 = start();
        let mut checker = LatencyChecker::new("TEST", 0, 15, 5, 60, now0);
        // steady 5 s cadence in the first window establishes the mean
        for ii in 0..=12 {
            let corr_sec = 345600 + ii * 5;
            let now = epoch::from_gps_week_sec(2220, corr_sec as f64 + 1.0);
            checker.check_corr_latency(corr_sec, now);
        }
        // second window: one 20 s hole
        let mut report = None;
        for corr_sec in [345665i64, 345670, 345690, 345695, 345700, 345720] {
            let now = epoch::from_gps_week_sec(2220, corr_sec as f64 + 1.0);
            if let Some(event) = checker.check_corr_latency(corr_sec, now) {
                report = Some(event);
            }
        }
        match report.expect("second window report") {
            LatencyEvent::Report { gaps, .. } => assert!(gaps >= 1, "gaps = {}", gaps),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn outage_cycle() {
        let now0 = start();
        let mut checker = LatencyChecker::new("TEST", 10, 1, 1, 60, now0);
        // one minute of reconnect attempts with no data: outage begins
        let mut begun = false;
        for ii in 1..=70 {
            let now = now0 + Duration::from_seconds(ii as f64);
            for event in checker.check_reconnect(now) {
                if matches!(event, LatencyEvent::BeginOutage { .. }) {
                    begun = true;
                }
            }
        }
        assert!(begun, "outage should have begun");

        // data comes back and keeps decoding: outage ends
        let mut ended = false;
        for ii in 71..=200 {
            let now = now0 + Duration::from_seconds(ii as f64);
            for event in checker.check_outage(true, now) {
                if matches!(event, LatencyEvent::EndOutage { .. }) {
                    ended = true;
                }
            }
        }
        assert!(ended, "outage should have ended");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let now0 = start();
        let mut checker = LatencyChecker::new("TEST", 10, 15, 5, 60, now0);
        checker.init_pause = 15;
        checker.curr_pause = 15;
        let mut now = now0;
        let mut last_pause = checker.current_pause();
        for _ in 0..20 {
            now = now + Duration::from_seconds(1000.0);
            checker.check_outage(false, now);
            let pause = checker.current_pause();
            assert!(pause >= last_pause);
            assert!(pause <= MAX_PAUSE);
            last_pause = pause;
        }
        assert_eq!(last_pause, MAX_PAUSE);
    }
}
