//! Throughput meter: counts buffers per source on the tiler's sink pads and
//! periodically reports session and interval frame rates to a client handler.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use gstreamer::prelude::*;
use gstreamer::{self as gst, glib, PadProbeReturn, PadProbeType};

/// Client callback: `(session_avgs, interval_avgs, source_count) -> keep_reporting`.
pub type MeterHandler = Box<dyn FnMut(&[f64], &[f64], usize) -> bool + Send>;

/// Averages computed at the end of a reporting interval, indexed by source.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReport {
    pub session_avgs: Vec<f64>,
    pub interval_avgs: Vec<f64>,
}

#[derive(Debug)]
struct MeterState {
    enabled: bool,
    session_start: Option<Instant>,
    interval_start: Option<Instant>,
    session_frames: Vec<u64>,
    interval_frames: Vec<u64>,
}

impl MeterState {
    fn reset(&mut self) {
        self.session_start = None;
        self.interval_start = None;
        self.session_frames.iter_mut().for_each(|n| *n = 0);
        self.interval_frames.iter_mut().for_each(|n| *n = 0);
    }
}

fn frames_per_second(frames: u64, since: Instant, now: Instant) -> f64 {
    let secs = now.saturating_duration_since(since).as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}

/// Cheap to clone, all clones share the same counters and handler.
#[derive(Clone)]
pub struct Meter {
    state: Arc<Mutex<MeterState>>,
    handler: Arc<Mutex<MeterHandler>>,
    interval_secs: u32,
}

impl Meter {
    pub fn new(source_count: usize, interval_secs: u32, handler: MeterHandler) -> Self {
        Self {
            state: Arc::new(Mutex::new(MeterState {
                enabled: true,
                session_start: None,
                interval_start: None,
                session_frames: vec![0; source_count],
                interval_frames: vec![0; source_count],
            })),
            handler: Arc::new(Mutex::new(handler)),
            interval_secs: interval_secs.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().map(|state| state.enabled).unwrap_or(false)
    }

    /// Enables or disables counting. A disabled meter that gets re-enabled
    /// starts a fresh session on its next buffer.
    pub fn set_enabled(&self, enabled: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if enabled && !state.enabled {
            state.reset();
        }
        state.enabled = enabled;
        log::debug!("meter enabled: {enabled}");
    }

    /// Counts a single buffer for `source`.
    pub fn record(&self, source: usize, now: Instant) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !state.enabled || source >= state.session_frames.len() {
            return;
        }
        if state.session_start.is_none() {
            state.session_start = Some(now);
            state.interval_start = Some(now);
        }
        state.session_frames[source] += 1;
        state.interval_frames[source] += 1;
    }

    /// Closes the current interval and computes averages for every source.
    ///
    /// Returns `None` while disabled or before the first buffer arrived.
    pub fn report(&self, now: Instant) -> Option<MeterReport> {
        let mut state = self.state.lock().ok()?;
        if !state.enabled {
            return None;
        }
        let session_start = state.session_start?;
        let interval_start = state.interval_start.unwrap_or(session_start);

        let session_avgs = state
            .session_frames
            .iter()
            .map(|&n| frames_per_second(n, session_start, now))
            .collect();
        let interval_avgs = state
            .interval_frames
            .iter()
            .map(|&n| frames_per_second(n, interval_start, now))
            .collect();

        state.interval_frames.iter_mut().for_each(|n| *n = 0);
        state.interval_start = Some(now);

        Some(MeterReport {
            session_avgs,
            interval_avgs,
        })
    }

    /// Runs the client handler on a fresh report, if there is one.
    /// Returns `false` once the handler asked to stop reporting.
    pub fn report_to_handler(&self, now: Instant) -> bool {
        let Some(report) = self.report(now) else {
            return true;
        };
        let source_count = report.session_avgs.len();
        match self.handler.lock() {
            Ok(mut handler) => (handler)(
                &report.session_avgs,
                &report.interval_avgs,
                source_count,
            ),
            Err(_) => false,
        }
    }

    /// Adds a buffer probe to every pad, the pad's position being its source index.
    pub fn attach(&self, pads: &[gst::Pad]) {
        for (source, pad) in pads.iter().enumerate() {
            let meter = self.clone();
            pad.add_probe(PadProbeType::BUFFER, move |_pad, _info| {
                meter.record(source, Instant::now());
                PadProbeReturn::Ok
            });
            log::debug!("meter attached to {} for source {source}", pad.name());
        }
    }

    /// Starts the reporting timer on the default main context.
    pub fn start_timer(&self) -> glib::SourceId {
        let meter = self.clone();
        glib::timeout_add_seconds(self.interval_secs, move || {
            if meter.report_to_handler(Instant::now()) {
                glib::ControlFlow::Continue
            } else {
                log::info!("meter handler asked to stop reporting");
                glib::ControlFlow::Break
            }
        })
    }
}
