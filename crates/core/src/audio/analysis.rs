//! Audio-analysis context and the analysers attached to it.
//!
//! An analyser keeps a rolling window of the most recent samples of one
//! stream in unsigned byte form, where [`SILENCE_LEVEL`] is the zero line.
//! Audio threads write through an [`AnalyserTap`]; the session loop reads
//! through the matching [`Analyser`] once per frame. Closing the context
//! detaches every tap and ends every [`FrameTicker`] created from it.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::time::{Interval, MissedTickBehavior};

/// Byte value of a zero sample in the time-domain encoding.
pub const SILENCE_LEVEL: u8 = 128;

type Window = Arc<Mutex<VecDeque<u8>>>;

#[derive(Clone, Debug)]
pub struct AudioAnalysisContext {
    open: Arc<AtomicBool>,
}

impl AudioAnalysisContext {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Closes the context. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Creates an analyser holding `window` samples, initially all silent.
    pub fn create_analyser(&self, window: usize) -> (AnalyserTap, Analyser) {
        let samples: Window = Arc::new(Mutex::new(VecDeque::from(vec![SILENCE_LEVEL; window])));
        let tap = AnalyserTap {
            open: self.open.clone(),
            samples: samples.clone(),
            window,
        };
        (tap, Analyser { samples })
    }

    pub fn frame_ticker(&self, period: Duration) -> FrameTicker {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        FrameTicker {
            context: self.clone(),
            interval,
        }
    }
}

impl Default for AudioAnalysisContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side of an analyser, safe to move onto an audio thread.
#[derive(Clone, Debug)]
pub struct AnalyserTap {
    open: Arc<AtomicBool>,
    samples: Window,
    window: usize,
}

impl AnalyserTap {
    /// Pushes normalized float samples. Ignored once the context is closed.
    pub fn push_f32(&self, samples: &[f32]) {
        self.push_bytes(samples.iter().map(|&s| to_byte(s)));
    }

    pub fn push_i16(&self, samples: &[i16]) {
        self.push_bytes(samples.iter().map(|&s| to_byte(s as f32 / 32768.0)));
    }

    fn push_bytes(&self, bytes: impl Iterator<Item = u8>) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        let mut window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        for byte in bytes {
            if window.len() == self.window {
                window.pop_front();
            }
            window.push_back(byte);
        }
    }
}

fn to_byte(sample: f32) -> u8 {
    if sample.is_nan() {
        return SILENCE_LEVEL;
    }
    (sample.clamp(-1.0, 1.0) * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8
}

/// Read side of an analyser.
#[derive(Clone, Debug)]
pub struct Analyser {
    samples: Window,
}

impl Analyser {
    /// Copies the current window, oldest sample first, into `out`.
    pub fn time_domain_data(&self, out: &mut Vec<u8>) {
        let window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        out.clear();
        out.extend(window.iter().copied());
    }
}

/// Per-frame clock for the analysis loop. Yields until its context closes.
pub struct FrameTicker {
    context: AudioAnalysisContext,
    interval: Interval,
}

impl FrameTicker {
    /// Waits for the next frame. Returns `None` once the context is closed.
    pub async fn tick(&mut self) -> Option<Instant> {
        if !self.context.is_open() {
            return None;
        }
        let at = self.interval.tick().await;
        self.context.is_open().then(|| at.into_std())
    }
}
