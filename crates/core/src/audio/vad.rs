//! Speech-activity detection over an analyser's time-domain window.
//!
//! Each frame is reduced to an RMS level and a "fully silent" bit, then
//! classified as a voice or silence candidate. A small debounce state machine
//! turns candidates into a speaking flag: onset is reported quickly, release
//! slowly, and a candidate of the opposite kind cancels a pending change.

use super::analysis::SILENCE_LEVEL;
use crate::settings::SpeechThresholds;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLevel {
    pub rms: f32,
    /// Every sample sits exactly on the zero line: a muted or disconnected
    /// stream rather than quiet speech.
    pub fully_silent: bool,
}

/// Computes the level of one frame of unsigned-byte samples.
pub fn measure(samples: &[u8]) -> FrameLevel {
    if samples.is_empty() {
        return FrameLevel {
            rms: 0.0,
            fully_silent: true,
        };
    }
    let mut sum_squares = 0.0f32;
    let mut fully_silent = true;
    for &byte in samples {
        if byte != SILENCE_LEVEL {
            fully_silent = false;
        }
        let normalized = (byte as f32 - 128.0) / 128.0;
        sum_squares += normalized * normalized;
    }
    FrameLevel {
        rms: (sum_squares / samples.len() as f32).sqrt(),
        fully_silent,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Voice,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    PendingSpeak { since: Instant },
    Speaking,
    PendingSilence { since: Instant },
}

#[derive(Debug, Clone)]
pub struct SpeechActivityDetector {
    thresholds: SpeechThresholds,
    state: DebounceState,
}

impl SpeechActivityDetector {
    pub fn new(thresholds: SpeechThresholds) -> Self {
        Self {
            thresholds,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// The debounced flag. A pending release still reports speaking.
    pub fn is_speaking(&self) -> bool {
        matches!(
            self.state,
            DebounceState::Speaking | DebounceState::PendingSilence { .. }
        )
    }

    pub fn classify(&self, level: FrameLevel) -> Candidate {
        if level.rms > self.thresholds.rms_threshold && !level.fully_silent {
            Candidate::Voice
        } else {
            Candidate::Silence
        }
    }

    /// Measures, classifies and observes one frame.
    pub fn analyse(&mut self, samples: &[u8], now: Instant) -> Option<bool> {
        let candidate = self.classify(measure(samples));
        self.observe(candidate, now)
    }

    /// Feeds one candidate. Returns the new flag value when it flips.
    pub fn observe(&mut self, candidate: Candidate, now: Instant) -> Option<bool> {
        use DebounceState::*;
        let next = match (self.state, candidate) {
            (Idle, Candidate::Voice) => PendingSpeak { since: now },
            (Idle, Candidate::Silence) => Idle,
            (PendingSpeak { since }, Candidate::Voice) => PendingSpeak { since },
            (PendingSpeak { .. }, Candidate::Silence) => Idle,
            (Speaking, Candidate::Voice) => Speaking,
            (Speaking, Candidate::Silence) => PendingSilence { since: now },
            (PendingSilence { .. }, Candidate::Voice) => Speaking,
            (PendingSilence { since }, Candidate::Silence) => PendingSilence { since },
        };
        let next = match next {
            PendingSpeak { since } if now.duration_since(since) >= self.thresholds.onset => Speaking,
            PendingSilence { since } if now.duration_since(since) >= self.thresholds.release => {
                Idle
            }
            other => other,
        };

        let was_speaking = self.is_speaking();
        self.state = next;
        let speaking = self.is_speaking();
        (was_speaking != speaking).then_some(speaking)
    }

    /// Drops any pending transition and reports silence.
    pub fn reset(&mut self) {
        self.state = DebounceState::Idle;
    }
}
