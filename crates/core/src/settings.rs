//! Engine tuning knobs.
//!
//! Binaries build these from their own configuration layer; tests construct
//! them directly. Defaults match the values the production client ships with.

use std::time::Duration;
use wanda_realtime_types::TurnDetection;

/// Prompt used when the functions system prompt cannot be fetched.
pub const FALLBACK_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Please follow the user's instructions.";

/// Debounce policy for one speech-activity detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechThresholds {
    /// RMS level (on the normalized [-1, 1] scale) above which a frame counts as voice.
    pub rms_threshold: f32,
    /// How long voice must persist before the speaking flag turns on.
    pub onset: Duration,
    /// How long silence must persist before the speaking flag turns off.
    pub release: Duration,
}

impl Default for SpeechThresholds {
    fn default() -> Self {
        Self {
            rms_threshold: 0.07,
            onset: Duration::from_millis(100),
            release: Duration::from_millis(1250),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub speech: SpeechThresholds,
    /// Number of time-domain samples each analyser exposes per frame.
    pub analyser_window: usize,
    /// Cadence of the analysis loop, roughly one display refresh.
    pub frame_interval: Duration,
    pub turn_detection: TurnDetection,
    /// Prefix of the reference document seeded into the conversation, in characters.
    pub reference_content_limit: usize,
    pub channel_label: String,
    pub ice_servers: Vec<String>,
    pub fallback_system_prompt: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            speech: SpeechThresholds::default(),
            analyser_window: 2048,
            frame_interval: Duration::from_millis(16),
            turn_detection: TurnDetection::ServerVad {
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 350,
                create_response: true,
                interrupt_response: true,
            },
            reference_content_limit: 8000,
            channel_label: "oai-events".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            fallback_system_prompt: FALLBACK_SYSTEM_PROMPT.to_string(),
        }
    }
}
