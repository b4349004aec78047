//! Audio analysis: the per-stream analysers and the speech-activity detector
//! that reads them once per frame.

pub mod analysis;
pub mod vad;

pub use analysis::{Analyser, AnalyserTap, AudioAnalysisContext, FrameTicker, SILENCE_LEVEL};
pub use vad::{Candidate, DebounceState, FrameLevel, SpeechActivityDetector, measure};
