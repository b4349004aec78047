//! Session lifecycle: the [`SessionController`] that owns one live
//! conversation, and the [`SessionRuntime`] loop that drives it.

pub mod controller;
pub mod runtime;

pub use controller::{PreloadedContext, SessionController, SessionDeps};
pub use runtime::{SessionCommand, SessionHandle, SessionRuntime};

use crate::{
    conversation::ConversationState, presentation::DisplayState, transcript::TranscriptEntry,
};
use serde::Serialize;

/// Observable state of the engine, published after every loop step that
/// changed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub is_active: bool,
    pub reference_id: Option<String>,
    pub conversation_state: ConversationState,
    pub display_state: DisplayState,
    pub is_user_speaking: bool,
    pub is_agent_speaking: bool,
    pub is_microphone_muted: bool,
    pub transcript: Vec<TranscriptEntry>,
    pub live_transcript: String,
    pub event_count: usize,
}
