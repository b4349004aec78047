//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the upstream
//! clients shared by every handler.

use crate::upstream::{KnowledgeBase, RealtimeSessions};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub realtime_sessions: Arc<dyn RealtimeSessions>,
}
