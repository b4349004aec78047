//! Newest-first record of every event sent or received during a session.

use std::collections::VecDeque;
use wanda_realtime_types::{EventDirection, LoggedEvent};

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: VecDeque<LoggedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: LoggedEvent) {
        self.entries.push_front(entry);
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &LoggedEvent> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LoggedEvent> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Event types in transmission order (oldest first) for one direction.
    pub fn types_in_order(&self, direction: EventDirection) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.direction == direction)
            .map(|e| e.event_type.clone())
            .collect()
    }
}
