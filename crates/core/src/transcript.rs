//! The conversation transcript shown to the user.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Ordered transcript entries.
///
/// Entries appear in the order their turn began. Each role has at most one
/// open (non-final) entry: its most recent one. Deltas and finalization for a
/// role go to that entry even if the other role has started a turn since, so
/// a late user transcription still lands on the turn it belongs to. A turn
/// that ends without an authoritative text is closed with [`Transcript::end_turn`]
/// so the next delta starts a new entry. Final entries are never touched again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extends the in-progress entry for `role`, or starts one.
    pub fn append_delta(&mut self, role: Role, delta: &str) {
        match self.open_entry(role) {
            Some(entry) => entry.text.push_str(delta),
            None => self.entries.push(TranscriptEntry {
                role,
                text: delta.to_string(),
                is_final: false,
            }),
        }
    }

    /// Finalizes the in-progress entry for `role` with the authoritative
    /// text, or appends a final entry when no turn is in progress.
    pub fn finalize(&mut self, role: Role, text: &str) {
        match self.open_entry(role) {
            Some(entry) => {
                entry.text = text.to_string();
                entry.is_final = true;
            }
            None => self.entries.push(TranscriptEntry {
                role,
                text: text.to_string(),
                is_final: true,
            }),
        }
    }

    /// Closes the in-progress entry for `role`, keeping the text it has so
    /// far. Returns whether an entry was open.
    pub fn end_turn(&mut self, role: Role) -> bool {
        match self.open_entry(role) {
            Some(entry) => {
                entry.is_final = true;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn open_entry(&mut self, role: Role) -> Option<&mut TranscriptEntry> {
        self.entries
            .iter_mut()
            .rev()
            .find(|entry| entry.role == role)
            .filter(|entry| !entry.is_final)
    }
}
