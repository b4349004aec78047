//! Terminal rendering of session snapshots.

use wanda_core::{
    presentation::{DisplayState, Rgb},
    session::SessionSnapshot,
    transcript::Role,
};

fn paint(text: &str, Rgb(r, g, b): Rgb) -> String {
    format!("\x1b[38;2;{r};{g};{b}m{text}\x1b[0m")
}

pub fn status_line(snapshot: &SessionSnapshot, color: bool) -> String {
    if !snapshot.is_active {
        return "[session inactive]".to_string();
    }
    let state = snapshot.display_state;
    let label = if color {
        paint(&format!("● {}", state.label()), state.color())
    } else {
        format!("● {}", state.label())
    };
    let mic = if snapshot.is_microphone_muted {
        "mic muted"
    } else {
        "mic on"
    };
    match &snapshot.reference_id {
        Some(reference) => format!("[{label}] {mic} | {reference}"),
        None => format!("[{label}] {mic}"),
    }
}

/// Turns a stream of snapshots into lines to print, emitting only what
/// changed since the previous snapshot.
#[derive(Debug, Default)]
pub struct Renderer {
    color: bool,
    printed_entries: usize,
    last_status: Option<(bool, DisplayState, bool)>,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self {
            color,
            ..Default::default()
        }
    }

    pub fn update(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        // A fresh session starts with an empty transcript.
        if snapshot.transcript.len() < self.printed_entries {
            self.printed_entries = 0;
        }
        // Entries are printed once final, in order; an open entry holds back
        // the ones after it.
        for entry in &snapshot.transcript[self.printed_entries..] {
            if !entry.is_final {
                break;
            }
            let speaker = match entry.role {
                Role::User => "you",
                Role::Agent => "agent",
            };
            lines.push(format!("{speaker}: {}", entry.text));
            self.printed_entries += 1;
        }

        let status = (
            snapshot.is_active,
            snapshot.display_state,
            snapshot.is_microphone_muted,
        );
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            lines.push(status_line(snapshot, self.color));
        }
        lines
    }
}
