//! Coarse conversation state derived from protocol events.

use serde::Serialize;
use std::fmt;
use wanda_realtime_types::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        };
        f.write_str(label)
    }
}

/// Tracks the response lifecycle and the live agent transcript.
///
/// `idle` is both the initial state and the resting state between turns.
/// A new response always starts from `thinking`; other events that do not
/// apply to the current state are ignored.
#[derive(Debug, Default, Clone)]
pub struct ConversationStateMachine {
    state: ConversationState,
    live_transcript: String,
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// The agent transcript of the current turn, as streamed so far.
    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    /// Applies one inbound event. Returns the new state if it changed.
    pub fn apply(&mut self, event: &ServerEvent) -> Option<ConversationState> {
        use ConversationState::*;
        let next = match (self.state, event) {
            (_, ServerEvent::ResponseCreated { .. }) => {
                self.live_transcript.clear();
                Some(Thinking)
            }
            (Thinking, ServerEvent::OutputAudioBufferStarted { .. }) => Some(Speaking),
            (
                Thinking | Speaking,
                ServerEvent::ResponseAudioDone { .. } | ServerEvent::OutputAudioBufferStopped { .. },
            ) => Some(Idle),
            (Idle, ServerEvent::SpeechStarted { .. }) => Some(Listening),
            (Listening, ServerEvent::SpeechStopped { .. }) => Some(Idle),
            (_, ServerEvent::ResponseAudioTranscriptDelta { delta, .. }) => {
                self.live_transcript.push_str(delta);
                None
            }
            (_, ServerEvent::ResponseAudioTranscriptDone { transcript, .. }) => {
                self.live_transcript.clone_from(transcript);
                None
            }
            _ => None,
        };

        match next {
            Some(state) if state != self.state => {
                self.state = state;
                Some(state)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = ConversationState::Idle;
        self.live_transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn event(value: serde_json::Value) -> ServerEvent {
        ServerEvent::deserialize(&value).unwrap()
    }

    #[test]
    fn test_response_lifecycle() {
        let mut machine = ConversationStateMachine::new();
        assert_eq!(machine.state(), ConversationState::Idle);
        assert_eq!(
            machine.apply(&event(json!({ "type": "response.created" }))),
            Some(ConversationState::Thinking)
        );
        assert_eq!(
            machine.apply(&event(json!({ "type": "output_audio_buffer.started" }))),
            Some(ConversationState::Speaking)
        );
        assert_eq!(
            machine.apply(&event(json!({ "type": "response.audio.done" }))),
            Some(ConversationState::Idle)
        );
    }

    #[test]
    fn test_thinking_returns_to_idle_when_audio_stops() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&event(json!({ "type": "response.created" })));
        assert_eq!(
            machine.apply(&event(json!({ "type": "output_audio_buffer.stopped" }))),
            Some(ConversationState::Idle)
        );
    }

    #[test]
    fn test_out_of_state_events_are_ignored() {
        let mut machine = ConversationStateMachine::new();
        assert_eq!(
            machine.apply(&event(json!({ "type": "output_audio_buffer.started" }))),
            None
        );
        assert_eq!(machine.apply(&event(json!({ "type": "response.audio.done" }))), None);
        assert_eq!(machine.state(), ConversationState::Idle);
    }

    #[test]
    fn test_server_speech_detection_moves_through_listening() {
        let mut machine = ConversationStateMachine::new();
        assert_eq!(
            machine.apply(&event(json!({ "type": "input_audio_buffer.speech_started" }))),
            Some(ConversationState::Listening)
        );
        assert_eq!(
            machine.apply(&event(json!({ "type": "response.created" }))),
            Some(ConversationState::Thinking)
        );
        // speech_stopped only applies while listening
        assert_eq!(
            machine.apply(&event(json!({ "type": "input_audio_buffer.speech_stopped" }))),
            None
        );
    }

    #[test]
    fn test_live_transcript_accumulates_and_is_replaced_on_done() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&event(json!({ "type": "response.created" })));
        machine.apply(&event(json!({ "type": "response.audio_transcript.delta", "delta": "Hel" })));
        machine.apply(&event(json!({ "type": "response.audio_transcript.delta", "delta": "lo" })));
        assert_eq!(machine.live_transcript(), "Hello");
        machine.apply(&event(
            json!({ "type": "response.audio_transcript.done", "transcript": "Hello there." }),
        ));
        assert_eq!(machine.live_transcript(), "Hello there.");

        machine.apply(&event(json!({ "type": "response.audio.done" })));
        machine.apply(&event(json!({ "type": "response.created" })));
        assert_eq!(machine.live_transcript(), "");
    }

    #[test]
    fn test_unknown_event_changes_nothing() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&event(json!({ "type": "response.created" })));
        assert_eq!(machine.apply(&ServerEvent::Unknown), None);
        assert_eq!(machine.state(), ConversationState::Thinking);
    }
}
