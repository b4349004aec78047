//! Events received from the realtime server.

use serde::Deserialize;
use serde_json::Value;

/// The item carried by `response.output_item.added`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
}

impl OutputItem {
    pub fn is_function_call(&self) -> bool {
        self.kind == "function_call"
    }

    /// The identifier argument events will use for this call. Falls back to
    /// the item id when the server omits `call_id`.
    pub fn call_identifier(&self) -> Option<&str> {
        self.call_id.as_deref().or(self.id.as_deref())
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServerErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Messages sent from the realtime server to the client.
///
/// Only the events the engine reacts to are modelled. Every other `type`
/// decodes to [`ServerEvent::Unknown`]; the raw payload is kept alongside by
/// the codec so it can still be logged.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response: Value,
    },
    /// The remote peer started playing agent audio.
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: Option<String>,
    },
    /// The remote peer drained its audio buffer.
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: Option<String>,
    },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        #[serde(default)]
        event_id: String,
        item: OutputItem,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        event_id: String,
        call_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        event_id: String,
        call_id: String,
        #[serde(default)]
        arguments: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        transcript: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        event_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        event_id: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        error: ServerErrorDetail,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}
