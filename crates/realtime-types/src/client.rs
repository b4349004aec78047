//! Events sent from the client to the realtime server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Output channels the model may produce for a response or a whole session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

/// Server-side voice activity detection parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
        create_response: bool,
        interrupt_response: bool,
    },
}

/// A function the model is allowed to call, described by a JSON schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Partial session configuration. Only the fields that are set are sent, so
/// several updates can be layered on top of each other.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// An item appended to the server-side conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message {
        role: ItemRole,
        content: Vec<ContentPart>,
    },
    /// The serialized result of a tool call, keyed by the call identifier.
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponseConfig {
    pub modalities: Vec<Modality>,
}

/// Messages sent from the client to the realtime server over the side channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: SessionConfig,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item: ConversationItem,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn session_update(session: SessionConfig) -> Self {
        Self::SessionUpdate {
            event_id: None,
            session,
        }
    }

    pub fn message(role: ItemRole, text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            item: ConversationItem::Message {
                role,
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    pub fn system_message(text: impl Into<String>) -> Self {
        Self::message(ItemRole::System, text)
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::message(ItemRole::User, text)
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    /// Requests a new model response producing both audio and text.
    pub fn response_create() -> Self {
        Self::ResponseCreate {
            event_id: None,
            response: Some(ResponseConfig {
                modalities: vec![Modality::Audio, Modality::Text],
            }),
        }
    }

    pub fn response_cancel() -> Self {
        Self::ResponseCancel { event_id: None }
    }

    /// Returns the wire `type` string of this event.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::ResponseCancel { .. } => "response.cancel",
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::SessionUpdate { event_id, .. }
            | Self::ConversationItemCreate { event_id, .. }
            | Self::ResponseCreate { event_id, .. }
            | Self::ResponseCancel { event_id } => event_id.as_deref(),
        }
    }

    /// Assigns a fresh identifier unless the caller already supplied one.
    pub fn ensure_event_id(&mut self) -> &str {
        let slot = match self {
            Self::SessionUpdate { event_id, .. }
            | Self::ConversationItemCreate { event_id, .. }
            | Self::ResponseCreate { event_id, .. }
            | Self::ResponseCancel { event_id } => event_id,
        };
        slot.get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }
}
