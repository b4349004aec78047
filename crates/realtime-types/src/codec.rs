//! Text-frame codec for the side channel, plus the record kept in the local
//! event log.

use crate::{client::ClientEvent, server::ServerEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("inbound frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("inbound frame has no `type` field")]
    MissingType { raw: Box<Value> },
    #[error("inbound `{event_type}` event has an unexpected shape: {source}")]
    InvalidShape {
        event_type: String,
        raw: Box<Value>,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize `{event_type}`: {source}")]
    Serialize {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// The parsed payload, when the frame was at least valid JSON.
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::MissingType { raw } | Self::InvalidShape { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Takes the parsed payload out of the error.
    pub fn into_raw(self) -> Option<Value> {
        match self {
            Self::MissingType { raw } | Self::InvalidShape { raw, .. } => Some(*raw),
            _ => None,
        }
    }
}

/// A decoded inbound frame: the typed event and the payload it came from.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub raw: Value,
    pub event: ServerEvent,
}

impl InboundEvent {
    /// The wire `type`, including for events decoded as unknown.
    pub fn event_type(&self) -> &str {
        self.raw.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    /// Attaches a local receipt time unless the remote already supplied one.
    pub fn stamp_receipt(&mut self, timestamp: &str) {
        stamp(&mut self.raw, timestamp);
    }
}

/// Serializes an outbound event, assigning its `event_id` first.
pub fn encode_client_event(event: &mut ClientEvent) -> Result<String, CodecError> {
    event.ensure_event_id();
    serde_json::to_string(event).map_err(|source| CodecError::Serialize {
        event_type: event.event_type(),
        source,
    })
}

pub fn decode_server_event(text: &str) -> Result<InboundEvent, CodecError> {
    let raw: Value = serde_json::from_str(text).map_err(CodecError::Malformed)?;
    let Some(event_type) = raw.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(CodecError::MissingType { raw: Box::new(raw) });
    };
    match ServerEvent::deserialize(&raw) {
        Ok(event) => Ok(InboundEvent { raw, event }),
        Err(source) => Err(CodecError::InvalidShape {
            event_type,
            raw: Box::new(raw),
            source,
        }),
    }
}

/// Wall-clock time in the short form shown next to log entries.
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%-I:%M:%S %p").to_string()
}

fn stamp(payload: &mut Value, timestamp: &str) {
    if let Value::Object(map) = payload {
        map.entry("timestamp")
            .or_insert_with(|| Value::String(timestamp.to_string()));
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventDirection {
    Outbound,
    Inbound,
}

/// One entry of the local event log. The payload includes the local
/// `timestamp`, which never appears on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub direction: EventDirection,
    pub event_type: String,
    pub event_id: Option<String>,
    pub timestamp: String,
    pub payload: Value,
}

impl LoggedEvent {
    /// Builds the log record for an event that has already been transmitted.
    pub fn outbound(event: &ClientEvent, timestamp: String) -> Self {
        let mut payload = serde_json::to_value(event).unwrap_or(Value::Null);
        stamp(&mut payload, &timestamp);
        Self {
            direction: EventDirection::Outbound,
            event_type: event.event_type().to_string(),
            event_id: event.event_id().map(str::to_owned),
            timestamp,
            payload,
        }
    }

    pub fn inbound(raw: Value, fallback_timestamp: String) -> Self {
        let mut payload = raw;
        stamp(&mut payload, &fallback_timestamp);
        let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_owned);
        let event_type = field("type").unwrap_or_default();
        let event_id = field("event_id");
        let timestamp = field("timestamp").unwrap_or(fallback_timestamp);
        Self {
            direction: EventDirection::Inbound,
            event_type,
            event_id,
            timestamp,
            payload,
        }
    }
}
