//! Buffers streamed tool-call fragments until the terminal event arrives.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Partially received tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallBuffer {
    pub name: String,
    pub args: String,
}

/// A completed call, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Owned map of in-flight calls keyed by call identifier.
///
/// Argument fragments for one identifier arrive in order, but fragments of
/// different identifiers may interleave, and a delta can show up before the
/// `output_item.added` event that announces the call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    buffers: HashMap<String, ToolCallBuffer>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles "call started": creates or overwrites the buffer with the
    /// declared name and empty arguments.
    pub fn begin(&mut self, call_id: &str, name: &str) {
        debug!(call_id, name, "tool call started");
        self.buffers.insert(
            call_id.to_string(),
            ToolCallBuffer {
                name: name.to_string(),
                args: String::new(),
            },
        );
    }

    pub fn append(&mut self, call_id: &str, fragment: &str) {
        self.buffers
            .entry(call_id.to_string())
            .or_default()
            .args
            .push_str(fragment);
    }

    /// Handles "arguments done" and yields the call to dispatch.
    ///
    /// The terminal `arguments` string wins over buffered fragments when it is
    /// present and non-empty; with neither, the call carries `{}`. A name on
    /// the terminal event fills in a buffer that never learned one. The buffer
    /// itself stays in place until [`Self::remove`] is called once the call
    /// has been answered.
    pub fn finish(&mut self, call_id: &str, arguments: Option<&str>, name: Option<&str>) -> ToolCall {
        let buffer = self.buffers.entry(call_id.to_string()).or_default();
        if buffer.name.is_empty() {
            if let Some(name) = name {
                buffer.name = name.to_string();
            }
        }

        let source = match arguments {
            Some(full) if !full.trim().is_empty() => full,
            _ => buffer.args.as_str(),
        };

        ToolCall {
            call_id: call_id.to_string(),
            name: buffer.name.clone(),
            arguments: parse_arguments(call_id, source),
        }
    }

    /// Deletes the buffer for a call. Returns whether one existed.
    pub fn remove(&mut self, call_id: &str) -> bool {
        self.buffers.remove(call_id).is_some()
    }

    pub fn get(&self, call_id: &str) -> Option<&ToolCallBuffer> {
        self.buffers.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

/// Parses tool arguments, degrading to an empty object on any failure.
pub fn parse_arguments(call_id: &str, source: &str) -> Value {
    if source.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(source) {
        Ok(value) => value,
        Err(e) => {
            warn!(call_id, error = %e, "malformed tool arguments, using an empty set");
            Value::Object(Map::new())
        }
    }
}
