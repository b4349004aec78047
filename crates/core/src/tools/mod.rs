//! Tool calls made by the remote model.
//!
//! Calls stream in as fragments and are assembled by the
//! [`ToolCallAccumulator`]; the [`ToolDispatcher`] runs the matching local
//! [`ToolHandler`] and turns whatever happens into a [`ToolOutcome`] that is
//! always reported back to the model.

pub mod accumulator;
pub mod dictionary;
pub mod dispatcher;

pub use accumulator::{ToolCall, ToolCallAccumulator, ToolCallBuffer, parse_arguments};
pub use dictionary::DictionarySectionTool;
pub use dispatcher::{ToolDispatcher, ToolHandler, ToolOutcome};
