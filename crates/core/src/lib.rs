//! Realtime voice session engine.
//!
//! The engine holds one live voice conversation with a remote speech-to-speech
//! model. Audio flows over a peer connection; a side channel carries JSON
//! events for transcripts, response lifecycle and tool calls. Everything that
//! touches real devices or the network sits behind the traits in
//! [`transport`], [`gateway`] and [`content`], so the engine itself runs the
//! same against a WebRTC stack or an in-memory fake.

pub mod audio;
pub mod content;
pub mod conversation;
pub mod error;
pub mod event_log;
pub mod gateway;
pub mod presentation;
pub mod session;
pub mod settings;
pub mod tools;
pub mod transcript;
pub mod transport;

pub use wanda_realtime_types as protocol;
