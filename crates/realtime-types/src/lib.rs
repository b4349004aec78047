//! Wire types for the realtime side channel.
//!
//! The side channel carries JSON events tagged by a `type` field. This crate
//! defines the outbound events the client may emit, the inbound events the
//! engine reacts to, and the codec that moves between text frames and typed
//! values. Anything the remote sends that is not modelled here still decodes
//! (as [`ServerEvent::Unknown`]) so newer servers never break older clients.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{
    ClientEvent, ContentPart, ConversationItem, ItemRole, Modality, ResponseConfig, SessionConfig,
    ToolDefinition, TurnDetection,
};
pub use codec::{
    CodecError, EventDirection, InboundEvent, LoggedEvent, decode_server_event,
    encode_client_event, local_timestamp,
};
pub use server::{OutputItem, ServerErrorDetail, ServerEvent};
