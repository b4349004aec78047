//! Peer connection, side channel and microphone boundaries.
//!
//! Implementations push their asynchronous notifications through a
//! [`TransportEventSink`]. Every event carries the generation of the session
//! that created the sink, so notifications from a torn-down connection can be
//! told apart from the current one and dropped.

use crate::audio::AnalyserTap;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Mono PCM captured from the microphone, normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ChannelOpen,
    /// One text frame received on the side channel.
    ChannelMessage(String),
    ChannelClosed,
    /// The remote audio track arrived and is being played.
    RemoteTrack,
    ConnectionState(PeerState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedTransportEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Sending half handed to a transport for one session.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedTransportEvent>,
}

impl TransportEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedTransportEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event. Returns `false` once the session loop is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedTransportEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Ordered, reliable text channel alongside the audio path.
pub trait SideChannel: Send + Sync {
    fn label(&self) -> &str;
    fn is_open(&self) -> bool;
    /// Queues one text frame for transmission.
    fn send(&self, text: String) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// A live microphone capture.
pub trait MicrophoneStream: Send {
    /// Enables or disables the track. A disabled track keeps running and
    /// produces silence.
    fn set_enabled(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Takes the captured frames. Returns `None` after the first call.
    fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<AudioChunk>>;
    /// Releases the device. Further calls are no-ops.
    fn stop(&mut self) -> Result<()>;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquires the default microphone. Captured audio is also written to
    /// `tap` so it can be analysed.
    async fn open_microphone(
        &self,
        constraints: AudioConstraints,
        tap: AnalyserTap,
    ) -> Result<Box<dyn MicrophoneStream>>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Adds the single bidirectional audio line.
    async fn add_audio_line(&self) -> Result<()>;

    /// Feeds captured microphone audio into the outbound track.
    async fn attach_microphone(&self, frames: mpsc::UnboundedReceiver<AudioChunk>) -> Result<()>;

    /// Creates an ordered, reliable side channel.
    async fn open_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>>;

    /// Creates the offer and returns the local description once candidate
    /// gathering has fully completed.
    async fn create_local_description(&self) -> Result<String>;

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()>;

    async fn stop_outbound_tracks(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates a peer connection. Decoded remote audio is written to
    /// `remote_audio`; connection and channel notifications go to `events`.
    async fn connect(
        &self,
        config: PeerConfig,
        events: TransportEventSink,
        remote_audio: AnalyserTap,
    ) -> Result<Box<dyn PeerConnection>>;
}
