//! WebRTC implementation of the engine's transport boundary.
//!
//! One peer connection per session with a single bidirectional Opus audio
//! line and the ordered `oai-events` data channel. Microphone chunks are
//! resampled to 48 kHz, cut into 20 ms frames and Opus-encoded onto the
//! outbound track; inbound RTP is decoded, handed to the remote analyser and
//! queued for playback.

use crate::{
    audio_utils::{
        Framer, OPUS_FRAME_SAMPLES, OPUS_MAX_FRAME_SAMPLES, OPUS_SAMPLE_RATE, StreamResampler,
        convert_f32_to_i16, convert_i16_to_f32,
    },
    media::PlaybackQueue,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};
use wanda_core::{
    audio::AnalyserTap,
    transport::{
        AudioChunk, PeerConfig, PeerConnection, PeerState, PeerTransport, SideChannel,
        TransportEvent, TransportEventSink,
    },
};
use webrtc::{
    api::{
        APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_OPUS, MediaEngine},
    },
    data_channel::{
        RTCDataChannel, data_channel_init::RTCDataChannelInit,
        data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    },
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState, policy::bundle_policy::RTCBundlePolicy,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::{
        RTCRtpTransceiverInit, rtp_codec::RTCRtpCodecCapability,
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
    },
    track::{
        track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
        track_remote::TrackRemote,
    },
};

/// Remote silence is synthesized when no packet arrives for this long, so the
/// agent's analyser drains like a playing audio element would.
const REMOTE_SILENCE_AFTER: Duration = Duration::from_millis(60);

pub fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

pub fn rtc_configuration(config: &PeerConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: config.ice_servers.clone(),
            ..Default::default()
        }],
        bundle_policy: RTCBundlePolicy::MaxBundle,
        ..Default::default()
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: OPUS_SAMPLE_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

pub struct WebRtcTransport {
    playback: Option<PlaybackQueue>,
}

impl WebRtcTransport {
    /// Remote audio is played through `playback` when given; otherwise it is
    /// only analysed.
    pub fn new(playback: Option<PlaybackQueue>) -> Self {
        Self { playback }
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    #[instrument(skip_all, fields(generation = events.generation()))]
    async fn connect(
        &self,
        config: PeerConfig,
        events: TransportEventSink,
        remote_audio: AnalyserTap,
    ) -> Result<Box<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(&config))
                .await
                .context("failed to create peer connection")?,
        );

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(%state, "peer connection state");
            state_events.emit(TransportEvent::ConnectionState(peer_state(state)));
            Box::pin(async {})
        }));

        let track_events = events.clone();
        let playback = self.playback.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            let tap = remote_audio.clone();
            let playback = playback.clone();
            Box::pin(async move {
                info!(ssrc = track.ssrc(), "remote track arrived");
                events.emit(TransportEvent::RemoteTrack);
                tokio::spawn(play_remote_track(track, tap, playback));
            })
        }));

        Ok(Box::new(WebRtcPeer {
            pc,
            events,
            track: Mutex::new(None),
            encoder: Mutex::new(None),
        }))
    }
}

async fn play_remote_track(
    track: Arc<TrackRemote>,
    tap: AnalyserTap,
    playback: Option<PlaybackQueue>,
) {
    let mut decoder = match opus::Decoder::new(OPUS_SAMPLE_RATE, opus::Channels::Mono) {
        Ok(decoder) => decoder,
        Err(e) => {
            error!(error = %e, "failed to create opus decoder");
            return;
        }
    };
    let mut resampler = match &playback {
        Some(queue) => match StreamResampler::new(OPUS_SAMPLE_RATE, queue.sample_rate(), OPUS_FRAME_SAMPLES) {
            Ok(resampler) => Some(resampler),
            Err(e) => {
                warn!(error = %e, "cannot resample for the speaker, playback disabled");
                None
            }
        },
        None => None,
    };
    let silence = vec![0.0f32; OPUS_FRAME_SAMPLES];
    let mut pcm = vec![0i16; OPUS_MAX_FRAME_SAMPLES];

    loop {
        let packet = match tokio::time::timeout(REMOTE_SILENCE_AFTER, track.read_rtp()).await {
            Ok(Ok((packet, _))) => packet,
            Ok(Err(e)) => {
                debug!(error = %e, "remote track ended");
                break;
            }
            Err(_) => {
                tap.push_f32(&silence);
                continue;
            }
        };
        if packet.payload.is_empty() {
            continue;
        }
        let decoded = match decoder.decode(&packet.payload, &mut pcm, false) {
            Ok(n) => &pcm[..n],
            Err(e) => {
                warn!(error = %e, "dropping undecodable opus packet");
                continue;
            }
        };
        tap.push_i16(decoded);

        if let (Some(queue), Some(resampler)) = (&playback, resampler.as_mut()) {
            match resampler.process(&convert_i16_to_f32(decoded)) {
                Ok(samples) => queue.push(&samples),
                Err(e) => warn!(error = %e, "failed to resample remote audio"),
            }
        }
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: TransportEventSink,
    track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
    encoder: Mutex<Option<JoinHandle<()>>>,
}

impl WebRtcPeer {
    fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.track.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn stop_encoder(&self) {
        if let Some(task) = self.encoder.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_audio_line(&self) -> Result<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_owned(),
            "wanda-voice".to_owned(),
        ));
        self.pc
            .add_transceiver_from_track(
                Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .context("failed to add audio transceiver")?;
        *self.track.lock().unwrap_or_else(|e| e.into_inner()) = Some(track);
        Ok(())
    }

    async fn attach_microphone(&self, frames: mpsc::UnboundedReceiver<AudioChunk>) -> Result<()> {
        let track = self
            .local_track()
            .ok_or_else(|| anyhow!("no audio line to attach the microphone to"))?;
        let encoder = opus::Encoder::new(
            OPUS_SAMPLE_RATE,
            opus::Channels::Mono,
            opus::Application::Voip,
        )
        .context("failed to create opus encoder")?;

        self.stop_encoder();
        let task = tokio::spawn(send_microphone(frames, encoder, track));
        *self.encoder.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    async fn open_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>> {
        let channel = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .with_context(|| format!("failed to create data channel '{label}'"))?;

        let open_events = self.events.clone();
        channel.on_open(Box::new(move || {
            open_events.emit(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }));
        let message_events = self.events.clone();
        channel.on_message(Box::new(move |message: DataChannelMessage| {
            if message.is_string {
                match String::from_utf8(message.data.to_vec()) {
                    Ok(text) => {
                        message_events.emit(TransportEvent::ChannelMessage(text));
                    }
                    Err(e) => warn!(error = %e, "dropping non-UTF-8 data channel frame"),
                }
            } else {
                debug!(len = message.data.len(), "ignoring binary data channel frame");
            }
            Box::pin(async {})
        }));
        let close_events = self.events.clone();
        channel.on_close(Box::new(move || {
            close_events.emit(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }));

        Ok(Arc::new(DataChannel::spawn(label, channel)))
    }

    async fn create_local_description(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await.context("failed to create offer")?;
        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .context("failed to apply local description")?;
        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("no local description after gathering"))?;
        Ok(local.sdp)
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned()).context("invalid answer")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("failed to apply remote description")?;
        Ok(())
    }

    async fn stop_outbound_tracks(&self) -> Result<()> {
        self.stop_encoder();
        let mut first_error = None;
        for sender in self.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                warn!(error = %e, "failed to stop sender");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.stop_encoder();
        self.pc.close().await.context("failed to close peer connection")?;
        Ok(())
    }
}

async fn send_microphone(
    mut frames: mpsc::UnboundedReceiver<AudioChunk>,
    mut encoder: opus::Encoder,
    track: Arc<TrackLocalStaticSample>,
) {
    let mut resampler: Option<(u32, StreamResampler)> = None;
    let mut framer = Framer::new(OPUS_FRAME_SAMPLES);
    let mut packet = vec![0u8; 4000];
    let frame_duration = Duration::from_millis(20);

    while let Some(chunk) = frames.recv().await {
        if resampler.as_ref().is_none_or(|(rate, _)| *rate != chunk.sample_rate) {
            // Chunk size of 10 ms at the capture rate.
            let chunk_size = (chunk.sample_rate / 100).max(1) as usize;
            match StreamResampler::new(chunk.sample_rate, OPUS_SAMPLE_RATE, chunk_size) {
                Ok(r) => resampler = Some((chunk.sample_rate, r)),
                Err(e) => {
                    error!(error = %e, rate = chunk.sample_rate, "cannot resample microphone audio");
                    return;
                }
            }
        }
        let Some((_, stream)) = resampler.as_mut() else {
            continue;
        };
        let samples = match stream.process(&chunk.samples) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "failed to resample microphone chunk");
                continue;
            }
        };

        for frame in framer.push(&samples) {
            let len = match encoder.encode(&convert_f32_to_i16(&frame), &mut packet) {
                Ok(len) => len,
                Err(e) => {
                    warn!(error = %e, "failed to encode microphone frame");
                    continue;
                }
            };
            let sample = Sample {
                data: Bytes::copy_from_slice(&packet[..len]),
                duration: frame_duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "failed to write microphone sample");
            }
        }
    }
    debug!("microphone frames ended");
}

enum Outbound {
    Text(String),
    Close,
}

/// A data channel whose sends are queued to a writer task, so callers never
/// wait on the network.
pub struct DataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl DataChannel {
    fn spawn(label: &str, channel: Arc<RTCDataChannel>) -> Self {
        let (outbound, mut queue) = mpsc::unbounded_channel();
        let writer = channel.clone();
        tokio::spawn(async move {
            while let Some(item) = queue.recv().await {
                match item {
                    Outbound::Text(text) => {
                        if let Err(e) = writer.send_text(text).await {
                            warn!(error = %e, "failed to write to data channel");
                        }
                    }
                    Outbound::Close => {
                        if let Err(e) = writer.close().await {
                            warn!(error = %e, "failed to close data channel");
                        }
                        break;
                    }
                }
            }
        });
        Self {
            label: label.to_owned(),
            channel,
            outbound,
            closed: AtomicBool::new(false),
        }
    }
}

impl SideChannel for DataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.channel.ready_state() == RTCDataChannelState::Open
    }

    fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(anyhow!("data channel '{}' is not open", self.label));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| anyhow!("data channel writer has stopped"))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.outbound
            .send(Outbound::Close)
            .map_err(|_| anyhow!("data channel writer has stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_mapping() {
        assert_eq!(peer_state(RTCPeerConnectionState::Unspecified), PeerState::New);
        assert_eq!(peer_state(RTCPeerConnectionState::Connected), PeerState::Connected);
        assert_eq!(peer_state(RTCPeerConnectionState::Failed), PeerState::Failed);
    }

    #[test]
    fn test_configuration_uses_max_bundle_and_stun() {
        let config = rtc_configuration(&PeerConfig {
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
        });
        assert_eq!(config.bundle_policy, RTCBundlePolicy::MaxBundle);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn test_opus_capability() {
        let capability = opus_capability();
        assert_eq!(capability.mime_type, MIME_TYPE_OPUS);
        assert_eq!(capability.clock_rate, 48_000);
    }
}
