//! In-memory stand-ins for the network, the peer connection and the
//! microphone, all reporting into one shared [`World`].

#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use wanda_core::{
    audio::AnalyserTap,
    content::ContentService,
    gateway::{EphemeralCredential, RealtimeGateway},
    session::{SessionController, SessionDeps},
    settings::SessionSettings,
    tools::ToolCall,
    transport::{
        AudioChunk, AudioConstraints, MediaDevices, MicrophoneStream, PeerConfig, PeerConnection,
        PeerTransport, SideChannel, TaggedTransportEvent, TransportEvent, TransportEventSink,
    },
};

/// Setup steps that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Credential,
    Connect,
    AudioLine,
    Microphone,
    SideChannel,
    Offer,
    Exchange,
    Answer,
}

#[derive(Default)]
pub struct World {
    pub ops: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<String>>,
    pub channel_open: AtomicBool,
    pub sink: Mutex<Option<TransportEventSink>>,
    pub remote_tap: Mutex<Option<AnalyserTap>>,
    pub mic_tap: Mutex<Option<AnalyserTap>>,
    pub mic_enabled: AtomicBool,
    pub fail_at: Mutex<Option<Step>>,
    pub fail_teardown: AtomicBool,
    pub section_requests: Mutex<Vec<String>>,
    pub reference_content: Mutex<Option<String>>,
    pub content_down: AtomicBool,
}

impl World {
    fn op(&self, name: impl Into<String>) {
        self.ops.lock().unwrap().push(name.into());
    }

    fn fails(&self, step: Step) -> bool {
        *self.fail_at.lock().unwrap() == Some(step)
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn fail_at(&self, step: Step) {
        *self.fail_at.lock().unwrap() = Some(step);
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Emits a transport event through the sink of the latest connection.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.sink.lock().unwrap().clone().expect("no connection yet");
        sink.emit(event);
    }

    /// Fills the remote analyser window with agent audio at the given level.
    pub fn play_remote(&self, level: f32) {
        let tap = self.remote_tap.lock().unwrap().clone().expect("no remote tap");
        tap.push_f32(&square_wave(level));
    }

    pub fn speak_into_microphone(&self, level: f32) {
        let tap = self.mic_tap.lock().unwrap().clone().expect("no microphone tap");
        tap.push_f32(&square_wave(level));
    }
}

fn square_wave(level: f32) -> Vec<f32> {
    (0..4096)
        .map(|i| if i % 2 == 0 { level } else { -level })
        .collect()
}

pub struct FakeGateway(pub Arc<World>);

#[async_trait]
impl RealtimeGateway for FakeGateway {
    async fn mint_credential(&self, reference_id: Option<&str>) -> Result<EphemeralCredential> {
        self.0.op(format!("mint:{}", reference_id.unwrap_or("-")));
        if self.0.fails(Step::Credential) {
            bail!("token endpoint returned 500");
        }
        Ok(EphemeralCredential {
            token: "ek_test".into(),
            model: "gpt-4o-realtime-preview-2025-06-03".into(),
        })
    }

    async fn exchange_sdp(&self, credential: &EphemeralCredential, offer_sdp: &str) -> Result<String> {
        self.0.op(format!("exchange:{}:{}", credential.token, offer_sdp));
        if self.0.fails(Step::Exchange) {
            bail!("description exchange returned 401");
        }
        Ok("v=0 answer".into())
    }
}

pub struct FakeContent(pub Arc<World>);

#[async_trait]
impl ContentService for FakeContent {
    async fn list_references(&self) -> Result<Vec<String>> {
        Ok(vec!["chad_vyhlidal".into(), "jake_playbook".into()])
    }

    async fn fetch_reference(&self, reference_id: &str) -> Result<String> {
        if self.0.content_down.load(Ordering::SeqCst) {
            bail!("content service unavailable");
        }
        Ok(self
            .0
            .reference_content
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("# {reference_id}")))
    }

    async fn dictionary_toc(&self) -> Result<Value> {
        if self.0.content_down.load(Ordering::SeqCst) {
            bail!("content service unavailable");
        }
        Ok(json!([{ "id": "grit", "title": "Grit", "subsections": [] }]))
    }

    async fn dictionary_section(&self, section_id: &str) -> Result<Value> {
        self.0
            .section_requests
            .lock()
            .unwrap()
            .push(section_id.to_string());
        if section_id == "missing" {
            bail!("section not found");
        }
        Ok(json!({ "id": section_id, "body": "Grit is..." }))
    }

    async fn functions_system_prompt(&self) -> Result<String> {
        if self.0.content_down.load(Ordering::SeqCst) {
            bail!("content service unavailable");
        }
        Ok("Use get_talentiq_dictionary_section for definitions.".into())
    }
}

pub struct FakeTransport(pub Arc<World>);

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn connect(
        &self,
        config: PeerConfig,
        events: TransportEventSink,
        remote_audio: AnalyserTap,
    ) -> Result<Box<dyn PeerConnection>> {
        self.0.op(format!("connect:{}", config.ice_servers.join(",")));
        if self.0.fails(Step::Connect) {
            bail!("could not create peer connection");
        }
        *self.0.sink.lock().unwrap() = Some(events);
        *self.0.remote_tap.lock().unwrap() = Some(remote_audio);
        Ok(Box::new(FakePeer(self.0.clone())))
    }
}

pub struct FakePeer(Arc<World>);

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_audio_line(&self) -> Result<()> {
        self.0.op("add_audio_line");
        if self.0.fails(Step::AudioLine) {
            bail!("no audio transceiver");
        }
        Ok(())
    }

    async fn attach_microphone(&self, _frames: mpsc::UnboundedReceiver<AudioChunk>) -> Result<()> {
        self.0.op("attach_microphone");
        Ok(())
    }

    async fn open_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>> {
        self.0.op(format!("open_side_channel:{label}"));
        if self.0.fails(Step::SideChannel) {
            bail!("data channel refused");
        }
        Ok(Arc::new(FakeChannel {
            world: self.0.clone(),
            label: label.to_string(),
        }))
    }

    async fn create_local_description(&self) -> Result<String> {
        self.0.op("create_local_description");
        if self.0.fails(Step::Offer) {
            bail!("gathering failed");
        }
        Ok("v=0 offer".into())
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        self.0.op(format!("apply_remote_answer:{sdp}"));
        if self.0.fails(Step::Answer) {
            bail!("answer rejected");
        }
        Ok(())
    }

    async fn stop_outbound_tracks(&self) -> Result<()> {
        self.0.op("stop_outbound_tracks");
        if self.0.fail_teardown.load(Ordering::SeqCst) {
            bail!("track already gone");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0.op("close_peer");
        Ok(())
    }
}

pub struct FakeChannel {
    world: Arc<World>,
    label: String,
}

impl SideChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.world.channel_open.load(Ordering::SeqCst)
    }

    fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(anyhow!("channel is not open"));
        }
        self.world.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.world.op("close_channel");
        self.world.channel_open.store(false, Ordering::SeqCst);
        if self.world.fail_teardown.load(Ordering::SeqCst) {
            bail!("channel already closed");
        }
        Ok(())
    }
}

pub struct FakeMedia(pub Arc<World>);

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn open_microphone(
        &self,
        constraints: AudioConstraints,
        tap: AnalyserTap,
    ) -> Result<Box<dyn MicrophoneStream>> {
        self.0.op(format!(
            "open_microphone:{}:{}:{}",
            constraints.echo_cancellation, constraints.noise_suppression, constraints.auto_gain_control
        ));
        if self.0.fails(Step::Microphone) {
            bail!("permission denied");
        }
        *self.0.mic_tap.lock().unwrap() = Some(tap);
        self.0.mic_enabled.store(true, Ordering::SeqCst);
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(FakeMicrophone {
            world: self.0.clone(),
            frames: Some(rx),
            stopped: false,
        }))
    }
}

pub struct FakeMicrophone {
    world: Arc<World>,
    frames: Option<mpsc::UnboundedReceiver<AudioChunk>>,
    stopped: bool,
}

impl MicrophoneStream for FakeMicrophone {
    fn set_enabled(&mut self, enabled: bool) {
        self.world.mic_enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.world.mic_enabled.load(Ordering::SeqCst)
    }

    fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<AudioChunk>> {
        self.frames.take()
    }

    fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.world.op("stop_microphone");
        }
        Ok(())
    }
}

pub fn deps(world: &Arc<World>) -> SessionDeps {
    SessionDeps {
        gateway: Arc::new(FakeGateway(world.clone())),
        content: Arc::new(FakeContent(world.clone())),
        transport: Arc::new(FakeTransport(world.clone())),
        media: Arc::new(FakeMedia(world.clone())),
    }
}

/// A controller wired to fakes, plus the receiving end of its transport
/// events so tests can pump them by hand.
pub struct Harness {
    pub controller: SessionController,
    pub events: mpsc::UnboundedReceiver<TaggedTransportEvent>,
    pub world: Arc<World>,
}

impl Harness {
    pub fn new() -> Self {
        let world = Arc::new(World::default());
        let (events_tx, events) = mpsc::unbounded_channel();
        let controller = SessionController::new(deps(&world), SessionSettings::default(), events_tx);
        Self {
            controller,
            events,
            world,
        }
    }

    /// Starts a session and opens its side channel, discarding the
    /// configuration handshake frames.
    pub async fn connected(reference_id: Option<&str>) -> Self {
        let mut harness = Self::new();
        harness
            .controller
            .start_session(reference_id.map(str::to_owned))
            .await
            .unwrap();
        harness.open_channel();
        harness.world.clear_sent();
        harness
    }

    pub fn open_channel(&mut self) {
        self.world.channel_open.store(true, Ordering::SeqCst);
        self.world.emit(TransportEvent::ChannelOpen);
        self.pump();
    }

    /// Hands every queued transport event to the controller.
    pub fn pump(&mut self) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        while let Ok(tagged) = self.events.try_recv() {
            calls.extend(self.controller.handle_transport_event(tagged));
        }
        calls
    }

    pub fn receive(&mut self, event: Value) -> Vec<ToolCall> {
        self.controller.handle_channel_message(&event.to_string())
    }

    /// Drives the agent detector until the agent counts as speaking.
    pub fn make_agent_speak(&mut self) {
        self.world.play_remote(0.5);
        let t0 = Instant::now();
        self.controller.on_analysis_tick(t0);
        self.controller
            .on_analysis_tick(t0 + Duration::from_millis(120));
        assert!(self.controller.is_agent_speaking());
    }
}
