use crate::{
    audio::{Analyser, AudioAnalysisContext, FrameTicker, SpeechActivityDetector},
    content::ContentService,
    conversation::{ConversationState, ConversationStateMachine},
    error::{ChannelUnavailable, SendError, SetupError},
    event_log::EventLog,
    gateway::RealtimeGateway,
    presentation::display_state,
    settings::SessionSettings,
    tools::{DictionarySectionTool, ToolCall, ToolCallAccumulator, ToolDispatcher, ToolOutcome},
    transcript::{Role, Transcript},
    transport::{
        AudioConstraints, MediaDevices, MicrophoneStream, PeerConfig, PeerConnection,
        PeerState, PeerTransport, SideChannel, TaggedTransportEvent, TransportEvent,
        TransportEventSink,
    },
};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use wanda_realtime_types::{
    ClientEvent, LoggedEvent, Modality, ServerEvent, SessionConfig, decode_server_event,
    encode_client_event, local_timestamp,
};

use super::SessionSnapshot;

/// External collaborators of the engine.
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn RealtimeGateway>,
    pub content: Arc<dyn ContentService>,
    pub transport: Arc<dyn PeerTransport>,
    pub media: Arc<dyn MediaDevices>,
}

/// Content fetched before connecting and seeded into the conversation once
/// the side channel opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadedContext {
    pub reference_content: Option<String>,
    pub dictionary_toc: Option<Value>,
    pub functions_prompt: Option<String>,
}

impl PreloadedContext {
    /// System messages for the configuration handshake, in send order.
    pub fn seed_messages(&self, reference_id: Option<&str>) -> Vec<String> {
        let mut messages = Vec::new();
        if let (Some(id), Some(content)) = (reference_id, self.reference_content.as_deref()) {
            messages.push(format!("Playbook Context for {id}:\n\n{content}"));
        }
        if let Some(toc) = &self.dictionary_toc {
            let pretty = serde_json::to_string_pretty(toc).unwrap_or_else(|_| toc.to_string());
            messages.push(format!("TalentIQ Dictionary TOC:\n\n{pretty}"));
        }
        if let Some(prompt) = &self.functions_prompt {
            messages.push(prompt.clone());
        }
        messages
    }
}

/// Everything opened for one connection attempt.
struct Resources {
    peer: Box<dyn PeerConnection>,
    analysis: AudioAnalysisContext,
    microphone: Option<Box<dyn MicrophoneStream>>,
    channel: Option<Arc<dyn SideChannel>>,
}

impl Resources {
    /// Releases every resource. Each step runs even if an earlier one failed.
    async fn release(mut self) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.close() {
                warn!(error = %e, "failed to close side channel");
            }
        }
        if let Err(e) = self.peer.stop_outbound_tracks().await {
            warn!(error = %e, "failed to stop outbound tracks");
        }
        if let Err(e) = self.peer.close().await {
            warn!(error = %e, "failed to close peer connection");
        }
        if !self.analysis.close() {
            debug!("audio analysis context was already closed");
        }
        if let Some(mut microphone) = self.microphone.take() {
            if let Err(e) = microphone.stop() {
                warn!(error = %e, "failed to release microphone");
            }
        }
    }

    async fn abort(self, error: SetupError) -> SetupError {
        error!(error = %error, "session setup failed, releasing partial session");
        self.release().await;
        error
    }
}

struct Session {
    resources: Resources,
    local_analyser: Analyser,
    remote_analyser: Analyser,
    reference_id: Option<String>,
    context: PreloadedContext,
}

impl Session {
    fn open_channel(&self) -> Option<Arc<dyn SideChannel>> {
        self.resources
            .channel
            .as_ref()
            .filter(|channel| channel.is_open())
            .cloned()
    }
}

/// Owns the live session and every piece of conversation state.
///
/// The controller is the only writer of protocol events onto the side
/// channel. All of its methods run on one task; nothing here is shared.
pub struct SessionController {
    deps: SessionDeps,
    settings: SessionSettings,
    dispatcher: ToolDispatcher,
    events_tx: mpsc::UnboundedSender<TaggedTransportEvent>,
    generation: u64,
    session: Option<Session>,
    is_active: bool,
    microphone_muted: bool,
    conversation: ConversationStateMachine,
    transcript: Transcript,
    tool_calls: ToolCallAccumulator,
    log: EventLog,
    user_detector: SpeechActivityDetector,
    agent_detector: SpeechActivityDetector,
    scratch: Vec<u8>,
}

impl SessionController {
    /// Creates a controller whose transports report to `events_tx`. The
    /// dictionary-section tool is registered against `deps.content`.
    pub fn new(
        deps: SessionDeps,
        settings: SessionSettings,
        events_tx: mpsc::UnboundedSender<TaggedTransportEvent>,
    ) -> Self {
        let dispatcher = ToolDispatcher::new()
            .with_handler(Arc::new(DictionarySectionTool::new(deps.content.clone())));
        Self {
            user_detector: SpeechActivityDetector::new(settings.speech),
            agent_detector: SpeechActivityDetector::new(settings.speech),
            scratch: Vec::with_capacity(settings.analyser_window),
            deps,
            settings,
            dispatcher,
            events_tx,
            generation: 0,
            session: None,
            is_active: false,
            microphone_muted: false,
            conversation: ConversationStateMachine::new(),
            transcript: Transcript::new(),
            tool_calls: ToolCallAccumulator::new(),
            log: EventLog::new(),
        }
    }

    /// Replaces the tool registry.
    pub fn with_dispatcher(mut self, dispatcher: ToolDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn content_service(&self) -> Arc<dyn ContentService> {
        self.deps.content.clone()
    }

    /// Identifies the current session's transport events. Changes on every
    /// start and stop.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the side channel has opened for the current session.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn reference_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.reference_id.as_deref())
    }

    pub fn preloaded_context(&self) -> Option<&PreloadedContext> {
        self.session.as_ref().map(|s| &s.context)
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.conversation.state()
    }

    pub fn live_transcript(&self) -> &str {
        self.conversation.live_transcript()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn tool_calls(&self) -> &ToolCallAccumulator {
        &self.tool_calls
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_detector.is_speaking()
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.agent_detector.is_speaking()
    }

    pub fn is_microphone_muted(&self) -> bool {
        self.microphone_muted
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let coarse = self.conversation.state();
        let user = self.is_user_speaking();
        let agent = self.is_agent_speaking();
        SessionSnapshot {
            is_active: self.is_active,
            reference_id: self.reference_id().map(str::to_owned),
            conversation_state: coarse,
            display_state: display_state(coarse, user, agent),
            is_user_speaking: user,
            is_agent_speaking: agent,
            is_microphone_muted: self.microphone_muted,
            transcript: self.transcript.entries().to_vec(),
            live_transcript: self.conversation.live_transcript().to_string(),
            event_count: self.log.len(),
        }
    }

    pub async fn list_references(&self) -> anyhow::Result<Vec<String>> {
        self.deps.content.list_references().await
    }

    /// Starts a session, tearing down any existing one first.
    ///
    /// On error nothing from the attempt is left open and the previous
    /// session is already gone.
    #[instrument(skip(self), fields(generation))]
    pub async fn start_session(&mut self, reference_id: Option<String>) -> Result<(), SetupError> {
        self.stop_session().await;
        self.log.clear();
        tracing::Span::current().record("generation", self.generation);

        let reference_id = reference_id.filter(|id| !id.is_empty());
        let context =
            preload_context(&self.deps.content, &self.settings, reference_id.as_deref()).await;

        match self.establish(reference_id.as_deref()).await {
            Ok((resources, local_analyser, remote_analyser)) => {
                info!(reference_id = ?reference_id, "session established");
                self.session = Some(Session {
                    resources,
                    local_analyser,
                    remote_analyser,
                    reference_id,
                    context,
                });
                Ok(())
            }
            Err(e) => {
                // Anything the failed attempt still has in flight is now stale.
                self.generation = self.generation.wrapping_add(1);
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        reference_id: Option<&str>,
    ) -> Result<(Resources, Analyser, Analyser), SetupError> {
        let credential = self
            .deps
            .gateway
            .mint_credential(reference_id)
            .await
            .map_err(SetupError::Credential)?;
        debug!(model = %credential.model, "credential minted");

        let analysis = AudioAnalysisContext::new();
        let (local_tap, local_analyser) = analysis.create_analyser(self.settings.analyser_window);
        let (remote_tap, remote_analyser) = analysis.create_analyser(self.settings.analyser_window);

        let config = PeerConfig {
            ice_servers: self.settings.ice_servers.clone(),
        };
        let sink = TransportEventSink::new(self.generation, self.events_tx.clone());
        let peer = match self.deps.transport.connect(config, sink, remote_tap).await {
            Ok(peer) => peer,
            Err(e) => {
                analysis.close();
                return Err(SetupError::Negotiation(e));
            }
        };
        let mut resources = Resources {
            peer,
            analysis,
            microphone: None,
            channel: None,
        };

        if let Err(e) = resources.peer.add_audio_line().await {
            return Err(resources.abort(SetupError::Negotiation(e)).await);
        }

        let microphone = self
            .deps
            .media
            .open_microphone(AudioConstraints::default(), local_tap)
            .await;
        let microphone = match microphone {
            Ok(microphone) => resources.microphone.insert(microphone),
            Err(e) => return Err(resources.abort(SetupError::Microphone(e)).await),
        };
        let Some(frames) = microphone.take_frames() else {
            let e = anyhow::anyhow!("microphone stream has no frames to attach");
            return Err(resources.abort(SetupError::Microphone(e)).await);
        };
        if let Err(e) = resources.peer.attach_microphone(frames).await {
            return Err(resources.abort(SetupError::Negotiation(e)).await);
        }

        match resources
            .peer
            .open_side_channel(&self.settings.channel_label)
            .await
        {
            Ok(channel) => resources.channel = Some(channel),
            Err(e) => return Err(resources.abort(SetupError::Negotiation(e)).await),
        }

        let offer = match resources.peer.create_local_description().await {
            Ok(offer) => offer,
            Err(e) => return Err(resources.abort(SetupError::Negotiation(e)).await),
        };
        let answer = match self.deps.gateway.exchange_sdp(&credential, &offer).await {
            Ok(answer) => answer,
            Err(e) => return Err(resources.abort(SetupError::Negotiation(e)).await),
        };
        if let Err(e) = resources.peer.apply_remote_answer(&answer).await {
            return Err(resources.abort(SetupError::Negotiation(e)).await);
        }

        Ok((resources, local_analyser, remote_analyser))
    }

    /// Tears down the current session, if any, and resets all state.
    /// Calling it again is a no-op apart from the state reset.
    #[instrument(skip(self))]
    pub async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!("stopping session");
            session.resources.release().await;
        }
        self.generation = self.generation.wrapping_add(1);
        self.is_active = false;
        self.microphone_muted = false;
        self.conversation.reset();
        self.transcript.clear();
        self.tool_calls.clear();
        self.user_detector.reset();
        self.agent_detector.reset();
    }

    /// Sends an event, logging instead of failing when it cannot be sent.
    /// Returns whether the event went out.
    pub fn send_event(&mut self, event: ClientEvent) -> bool {
        match self.try_send_event(event) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to send client event");
                false
            }
        }
    }

    /// Sends an event over the open side channel.
    ///
    /// The identifier is assigned before encoding; the log entry, with its
    /// local timestamp, is only recorded after the frame was handed to the
    /// channel.
    pub fn try_send_event(&mut self, mut event: ClientEvent) -> Result<(), SendError> {
        let event_type = event.event_type();
        let channel = self
            .session
            .as_ref()
            .and_then(Session::open_channel)
            .ok_or(ChannelUnavailable { event_type })?;

        let wire = encode_client_event(&mut event)?;
        channel
            .send(wire)
            .map_err(|source| SendError::Transport { event_type, source })?;

        debug!(event_type, event_id = ?event.event_id(), "sent client event");
        self.log
            .record(LoggedEvent::outbound(&event, local_timestamp()));
        Ok(())
    }

    /// Sends typed user text, interrupting the agent if it is speaking.
    pub fn send_text_message(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.agent_detector.is_speaking() {
            self.send_event(ClientEvent::response_cancel());
            self.agent_detector.reset();
        }
        if !self.send_event(ClientEvent::user_message(text)) {
            return;
        }
        // An interrupted response never sends its final transcript.
        self.transcript.end_turn(Role::Agent);
        self.transcript.finalize(Role::User, text);
        self.send_event(ClientEvent::response_create());
    }

    /// Enables or disables the outbound microphone track.
    pub fn set_microphone_muted(&mut self, muted: bool) {
        if let Some(microphone) = self
            .session
            .as_mut()
            .and_then(|s| s.resources.microphone.as_mut())
        {
            microphone.set_enabled(!muted);
            self.microphone_muted = muted;
            info!(muted, "microphone toggled");
        } else {
            debug!(muted, "no microphone to toggle");
        }
    }

    pub fn toggle_microphone(&mut self) -> bool {
        self.set_microphone_muted(!self.microphone_muted);
        self.microphone_muted
    }

    /// Handles one notification from the transport of the current session.
    /// Returns tool calls that are ready to dispatch.
    pub fn handle_transport_event(&mut self, tagged: TaggedTransportEvent) -> Vec<ToolCall> {
        if tagged.generation != self.generation || self.session.is_none() {
            debug!(
                generation = tagged.generation,
                current = self.generation,
                "ignoring transport event from a previous session"
            );
            return Vec::new();
        }
        match tagged.event {
            TransportEvent::ChannelOpen => {
                self.on_channel_open();
                Vec::new()
            }
            TransportEvent::ChannelMessage(text) => self.handle_channel_message(&text),
            TransportEvent::ChannelClosed => {
                info!("side channel closed");
                self.is_active = false;
                Vec::new()
            }
            TransportEvent::RemoteTrack => {
                info!("remote audio track attached");
                Vec::new()
            }
            TransportEvent::ConnectionState(state) => {
                match state {
                    PeerState::Failed | PeerState::Disconnected => {
                        warn!(?state, "peer connection state changed")
                    }
                    _ => info!(?state, "peer connection state changed"),
                }
                Vec::new()
            }
        }
    }

    /// Marks the session active and sends the configuration handshake.
    fn on_channel_open(&mut self) {
        info!("side channel open, configuring session");
        self.is_active = true;
        self.log.clear();

        self.send_event(ClientEvent::session_update(SessionConfig {
            modalities: Some(vec![Modality::Audio, Modality::Text]),
            turn_detection: Some(self.settings.turn_detection.clone()),
            ..Default::default()
        }));
        if !self.dispatcher.is_empty() {
            self.send_event(ClientEvent::session_update(SessionConfig {
                tools: Some(self.dispatcher.definitions()),
                tool_choice: Some("auto".to_string()),
                ..Default::default()
            }));
        }

        let seeds = self
            .session
            .as_ref()
            .map(|s| s.context.seed_messages(s.reference_id.as_deref()))
            .unwrap_or_default();
        for text in seeds {
            self.send_event(ClientEvent::system_message(text));
        }
    }

    /// Decodes, logs and applies one inbound text frame.
    pub fn handle_channel_message(&mut self, text: &str) -> Vec<ToolCall> {
        let received_at = local_timestamp();
        match decode_server_event(text) {
            Ok(mut inbound) => {
                inbound.stamp_receipt(&received_at);
                if inbound.event.is_unknown() {
                    debug!(event_type = inbound.event_type(), "unhandled server event");
                }
                let calls = self.apply_server_event(&inbound.event);
                self.log
                    .record(LoggedEvent::inbound(inbound.raw, received_at));
                calls
            }
            Err(e) => {
                warn!(error = %e, "could not decode server event");
                if let Some(raw) = e.into_raw() {
                    self.log.record(LoggedEvent::inbound(raw, received_at));
                }
                Vec::new()
            }
        }
    }

    fn apply_server_event(&mut self, event: &ServerEvent) -> Vec<ToolCall> {
        if let Some(state) = self.conversation.apply(event) {
            debug!(%state, "conversation state changed");
        }

        match event {
            ServerEvent::ResponseCreated { .. } => {
                self.transcript.end_turn(Role::Agent);
            }
            ServerEvent::SpeechStarted { .. } => {
                self.transcript.end_turn(Role::User);
            }
            ServerEvent::ResponseAudioTranscriptDelta { delta, .. } => {
                self.transcript.append_delta(Role::Agent, delta);
            }
            ServerEvent::ResponseAudioTranscriptDone { transcript, .. } => {
                self.transcript.finalize(Role::Agent, transcript);
            }
            ServerEvent::InputTranscriptionDelta { delta, .. } => {
                self.transcript.append_delta(Role::User, delta);
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                self.transcript.finalize(Role::User, transcript);
            }
            ServerEvent::ResponseOutputItemAdded { item, .. } if item.is_function_call() => {
                match item.call_identifier() {
                    Some(call_id) => self
                        .tool_calls
                        .begin(call_id, item.name.as_deref().unwrap_or_default()),
                    None => warn!("function call item without an identifier"),
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { call_id, delta, .. } => {
                self.tool_calls.append(call_id, delta);
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                arguments,
                name,
                ..
            } => {
                let call = self
                    .tool_calls
                    .finish(call_id, arguments.as_deref(), name.as_deref());
                return vec![call];
            }
            ServerEvent::Error { error, .. } => {
                warn!(
                    message = %error.message,
                    kind = ?error.kind,
                    code = ?error.code,
                    "server reported an error"
                );
            }
            _ => {}
        }
        Vec::new()
    }

    /// Reports a dispatched call's outcome to the model and asks it to
    /// continue. The call's buffer is dropped last, whatever happened.
    pub fn complete_tool_call(&mut self, call_id: &str, outcome: &ToolOutcome) {
        self.send_event(ClientEvent::function_call_output(
            call_id,
            outcome.to_output_string(),
        ));
        self.send_event(ClientEvent::response_create());
        self.tool_calls.remove(call_id);
    }

    /// Dispatches a call and reports its outcome in one step.
    pub async fn run_tool_call(&mut self, call: ToolCall) -> ToolOutcome {
        let outcome = self.dispatcher.dispatch(&call).await;
        self.complete_tool_call(&call.call_id, &outcome);
        outcome
    }

    /// Ticker for the per-frame analysis loop of the current session.
    pub fn frame_ticker(&self) -> Option<FrameTicker> {
        self.session.as_ref().and_then(|s| {
            let analysis = &s.resources.analysis;
            analysis
                .is_open()
                .then(|| analysis.frame_ticker(self.settings.frame_interval))
        })
    }

    /// Runs both speech-activity detectors on the current frame. Returns
    /// whether either speaking flag changed.
    pub fn on_analysis_tick(&mut self, now: Instant) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !session.resources.analysis.is_open() {
            return false;
        }

        session.local_analyser.time_domain_data(&mut self.scratch);
        let user = self.user_detector.analyse(&self.scratch, now);
        session.remote_analyser.time_domain_data(&mut self.scratch);
        let agent = self.agent_detector.analyse(&self.scratch, now);

        if let Some(speaking) = user {
            debug!(speaking, "user speech activity changed");
        }
        if let Some(speaking) = agent {
            debug!(speaking, "agent speech activity changed");
        }
        user.is_some() || agent.is_some()
    }
}

/// Fetches the seed content for a session. Failures degrade to empty values.
async fn preload_context(
    content: &Arc<dyn ContentService>,
    settings: &SessionSettings,
    reference_id: Option<&str>,
) -> PreloadedContext {
    let limit = settings.reference_content_limit;
    let fallback = &settings.fallback_system_prompt;

    let reference = async {
        let id = reference_id?;
        match content.fetch_reference(id).await {
            Ok(full) => Some(full.chars().take(limit).collect::<String>())
                .filter(|c| !c.is_empty()),
            Err(e) => {
                warn!(reference_id = id, error = %e, "failed to preload reference content");
                None
            }
        }
    };
    let toc = async {
        match content.dictionary_toc().await {
            Ok(Value::Null) => None,
            Ok(Value::String(s)) if s.is_empty() => None,
            Ok(toc) => Some(toc),
            Err(e) => {
                warn!(error = %e, "failed to preload dictionary table of contents");
                None
            }
        }
    };
    let prompt = async {
        match content.functions_system_prompt().await {
            Ok(prompt) if !prompt.trim().is_empty() => prompt,
            Ok(_) => fallback.clone(),
            Err(e) => {
                warn!(error = %e, "failed to preload functions system prompt, using fallback");
                fallback.clone()
            }
        }
    };

    let (reference_content, dictionary_toc, functions_prompt) =
        tokio::join!(reference, toc, prompt);
    PreloadedContext {
        reference_content,
        dictionary_toc,
        functions_prompt: Some(functions_prompt).filter(|p| !p.is_empty()),
    }
}
