//! The single cooperative loop driving a [`SessionController`].
//!
//! User commands, transport notifications, tool completions and analysis
//! frames are all handled on one task, one at a time, so the controller's
//! state never needs a lock. Tool handlers run concurrently as futures polled
//! by the loop; their results re-enter it like any other event.

use super::{SessionController, SessionDeps, SessionSnapshot};
use crate::{
    audio::FrameTicker,
    error::SetupError,
    settings::SessionSettings,
    tools::{ToolCall, ToolOutcome},
    transport::TaggedTransportEvent,
};
use anyhow::{Result, anyhow};
use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument};
use wanda_realtime_types::ClientEvent;

#[derive(Debug)]
pub enum SessionCommand {
    Start {
        reference_id: Option<String>,
        reply: Option<oneshot::Sender<Result<(), SetupError>>>,
    },
    Stop,
    SendText(String),
    SetMicrophoneMuted(bool),
    ToggleMicrophone,
    /// Sends a raw client event over the side channel.
    SendEvent(ClientEvent),
    ListReferences {
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Shutdown,
}

/// Cloneable front end to a running [`SessionRuntime`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("session runtime has shut down"))
    }

    /// Starts a session and waits until it is established or has failed.
    pub async fn start(&self, reference_id: Option<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Start {
            reference_id,
            reply: Some(reply),
        })?;
        rx.await
            .map_err(|_| anyhow!("session runtime dropped the start request"))??;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SendText(text.into()))
    }

    pub fn set_microphone_muted(&self, muted: bool) -> Result<()> {
        self.send(SessionCommand::SetMicrophoneMuted(muted))
    }

    pub fn toggle_microphone(&self) -> Result<()> {
        self.send(SessionCommand::ToggleMicrophone)
    }

    pub fn send_event(&self, event: ClientEvent) -> Result<()> {
        self.send(SessionCommand::SendEvent(event))
    }

    pub async fn list_references(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::ListReferences { reply })?;
        rx.await
            .map_err(|_| anyhow!("session runtime dropped the request"))?
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

type PendingToolCall = BoxFuture<'static, (u64, String, ToolOutcome)>;

pub struct SessionRuntime {
    controller: SessionController,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedReceiver<TaggedTransportEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionRuntime {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> (Self, SessionHandle) {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self::with_controller(SessionController::new(deps, settings, events_tx), events)
    }

    /// Wraps an existing controller. `events` must be the receiving half of
    /// the channel the controller was created with.
    pub fn with_controller(
        controller: SessionController,
        events: mpsc::UnboundedReceiver<TaggedTransportEvent>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(controller.snapshot());
        let runtime = Self {
            controller,
            commands,
            events,
            snapshots,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (runtime, handle)
    }

    /// Runs until shut down or until every handle is dropped. The session,
    /// if any, is stopped on the way out.
    #[instrument(name = "session_runtime", skip_all)]
    pub async fn run(mut self) {
        let mut pending: FuturesUnordered<PendingToolCall> = FuturesUnordered::new();
        let mut ticker: Option<FrameTicker> = None;

        loop {
            let mut changed = true;
            tokio::select! {
                // Commands from the user.
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, &mut ticker).await {
                        break;
                    }
                },
                // Notifications from the current (or a stale) transport.
                Some(tagged) = self.events.recv() => {
                    for call in self.controller.handle_transport_event(tagged) {
                        pending.push(self.dispatch(call));
                    }
                },
                // Finished tool calls.
                Some((generation, call_id, outcome)) = pending.next(), if !pending.is_empty() => {
                    if generation == self.controller.generation() {
                        self.controller.complete_tool_call(&call_id, &outcome);
                    } else {
                        debug!(%call_id, "dropping tool result from a previous session");
                    }
                },
                // One analysis frame, while the analysis context is open.
                tick = next_tick(&mut ticker), if ticker.is_some() => {
                    match tick {
                        Some(now) => changed = self.controller.on_analysis_tick(now),
                        None => {
                            debug!("analysis context closed, stopping frame loop");
                            ticker = None;
                        }
                    }
                },
            }
            if changed {
                self.publish();
            }
        }

        self.controller.stop_session().await;
        self.publish();
        info!("session runtime stopped");
    }

    /// Returns `false` when the loop should exit.
    async fn handle_command(
        &mut self,
        command: SessionCommand,
        ticker: &mut Option<FrameTicker>,
    ) -> bool {
        match command {
            SessionCommand::Start {
                reference_id,
                reply,
            } => {
                let result = self.controller.start_session(reference_id).await;
                *ticker = self.controller.frame_ticker();
                if let Err(e) = &result {
                    error!(error = %e, "failed to start session");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SessionCommand::Stop => {
                self.controller.stop_session().await;
                *ticker = None;
            }
            SessionCommand::SendText(text) => self.controller.send_text_message(&text),
            SessionCommand::SetMicrophoneMuted(muted) => {
                self.controller.set_microphone_muted(muted)
            }
            SessionCommand::ToggleMicrophone => {
                self.controller.toggle_microphone();
            }
            SessionCommand::SendEvent(event) => {
                self.controller.send_event(event);
            }
            SessionCommand::ListReferences { reply } => {
                let content = self.controller.content_service();
                tokio::spawn(async move {
                    let _ = reply.send(content.list_references().await);
                });
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    fn dispatch(&self, call: ToolCall) -> PendingToolCall {
        let generation = self.controller.generation();
        self.controller
            .dispatcher()
            .spawn_dispatch(call)
            .map(move |(call_id, outcome)| (generation, call_id, outcome))
            .boxed()
    }

    fn publish(&self) {
        let next = self.controller.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_tick(ticker: &mut Option<FrameTicker>) -> Option<Instant> {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
