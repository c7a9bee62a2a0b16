//! Voice engine: session lifecycle and the handle the presentation layer
//! drives.
//!
//! ```text
//!  capture ──Audio──▶ outbound ──▶ transport ──▶ inbound ──▶ control loop
//!                                                              │
//!                        renderer ◀── playback ◀── segments ◀──┤
//!                                                              └──▶ tools
//! ```
//!
//! `connect()` mints a credential, opens the transport, completes the
//! readiness handshake and only then starts playback, the control loop and
//! capture. A transport fault after readiness tears the session down and
//! reports it; there is no automatic reconnect.

mod dispatcher;

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::audio::{
    AudioDevices, CaptureMonitor, CapturePipeline, CaptureStats, PlaybackScheduler, PlaybackStats,
    SILENCE_DBFS,
};
use crate::core::conversation::{
    ConversationPhase, ConversationSession, ConversationTranscript, InterruptionController,
    SessionSnapshot, ToolCallOrchestrator, ToolExecutor, TranscriptEntry,
};
use crate::core::realtime::session::{build_session_config, perform_handshake};
use crate::core::realtime::{
    ConnectionState, CredentialProvider, EngineObservers, EngineStatus, RealtimeError,
    RealtimeResult, RealtimeTransport,
};

use dispatcher::{ControlLoop, EngineCommand, LoopExit, LoopInputs};

/// Tasks and handles of one live session.
struct LiveSession {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<EngineCommand>,
    playback: PlaybackScheduler,
    capture: Option<CaptureMonitor>,
    level: Option<watch::Receiver<f32>>,
    control: JoinHandle<()>,
    drain: JoinHandle<()>,
    capture_task: Option<JoinHandle<CaptureStats>>,
}

struct EngineInner {
    config: Arc<EngineConfig>,
    credentials: Arc<dyn CredentialProvider>,
    transport: Mutex<Box<dyn RealtimeTransport>>,
    tools: Arc<dyn ToolExecutor>,
    devices: Arc<dyn AudioDevices>,
    observers: EngineObservers,
    state: watch::Sender<ConnectionState>,
    phase: Arc<watch::Sender<ConversationPhase>>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    transcript: Arc<RwLock<ConversationTranscript>>,
    live: Mutex<Option<LiveSession>>,
}

/// Real-time voice conversation engine.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct VoiceEngine {
    inner: Arc<EngineInner>,
}

impl VoiceEngine {
    pub fn new(
        config: EngineConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Box<dyn RealtimeTransport>,
        tools: Arc<dyn ToolExecutor>,
        devices: Arc<dyn AudioDevices>,
        observers: EngineObservers,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (phase, _) = watch::channel(ConversationPhase::Idle);
        let (snapshot, _) =
            watch::channel(ConversationSession::new(config.min_utterance_ms).snapshot());

        Self {
            inner: Arc::new(EngineInner {
                config: Arc::new(config),
                credentials,
                transport: Mutex::new(transport),
                tools,
                devices,
                observers,
                state,
                phase: Arc::new(phase),
                snapshot: Arc::new(snapshot),
                transcript: Arc::new(RwLock::new(ConversationTranscript::new())),
                live: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Open the session. Does nothing if a session is already live.
    pub async fn connect(&self) -> RealtimeResult<()> {
        let mut live = self.inner.live.lock().await;
        if live.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting).await;

        match self.inner.start_session().await {
            Ok((session, session_id)) => {
                *live = Some(session);
                // Observers may drive the engine from here on
                drop(live);
                self.inner.set_state(ConnectionState::Connected).await;
                self.inner
                    .observers
                    .status(EngineStatus::Ready { session_id })
                    .await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect");
                self.inner.set_state(ConnectionState::Error).await;
                self.inner.transport.lock().await.close().await;
                self.inner.set_state(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&self) {
        let Some(mut session) = self.inner.live.lock().await.take() else {
            return;
        };
        info!("Disconnecting");
        session.cancel.cancel();
        if let Err(e) = (&mut session.control).await {
            warn!(error = %e, "Control loop task failed");
        }
        self.inner.teardown(session).await;
        self.inner.set_state(ConnectionState::Disconnected).await;
    }

    /// Send a typed user message and request a response.
    pub async fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        self.command(EngineCommand::SendText(text.into())).await
    }

    /// Change the reply language for the rest of the session.
    pub async fn set_language(&self, language: impl Into<String>) -> RealtimeResult<()> {
        self.command(EngineCommand::SetLanguage(language.into()))
            .await
    }

    /// Stop the assistant immediately. Safe to call repeatedly.
    pub async fn interrupt(&self) -> RealtimeResult<()> {
        self.command(EngineCommand::Interrupt).await
    }

    async fn command(&self, command: EngineCommand) -> RealtimeResult<()> {
        let live = self.inner.live.lock().await;
        let session = live.as_ref().ok_or(RealtimeError::NotConnected)?;
        session
            .commands
            .send(command)
            .map_err(|_| RealtimeError::NotConnected)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> ConversationPhase {
        *self.inner.phase.borrow()
    }

    /// Watch conversation phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<ConversationPhase> {
        self.inner.phase.subscribe()
    }

    /// Latest view of response and tool-call bookkeeping.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Copy of the transcript so far.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.transcript.read().entries().to_vec()
    }

    pub async fn playback_stats(&self) -> Option<PlaybackStats> {
        let live = self.inner.live.lock().await;
        live.as_ref().map(|session| session.playback.stats())
    }

    pub async fn capture_stats(&self) -> Option<CaptureStats> {
        let live = self.inner.live.lock().await;
        live.as_ref()
            .and_then(|session| session.capture.as_ref())
            .map(CaptureMonitor::stats)
    }

    /// Current microphone level in dBFS, silence when no capture is running.
    pub async fn input_level(&self) -> f32 {
        let live = self.inner.live.lock().await;
        live.as_ref()
            .and_then(|session| session.level.as_ref())
            .map(|level| *level.borrow())
            .unwrap_or(SILENCE_DBFS)
    }
}

impl EngineInner {
    async fn set_state(&self, state: ConnectionState) {
        if self.state.send_replace(state) != state {
            debug!(state = %state, "Connection state changed");
            self.observers.status(EngineStatus::Connection(state)).await;
        }
    }

    /// Bring up a session; returns it with the server's session id.
    async fn start_session(self: &Arc<Self>) -> RealtimeResult<(LiveSession, Option<String>)> {
        let config = Arc::clone(&self.config);

        let credential = self.credentials.fetch_ephemeral_credential().await?;
        debug!(expires_at = ?credential.expires_at(), "Credential minted");

        let (mut channels, clears_output_buffer, kind) = {
            let mut transport = self.transport.lock().await;
            let channels = transport.open(&credential, &config.endpoint()).await?;
            (
                channels,
                transport.supports_output_buffer_clear(),
                transport.kind(),
            )
        };
        info!(transport = %kind, model = %config.model, "Transport open");

        let handshake = perform_handshake(
            &mut channels,
            build_session_config(&config),
            config.handshake_timeout(),
        )
        .await?;
        let session_id = handshake.session_id;
        let buffered = handshake.buffered;

        // Ready: from here on audio may flow
        let cancel = CancellationToken::new();
        let renderer = self.devices.open_renderer()?;
        let playback =
            PlaybackScheduler::new(config.playback_config(), renderer, self.phase.subscribe());
        let (drain, playback_events) = playback.start(cancel.child_token())?;

        let (orchestrator, completions) = ToolCallOrchestrator::new(
            Arc::clone(&self.tools),
            config.tool_timeout(),
            cancel.child_token(),
        );
        self.transcript.write().clear();

        let (commands, command_rx) = mpsc::unbounded_channel();
        let outbound = channels.outbound.clone();
        let control_loop = ControlLoop {
            session: ConversationSession::new(config.min_utterance_ms),
            transcript: Arc::clone(&self.transcript),
            orchestrator,
            interruption: InterruptionController::new(clears_output_buffer),
            playback: playback.clone(),
            phase: Arc::clone(&self.phase),
            snapshot: Arc::clone(&self.snapshot),
            observers: self.observers.clone(),
            outbound: channels.outbound.clone(),
            instructions: config.instructions.clone(),
            manual_turns: config.manual_turns(),
        };
        let inputs = LoopInputs {
            inbound: channels.inbound,
            completions,
            commands: command_rx,
            playback: playback_events,
        };

        let weak = Arc::downgrade(self);
        let loop_cancel = cancel.clone();
        let control = tokio::spawn(async move {
            let exit = control_loop
                .run(buffered, inputs, loop_cancel)
                .await;
            if let LoopExit::TransportClosed(reason) = exit {
                fail(weak, reason).await;
            }
        });

        if let Some(greeting) = config.greeting.as_ref().filter(|g| !g.trim().is_empty()) {
            let _ = commands.send(EngineCommand::Respond(greeting.clone()));
        }

        let (capture, level, capture_task) = match self.devices.open_source() {
            Ok(Some(source)) => {
                let pipeline =
                    CapturePipeline::new(source, self.phase.subscribe(), playback.activity(), outbound);
                let monitor = pipeline.monitor();
                let level = pipeline.level();
                let task = tokio::spawn(pipeline.run(cancel.child_token()));
                (Some(monitor), Some(level), Some(task))
            }
            Ok(None) => {
                debug!("No capture source, text input only");
                (None, None, None)
            }
            Err(e) => {
                warn!(error = %e, "Capture source unavailable, text input only");
                (None, None, None)
            }
        };

        let session = LiveSession {
            cancel,
            commands,
            playback,
            capture,
            level,
            control,
            drain,
            capture_task,
        };
        Ok((session, session_id))
    }

    /// Stop the session's remaining tasks and close the transport.
    /// The control loop must already have stopped or be stopping.
    async fn teardown(&self, session: LiveSession) {
        session.cancel.cancel();
        if let Err(e) = session.drain.await {
            warn!(error = %e, "Playback task failed");
        }
        if let Some(task) = session.capture_task {
            match task.await {
                Ok(stats) => debug!(sent = stats.frames_sent, "Capture task finished"),
                Err(e) => warn!(error = %e, "Capture task failed"),
            }
        }
        self.transport.lock().await.close().await;
    }
}

/// Tear down after the transport went away underneath the control loop.
async fn fail(inner: Weak<EngineInner>, reason: Option<String>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    // A concurrent disconnect already owns the teardown
    let Some(session) = inner.live.lock().await.take() else {
        return;
    };

    let reason = reason.unwrap_or_else(|| "transport closed".to_string());
    error!(reason = %reason, "Session lost");

    // The control loop is this task; only the others are awaited
    inner.teardown(session).await;
    inner.observers.status(EngineStatus::TransportError(reason)).await;
    inner.set_state(ConnectionState::Error).await;
    inner.set_state(ConnectionState::Disconnected).await;
}
