//! The control loop.
//!
//! One task owns the conversation session, the transcript and the tool
//! orchestrator. Inbound frames are handled strictly in receipt order;
//! tool completions, engine commands and playback notifications are
//! serialized through the same `select!`.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::audio::{AudioFormat, AudioSegment, PlaybackControl, PlaybackEvent, PlaybackScheduler};
use crate::core::conversation::{
    ConversationPhase, ConversationSession, ConversationTranscript, InterruptionController,
    PhaseChange, PhaseEvent, SessionSnapshot, ToolCallOrchestrator, ToolCompletion,
    TranscriptEntry, TranscriptRole, Utterance, should_interrupt,
};
use crate::core::realtime::messages::{
    ApiError, ClientEvent, ConversationItem, DecodedFrame, ProtocolErrorClass, ResponseInfo,
    ServerEvent, decode_server_frame,
};
use crate::core::realtime::session::language_patch;
use crate::core::realtime::transport::{InboundFrame, OutboundFrame};
use crate::core::realtime::{EngineObservers, EngineStatus};

/// Requests from the engine handle to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineCommand {
    /// Typed user message
    SendText(String),
    /// Switch the reply language mid-session
    SetLanguage(String),
    /// Request a response with the given instructions
    Respond(String),
    /// Stop the assistant as if the user had started speaking
    Interrupt,
}

/// Why the control loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Cancelled,
    TransportClosed(Option<String>),
}

/// Receivers drained by the control loop.
pub(crate) struct LoopInputs {
    pub inbound: mpsc::Receiver<InboundFrame>,
    pub completions: mpsc::UnboundedReceiver<ToolCompletion>,
    pub commands: mpsc::UnboundedReceiver<EngineCommand>,
    pub playback: mpsc::UnboundedReceiver<PlaybackEvent>,
}

pub(crate) struct ControlLoop {
    pub session: ConversationSession,
    pub transcript: Arc<RwLock<ConversationTranscript>>,
    pub orchestrator: ToolCallOrchestrator,
    pub interruption: InterruptionController,
    pub playback: PlaybackScheduler,
    pub phase: Arc<watch::Sender<ConversationPhase>>,
    pub snapshot: Arc<watch::Sender<SessionSnapshot>>,
    pub observers: EngineObservers,
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Base instructions the reply-language rule is appended to
    pub instructions: String,
    /// Commit and request responses locally on accepted utterances
    pub manual_turns: bool,
}

impl ControlLoop {
    pub async fn run(
        mut self,
        buffered: Vec<InboundFrame>,
        mut inputs: LoopInputs,
        cancel: CancellationToken,
    ) -> LoopExit {
        self.publish_snapshot();

        let mut exit = None;
        for frame in buffered {
            if let Some(stop) = self.handle_inbound(frame).await {
                exit = Some(stop);
                break;
            }
        }

        let exit = match exit {
            Some(exit) => exit,
            None => loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break LoopExit::Cancelled,

                    frame = inputs.inbound.recv() => {
                        let Some(frame) = frame else {
                            break LoopExit::TransportClosed(None);
                        };
                        if let Some(stop) = self.handle_inbound(frame).await {
                            break stop;
                        }
                    }

                    Some(completion) = inputs.completions.recv() => {
                        self.handle_completion(completion).await;
                    }

                    Some(command) = inputs.commands.recv() => {
                        self.handle_command(command).await;
                    }

                    Some(event) = inputs.playback.recv() => {
                        self.handle_playback(event).await;
                    }
                }
            },
        };

        self.teardown().await;
        info!(exit = ?exit, "Control loop stopped");
        exit
    }

    // =========================================================================
    // Inbound frames
    // =========================================================================

    async fn handle_inbound(&mut self, frame: InboundFrame) -> Option<LoopExit> {
        match frame {
            InboundFrame::Text(text) => match decode_server_frame(&text) {
                DecodedFrame::Event(event) => self.handle_event(event).await,
                DecodedFrame::Unknown { event_type } => {
                    debug!(event_type = %event_type, "Ignoring unknown server event");
                }
                DecodedFrame::Malformed { event_type, error } => {
                    warn!(event_type = ?event_type, error = %error, "Skipping malformed server event");
                }
            },
            InboundFrame::Audio(pcm) => {
                // Track audio carries no ids; it belongs to the active response
                if self.session.has_active_response() {
                    let response_id = self.session.active_response_id().map(str::to_string);
                    self.accept_audio(response_id, None, pcm).await;
                }
            }
            InboundFrame::Closed(reason) => {
                error!(reason = ?reason, "Transport closed");
                return Some(LoopExit::TransportClosed(reason));
            }
        }
        self.publish_snapshot();
        None
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Error { error } => self.handle_error(error).await,

            ServerEvent::SessionCreated { session } => {
                debug!(session_id = ?session.id, "Late session.created ignored");
            }
            ServerEvent::SessionUpdated { .. } => {
                debug!("Session configuration updated");
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                if should_interrupt(&self.session, self.playback.is_active()) {
                    self.interrupt().await;
                }
                let transition = self.session.apply(PhaseEvent::SpeechStarted { audio_start_ms });
                self.publish_phase(transition.change).await;
            }
            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                let transition = self.session.apply(PhaseEvent::SpeechStopped { audio_end_ms });
                self.publish_phase(transition.change).await;
                match transition.utterance {
                    Some(Utterance::Accepted { duration_ms }) => {
                        debug!(duration_ms = ?duration_ms, "Utterance accepted");
                        if self.manual_turns {
                            self.send(ClientEvent::InputAudioBufferCommit).await;
                            self.send(ClientEvent::response_create()).await;
                        }
                    }
                    Some(Utterance::TooShort { duration_ms }) => {
                        info!(duration_ms, "Utterance too short, still listening");
                    }
                    None => {}
                }
            }
            ServerEvent::InputAudioBufferCommitted { item_id, .. } => {
                debug!(item_id = ?item_id, "Input audio committed");
            }
            ServerEvent::InputAudioBufferCleared {} => {
                trace!("Input audio buffer cleared");
            }

            ServerEvent::ConversationItemCreated { item, .. } => {
                if let Some(item) = item.as_ref() {
                    self.orchestrator.record_item(item);
                    trace!(item_id = ?item.id, item_type = %item.item_type, "Conversation item created");
                }
            }
            ServerEvent::InputTranscriptionDelta { delta, .. } => {
                if !delta.is_empty() {
                    let entry = self.transcript.write().append_delta(TranscriptRole::User, &delta);
                    self.observers.transcript_appended(entry).await;
                }
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                let entry = self
                    .transcript
                    .write()
                    .finish(TranscriptRole::User, Some(&transcript));
                self.notify_entry(entry).await;
            }
            ServerEvent::InputTranscriptionFailed { item_id, error } => {
                warn!(
                    item_id = ?item_id,
                    message = error.as_ref().map(|e| e.message.as_str()).unwrap_or("-"),
                    "User transcription failed"
                );
                let entry = self.transcript.write().close_streaming(TranscriptRole::User);
                self.notify_entry(entry).await;
            }
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
            } => {
                debug!(item_id = ?item_id, audio_end_ms = ?audio_end_ms, "Assistant item truncated");
            }

            ServerEvent::ResponseCreated { response } => {
                let id = response.id;
                info!(response_id = ?id, phase = %self.session.phase(), "Response created");
                if let Some(previous) = self.session.begin_response(id) {
                    debug!(response_id = ?previous.id, "Replaced unfinished response");
                }
                let transition = self.session.apply(PhaseEvent::ResponseCreated);
                self.publish_phase(transition.change).await;
            }
            ServerEvent::ResponseDone { response } => {
                self.finish_response(response).await;
            }
            ServerEvent::ResponseCancelled { response_id } => {
                self.finish_response(ResponseInfo {
                    id: response_id,
                    status: Some("cancelled".to_string()),
                    status_details: None,
                    output: Vec::new(),
                    usage: None,
                })
                .await;
            }

            ServerEvent::OutputItemAdded { item, .. } => {
                self.orchestrator.record_item(&item);
            }
            ServerEvent::OutputItemDone { item, .. } => {
                trace!(item_id = ?item.id, "Output item done");
            }

            ServerEvent::OutputAudioDelta {
                response_id,
                item_id,
                delta,
            } => {
                if !self.session.is_active_response(response_id.as_deref()) {
                    trace!(response_id = ?response_id, "Dropping audio from inactive response");
                    return;
                }
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(pcm) => self.accept_audio(response_id, item_id, Bytes::from(pcm)).await,
                    Err(e) => warn!(error = %e, "Failed to decode audio delta"),
                }
            }
            ServerEvent::OutputAudioDone { response_id, .. } => {
                if self.session.is_active_response(response_id.as_deref()) {
                    self.playback.flush();
                }
            }

            ServerEvent::OutputAudioTranscriptDelta {
                response_id, delta, ..
            }
            | ServerEvent::OutputTextDelta {
                response_id, delta, ..
            } => {
                if !self.session.is_active_response(response_id.as_deref()) || delta.is_empty() {
                    return;
                }
                let entry = self
                    .transcript
                    .write()
                    .append_delta(TranscriptRole::Assistant, &delta);
                self.observers.transcript_appended(entry).await;
                let transition = self.session.apply(PhaseEvent::OutputStarted);
                self.publish_phase(transition.change).await;
            }
            ServerEvent::OutputAudioTranscriptDone {
                response_id,
                transcript: text,
                ..
            }
            | ServerEvent::OutputTextDone {
                response_id, text, ..
            } => {
                if !self.session.is_active_response(response_id.as_deref()) {
                    return;
                }
                let entry = self
                    .transcript
                    .write()
                    .finish(TranscriptRole::Assistant, text.as_deref());
                self.notify_entry(entry).await;
            }

            ServerEvent::FunctionCallArgumentsDelta { call_id, delta, .. } => {
                trace!(call_id = ?call_id, len = delta.len(), "Function call arguments delta");
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                self.orchestrator
                    .begin(&mut self.session, call_id, name, arguments);
            }

            ServerEvent::OutputAudioBufferStarted { response_id } => {
                debug!(response_id = ?response_id, "Server playout started");
            }
            ServerEvent::OutputAudioBufferStopped { response_id } => {
                debug!(response_id = ?response_id, "Server playout stopped");
            }
            ServerEvent::OutputAudioBufferCleared { response_id } => {
                debug!(response_id = ?response_id, "Server playout cleared");
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in &rate_limits {
                    trace!(name = %limit.name, remaining = limit.remaining, "Rate limit");
                }
            }
        }
    }

    async fn handle_error(&mut self, error: ApiError) {
        match error.classify() {
            ProtocolErrorClass::DuplicateResponse => {
                debug!(message = %error.message, "Response already active, ignoring");
            }
            ProtocolErrorClass::NothingToCancel => {
                debug!(message = %error.message, "Nothing to cancel, ignoring");
            }
            ProtocolErrorClass::BufferTooSmall => {
                warn!(message = %error.message, "Input buffer too small, resetting utterance timing");
                self.session.reset_utterance_timing();
            }
            ProtocolErrorClass::Surfaced => {
                warn!(code = ?error.code, message = %error.message, "Server reported an error");
                self.observers
                    .status(EngineStatus::ProtocolError {
                        code: error.code,
                        message: error.message,
                    })
                    .await;
            }
        }
    }

    async fn finish_response(&mut self, response: ResponseInfo) {
        let id = response.id.as_deref();
        let Some(handle) = self.session.finish_response(id) else {
            debug!(response_id = ?id, "Completion for inactive response ignored");
            return;
        };

        let status = response.status.as_deref().unwrap_or("completed");
        info!(
            response_id = ?handle.id,
            status,
            elapsed_ms = handle.created_at.elapsed().as_millis() as u64,
            "Response finished"
        );

        self.playback.flush();
        let entry = self
            .transcript
            .write()
            .close_streaming(TranscriptRole::Assistant);
        self.notify_entry(entry).await;

        let transition = self.session.apply(PhaseEvent::ResponseCompleted);
        self.publish_phase(transition.change).await;

        if status == "failed" {
            let message = response
                .status_details
                .map(|details| details.to_string())
                .unwrap_or_else(|| "response failed".to_string());
            self.observers
                .status(EngineStatus::ProtocolError {
                    code: None,
                    message,
                })
                .await;
        }
    }

    async fn accept_audio(
        &mut self,
        response_id: Option<String>,
        item_id: Option<String>,
        pcm: Bytes,
    ) {
        let segment = AudioSegment::new(pcm, AudioFormat::wire()).with_origin(response_id, item_id);
        if !self.playback.enqueue(segment) {
            return;
        }
        let transition = self.session.apply(PhaseEvent::OutputStarted);
        self.publish_phase(transition.change).await;
    }

    // =========================================================================
    // Tool completions, commands, playback
    // =========================================================================

    async fn handle_completion(&mut self, completion: ToolCompletion) {
        let Some(events) = self.orchestrator.complete(&mut self.session, &completion) else {
            debug!(call_id = %completion.call_id, "Late tool completion dropped");
            return;
        };
        self.publish_snapshot();
        for event in events {
            self.send(event).await;
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SendText(text) => {
                if should_interrupt(&self.session, self.playback.is_active()) {
                    self.interrupt().await;
                }
                let entry = self.transcript.write().push(TranscriptRole::User, &text);
                self.observers.transcript_appended(entry).await;
                self.send(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::user_text(text),
                    previous_item_id: None,
                })
                .await;
                self.send(ClientEvent::response_create()).await;
            }
            EngineCommand::SetLanguage(language) => {
                info!(language = %language, "Changing reply language");
                self.send(language_patch(&self.instructions, &language)).await;
            }
            EngineCommand::Respond(instructions) => {
                self.send(ClientEvent::response_with_instructions(instructions))
                    .await;
            }
            EngineCommand::Interrupt => self.interrupt().await,
        }
        self.publish_snapshot();
    }

    async fn handle_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => debug!(phase = %self.session.phase(), "Playback started"),
            PlaybackEvent::Underflow => debug!("Playback underflow"),
            PlaybackEvent::Drained => {
                debug!(phase = %self.session.phase(), "Playback drained, clearing echo from input");
                self.send(ClientEvent::InputAudioBufferClear).await;
                // Capture resumes only after the clear is queued
                if !self.playback.release_activity() {
                    trace!("New audio staged since the drain, capture stays suppressed");
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn interrupt(&mut self) {
        let (report, events) = self.interruption.interrupt(
            &mut self.session,
            &self.playback,
            &mut self.transcript.write(),
        );
        for event in events {
            self.send(event).await;
        }
        self.publish_phase(report.phase_change).await;
        self.notify_entry(report.closed_entry).await;
    }

    /// Send one event. Failures are logged; the inbound side reports the
    /// transport closing.
    async fn send(&self, event: ClientEvent) -> bool {
        let event_type = event.event_type();
        match self.outbound.send(OutboundFrame::Event(event)).await {
            Ok(()) => {
                trace!(event_type, "Sent client event");
                true
            }
            Err(_) => {
                warn!(event_type, "Transport gone, event not sent");
                false
            }
        }
    }

    async fn publish_phase(&self, change: Option<PhaseChange>) {
        let Some(change) = change else {
            return;
        };
        self.phase.send_replace(change.to);
        debug!(from = %change.from, to = %change.to, "Phase changed");
        self.publish_snapshot();
        self.observers.phase_changed(change).await;
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(self.session.snapshot());
    }

    async fn notify_entry(&self, entry: Option<TranscriptEntry>) {
        if let Some(entry) = entry {
            self.observers.transcript_appended(entry).await;
        }
    }

    async fn teardown(&mut self) {
        self.orchestrator.reset();
        let change = self.session.reset();
        let closed: Vec<TranscriptEntry> = {
            let mut transcript = self.transcript.write();
            [TranscriptRole::User, TranscriptRole::Assistant]
                .into_iter()
                .filter_map(|role| transcript.close_streaming(role))
                .collect()
        };
        for entry in closed {
            self.observers.transcript_appended(entry).await;
        }
        self.publish_phase(change).await;
        self.publish_snapshot();
    }
}
