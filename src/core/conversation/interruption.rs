//! Barge-in handling.
//!
//! When the user starts speaking while the assistant is responding, playing
//! audio or running a tool, the controller stops the assistant and returns
//! the protocol messages that make the server agree. It never touches the
//! pending tool calls: their results are still delivered when they finish.

use tracing::info;

use super::phase::{ConversationPhase, PhaseChange};
use super::session::ConversationSession;
use super::transcript::{ConversationTranscript, TranscriptEntry, TranscriptRole};
use crate::core::audio::{PlaybackControl, PlaybackCut};
use crate::core::realtime::messages::ClientEvent;

/// What an interruption did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterruptionReport {
    pub cancelled_response: Option<String>,
    pub playback_cut: Option<PlaybackCut>,
    pub phase_change: Option<PhaseChange>,
    pub closed_entry: Option<TranscriptEntry>,
}

/// Whether a speech start should interrupt the assistant.
pub fn should_interrupt(session: &ConversationSession, playback_active: bool) -> bool {
    session.has_active_response()
        || session.is_model_responding()
        || playback_active
        || session.tool_executing()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptionController {
    /// The peer transport keeps a server-side output buffer that needs clearing
    clears_output_buffer: bool,
}

impl InterruptionController {
    pub fn new(clears_output_buffer: bool) -> Self {
        Self {
            clears_output_buffer,
        }
    }

    /// Stop the assistant.
    ///
    /// Local state changes happen here; the returned events are sent by the
    /// caller one by one, each regardless of whether the previous send failed.
    /// Calling this again with nothing active only re-sends the input clear.
    pub fn interrupt(
        &self,
        session: &mut ConversationSession,
        playback: &dyn PlaybackControl,
        transcript: &mut ConversationTranscript,
    ) -> (InterruptionReport, Vec<ClientEvent>) {
        let mut report = InterruptionReport::default();
        let mut events = Vec::with_capacity(4);

        session.set_model_responding(false);

        report.playback_cut = playback.halt();

        if let Some(handle) = session.take_response() {
            events.push(ClientEvent::ResponseCancel {
                response_id: handle.id.clone(),
            });
            report.cancelled_response = handle.id;
        }

        events.push(ClientEvent::InputAudioBufferClear);
        if self.clears_output_buffer {
            events.push(ClientEvent::OutputAudioBufferClear);
        }
        if let Some(cut) = report.playback_cut.as_ref() {
            events.push(ClientEvent::ConversationItemTruncate {
                item_id: cut.item_id.clone(),
                content_index: 0,
                audio_end_ms: cut.played.as_millis() as u64,
            });
        }

        report.phase_change = session.force_phase(ConversationPhase::Listening);
        report.closed_entry = transcript.close_streaming(TranscriptRole::Assistant);

        info!(
            response_id = report.cancelled_response.as_deref().unwrap_or("-"),
            pending_calls = session.pending_count(),
            played_ms = report
                .playback_cut
                .as_ref()
                .map(|c| c.played.as_millis() as u64)
                .unwrap_or(0),
            "Assistant interrupted"
        );

        (report, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::session::PendingToolCall;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct FakePlayback {
        active: Mutex<bool>,
        item: Mutex<Option<(String, Duration)>>,
        halts: Mutex<usize>,
    }

    impl PlaybackControl for FakePlayback {
        fn halt(&self) -> Option<PlaybackCut> {
            *self.halts.lock() += 1;
            *self.active.lock() = false;
            self.item
                .lock()
                .take()
                .map(|(item_id, played)| PlaybackCut { item_id, played })
        }

        fn is_active(&self) -> bool {
            *self.active.lock()
        }
    }

    fn speaking_session() -> ConversationSession {
        let mut session = ConversationSession::default();
        session.begin_response(Some("R1".into()));
        session.force_phase(ConversationPhase::Speaking);
        session
    }

    #[test]
    fn test_should_interrupt() {
        let idle = ConversationSession::default();
        assert!(!should_interrupt(&idle, false));
        assert!(should_interrupt(&idle, true));
        assert!(should_interrupt(&speaking_session(), false));

        let mut tool = ConversationSession::default();
        tool.add_pending(PendingToolCall {
            call_id: "A".into(),
            tool_name: "t".into(),
            started_at: Instant::now(),
        });
        assert!(should_interrupt(&tool, false));
    }

    #[test]
    fn test_interrupt_speaking_response() {
        let mut session = speaking_session();
        let playback = FakePlayback::default();
        *playback.active.lock() = true;
        *playback.item.lock() = Some(("item_9".into(), Duration::from_millis(1_250)));
        let mut transcript = ConversationTranscript::new();
        transcript.append_delta(TranscriptRole::Assistant, "Your flight leaves at");

        let controller = InterruptionController::new(false);
        let (report, events) = controller.interrupt(&mut session, &playback, &mut transcript);

        assert_eq!(report.cancelled_response.as_deref(), Some("R1"));
        assert_eq!(
            report.phase_change,
            Some(PhaseChange {
                from: ConversationPhase::Speaking,
                to: ConversationPhase::Listening
            })
        );
        assert!(!report.closed_entry.unwrap().is_streaming);
        assert_eq!(
            events,
            vec![
                ClientEvent::ResponseCancel {
                    response_id: Some("R1".into())
                },
                ClientEvent::InputAudioBufferClear,
                ClientEvent::ConversationItemTruncate {
                    item_id: "item_9".into(),
                    content_index: 0,
                    audio_end_ms: 1_250,
                },
            ]
        );
        assert!(session.active_response_id().is_none());
        assert!(!session.is_model_responding());
        assert!(!playback.is_active());
    }

    #[test]
    fn test_unnamed_response_cancelled_without_id() {
        let mut session = ConversationSession::default();
        session.begin_response(None);
        let playback = FakePlayback::default();
        let mut transcript = ConversationTranscript::new();

        let (report, events) =
            InterruptionController::default().interrupt(&mut session, &playback, &mut transcript);
        assert!(report.cancelled_response.is_none());
        assert_eq!(events[0], ClientEvent::ResponseCancel { response_id: None });
        assert!(!session.has_active_response());
    }

    #[test]
    fn test_peer_transport_also_clears_output_buffer() {
        let mut session = speaking_session();
        let playback = FakePlayback::default();
        let mut transcript = ConversationTranscript::new();

        let (_, events) =
            InterruptionController::new(true).interrupt(&mut session, &playback, &mut transcript);
        assert!(events.contains(&ClientEvent::OutputAudioBufferClear));
    }

    #[test]
    fn test_interrupt_is_idempotent_and_keeps_tools() {
        let mut session = speaking_session();
        session.add_pending(PendingToolCall {
            call_id: "A".into(),
            tool_name: "get_weather".into(),
            started_at: Instant::now(),
        });
        let playback = FakePlayback::default();
        let mut transcript = ConversationTranscript::new();
        let controller = InterruptionController::default();

        controller.interrupt(&mut session, &playback, &mut transcript);
        let first = session.snapshot();
        let (report, events) = controller.interrupt(&mut session, &playback, &mut transcript);

        assert_eq!(session.snapshot(), first);
        assert_eq!(first.phase, ConversationPhase::Listening);
        assert!(first.response_id.is_none());
        assert_eq!(first.pending_calls, vec!["A"]);
        assert!(report.cancelled_response.is_none());
        assert!(report.phase_change.is_none());
        assert_eq!(events, vec![ClientEvent::InputAudioBufferClear]);
        assert_eq!(*playback.halts.lock(), 2);
    }
}
