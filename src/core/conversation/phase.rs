//! Conversation phase machine.
//!
//! A pure Mealy machine: every applied event yields the transition it caused
//! (prior and new phase) plus, for speech stop, whether the utterance was
//! long enough to count as a turn. No I/O happens here; the control loop
//! turns outcomes into protocol messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minimum utterance length before a turn is accepted.
pub const DEFAULT_MIN_UTTERANCE_MS: u64 = 500;

/// Phase of the conversation. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationPhase {
    #[default]
    Idle,
    /// The user is speaking
    Listening,
    /// The utterance was accepted and is being committed
    Processing,
    /// A response exists but no output has arrived yet
    Thinking,
    /// Assistant audio or transcript is streaming
    Speaking,
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationPhase::Idle => "idle",
            ConversationPhase::Listening => "listening",
            ConversationPhase::Processing => "processing",
            ConversationPhase::Thinking => "thinking",
            ConversationPhase::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// A phase transition, reported with the phase it left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: ConversationPhase,
    pub to: ConversationPhase,
}

/// Inputs that drive the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    SpeechStarted { audio_start_ms: Option<u64> },
    SpeechStopped { audio_end_ms: Option<u64> },
    ResponseCreated,
    /// First audio or transcript segment of the active response
    OutputStarted,
    /// The active response completed, was cancelled or failed
    ResponseCompleted,
}

/// Verdict on an utterance when speech stops while listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utterance {
    /// Long enough, or of unknown length
    Accepted { duration_ms: Option<u64> },
    /// Shorter than the minimum; the machine stays in listening
    TooShort { duration_ms: u64 },
}

/// Output of one applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    pub change: Option<PhaseChange>,
    pub utterance: Option<Utterance>,
}

impl Transition {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// The phase machine plus the utterance timing it needs.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: ConversationPhase,
    speech_started_at_ms: Option<u64>,
    min_utterance_ms: u64,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_UTTERANCE_MS)
    }
}

impl PhaseMachine {
    pub fn new(min_utterance_ms: u64) -> Self {
        Self {
            phase: ConversationPhase::Idle,
            speech_started_at_ms: None,
            min_utterance_ms,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn min_utterance_ms(&self) -> u64 {
        self.min_utterance_ms
    }

    /// Apply one event and report what it did.
    pub fn apply(&mut self, event: PhaseEvent) -> Transition {
        use ConversationPhase::*;

        match event {
            PhaseEvent::SpeechStarted { audio_start_ms } => {
                self.speech_started_at_ms = audio_start_ms;
                Transition {
                    change: self.move_to(Listening),
                    utterance: None,
                }
            }
            PhaseEvent::SpeechStopped { audio_end_ms } => {
                if self.phase != Listening {
                    return Transition::unchanged();
                }
                let duration_ms = match (self.speech_started_at_ms.take(), audio_end_ms) {
                    (Some(start), Some(end)) => Some(end.saturating_sub(start)),
                    _ => None,
                };
                match duration_ms {
                    Some(ms) if ms < self.min_utterance_ms => Transition {
                        change: None,
                        utterance: Some(Utterance::TooShort { duration_ms: ms }),
                    },
                    _ => Transition {
                        change: self.move_to(Processing),
                        utterance: Some(Utterance::Accepted { duration_ms }),
                    },
                }
            }
            PhaseEvent::ResponseCreated => match self.phase {
                Idle | Listening | Processing => Transition {
                    change: self.move_to(Thinking),
                    utterance: None,
                },
                Thinking | Speaking => Transition::unchanged(),
            },
            PhaseEvent::OutputStarted => match self.phase {
                Thinking => Transition {
                    change: self.move_to(Speaking),
                    utterance: None,
                },
                _ => Transition::unchanged(),
            },
            PhaseEvent::ResponseCompleted => match self.phase {
                Speaking | Thinking | Processing => Transition {
                    change: self.move_to(Idle),
                    utterance: None,
                },
                Idle | Listening => Transition::unchanged(),
            },
        }
    }

    /// Set the phase directly, used by interruption and teardown.
    pub fn force(&mut self, phase: ConversationPhase) -> Option<PhaseChange> {
        self.move_to(phase)
    }

    /// Forget the recorded utterance start.
    pub fn reset_timing(&mut self) {
        self.speech_started_at_ms = None;
    }

    fn move_to(&mut self, to: ConversationPhase) -> Option<PhaseChange> {
        if self.phase == to {
            return None;
        }
        let change = PhaseChange {
            from: self.phase,
            to,
        };
        self.phase = to;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationPhase::*;

    fn started(ms: u64) -> PhaseEvent {
        PhaseEvent::SpeechStarted {
            audio_start_ms: Some(ms),
        }
    }

    fn stopped(ms: u64) -> PhaseEvent {
        PhaseEvent::SpeechStopped {
            audio_end_ms: Some(ms),
        }
    }

    #[test]
    fn test_full_turn() {
        let mut machine = PhaseMachine::default();

        let t = machine.apply(started(1_000));
        assert_eq!(t.change, Some(PhaseChange { from: Idle, to: Listening }));

        let t = machine.apply(stopped(2_200));
        assert_eq!(t.change, Some(PhaseChange { from: Listening, to: Processing }));
        assert_eq!(
            t.utterance,
            Some(Utterance::Accepted {
                duration_ms: Some(1_200)
            })
        );

        let t = machine.apply(PhaseEvent::ResponseCreated);
        assert_eq!(t.change.map(|c| c.to), Some(Thinking));

        let t = machine.apply(PhaseEvent::OutputStarted);
        assert_eq!(t.change.map(|c| c.to), Some(Speaking));

        // Further output is not a transition
        assert_eq!(machine.apply(PhaseEvent::OutputStarted), Transition::default());

        let t = machine.apply(PhaseEvent::ResponseCompleted);
        assert_eq!(t.change, Some(PhaseChange { from: Speaking, to: Idle }));
    }

    #[test]
    fn test_short_utterance_stays_listening() {
        let mut machine = PhaseMachine::default();
        machine.apply(started(500));
        let t = machine.apply(stopped(700));
        assert_eq!(t.change, None);
        assert_eq!(t.utterance, Some(Utterance::TooShort { duration_ms: 200 }));
        assert_eq!(machine.phase(), Listening);
    }

    #[test]
    fn test_unknown_duration_is_accepted() {
        let mut machine = PhaseMachine::new(500);
        machine.apply(PhaseEvent::SpeechStarted {
            audio_start_ms: None,
        });
        let t = machine.apply(stopped(300));
        assert_eq!(t.utterance, Some(Utterance::Accepted { duration_ms: None }));
        assert_eq!(machine.phase(), Processing);
    }

    #[test]
    fn test_speech_start_interrupts_any_phase() {
        for phase in [Idle, Listening, Processing, Thinking, Speaking] {
            let mut machine = PhaseMachine::default();
            machine.force(phase);
            machine.apply(started(0));
            assert_eq!(machine.phase(), Listening, "from {phase}");
        }
    }

    #[test]
    fn test_remote_response_honored_while_listening() {
        let mut machine = PhaseMachine::default();
        machine.apply(started(0));
        let t = machine.apply(PhaseEvent::ResponseCreated);
        assert_eq!(t.change, Some(PhaseChange { from: Listening, to: Thinking }));
    }

    #[test]
    fn test_completion_ignored_when_not_responding() {
        let mut machine = PhaseMachine::default();
        machine.apply(started(0));
        assert_eq!(machine.apply(PhaseEvent::ResponseCompleted).change, None);
        assert_eq!(machine.phase(), Listening);
    }

    #[test]
    fn test_output_before_response_is_ignored() {
        let mut machine = PhaseMachine::default();
        assert_eq!(machine.apply(PhaseEvent::OutputStarted).change, None);
        assert_eq!(machine.phase(), Idle);
    }

    #[test]
    fn test_stop_outside_listening_is_ignored() {
        let mut machine = PhaseMachine::default();
        machine.force(Speaking);
        assert_eq!(machine.apply(stopped(10_000)), Transition::default());
        assert_eq!(machine.phase(), Speaking);
    }

    #[test]
    fn test_reset_timing_makes_next_stop_unknown() {
        let mut machine = PhaseMachine::default();
        machine.apply(started(1_000));
        machine.reset_timing();
        let t = machine.apply(stopped(1_100));
        assert_eq!(t.utterance, Some(Utterance::Accepted { duration_ms: None }));
    }

    #[test]
    fn test_final_phase_is_deterministic() {
        let sequence = [
            started(0),
            stopped(900),
            PhaseEvent::ResponseCreated,
            PhaseEvent::OutputStarted,
            started(2_000),
            stopped(2_100),
            PhaseEvent::ResponseCompleted,
            PhaseEvent::ResponseCreated,
        ];

        for initial in [Idle, Listening, Processing, Thinking, Speaking] {
            let run = || {
                let mut machine = PhaseMachine::default();
                machine.force(initial);
                let changes: Vec<_> = sequence.iter().map(|e| machine.apply(*e)).collect();
                (machine.phase(), changes)
            };
            assert_eq!(run(), run());
        }
    }
}
