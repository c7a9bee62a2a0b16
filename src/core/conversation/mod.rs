//! Conversation state: phase machine, response and tool bookkeeping,
//! transcript, tool dispatch and barge-in handling.
//!
//! Everything here is owned and mutated by the control loop task only.

pub mod interruption;
pub mod phase;
pub mod session;
pub mod tools;
pub mod transcript;

pub use interruption::{InterruptionController, InterruptionReport, should_interrupt};
pub use phase::{
    ConversationPhase, DEFAULT_MIN_UTTERANCE_MS, PhaseChange, PhaseEvent, PhaseMachine,
    Transition, Utterance,
};
pub use session::{ConversationSession, PendingToolCall, ResponseHandle, SessionSnapshot};
pub use tools::{NoTools, ToolCallOrchestrator, ToolCompletion, ToolExecutor, ToolOutcome};
pub use transcript::{ConversationTranscript, TranscriptEntry, TranscriptRole};
