//! Conversation state owned by the control loop.
//!
//! One `ConversationSession` replaces what would otherwise be a set of
//! loosely coordinated flags: the phase machine, the model-responding bit,
//! the active response handle and the pending tool calls all change under
//! the same `&mut` borrow, so they cannot drift apart.

use std::collections::HashMap;
use std::time::Instant;

use super::phase::{ConversationPhase, PhaseChange, PhaseEvent, PhaseMachine, Transition};

/// The single outstanding model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHandle {
    /// `None` when the server announced the response without an id
    pub id: Option<String>,
    pub created_at: Instant,
}

/// A tool call dispatched to the executor and not yet completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub started_at: Instant,
}

/// Read-only view published to the engine after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: ConversationPhase,
    pub model_responding: bool,
    pub response_id: Option<String>,
    /// Sorted call ids of pending tool calls
    pub pending_calls: Vec<String>,
    pub tool_executing: bool,
}

#[derive(Debug, Default)]
pub struct ConversationSession {
    machine: PhaseMachine,
    model_responding: bool,
    response: Option<ResponseHandle>,
    pending_calls: HashMap<String, PendingToolCall>,
}

impl ConversationSession {
    pub fn new(min_utterance_ms: u64) -> Self {
        Self {
            machine: PhaseMachine::new(min_utterance_ms),
            ..Default::default()
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        self.machine.phase()
    }

    pub fn apply(&mut self, event: PhaseEvent) -> Transition {
        self.machine.apply(event)
    }

    pub fn force_phase(&mut self, phase: ConversationPhase) -> Option<PhaseChange> {
        self.machine.force(phase)
    }

    pub fn reset_utterance_timing(&mut self) {
        self.machine.reset_timing();
    }

    pub fn is_model_responding(&self) -> bool {
        self.model_responding
    }

    pub fn set_model_responding(&mut self, responding: bool) {
        self.model_responding = responding;
    }

    // --- response handle ---

    pub fn active_response_id(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.id.as_deref())
    }

    pub fn has_active_response(&self) -> bool {
        self.response.is_some()
    }

    /// Whether `id` belongs to the active response.
    ///
    /// Events without a response id are attributed to the active response
    /// when there is one, as is everything while the active id is unknown.
    pub fn is_active_response(&self, id: Option<&str>) -> bool {
        match (self.response.as_ref(), id) {
            (None, _) => false,
            (Some(ResponseHandle { id: Some(active), .. }), Some(id)) => active == id,
            (Some(_), _) => true,
        }
    }

    /// Record a newly created response, replacing any previous handle.
    pub fn begin_response(&mut self, id: Option<String>) -> Option<ResponseHandle> {
        self.model_responding = true;
        self.response.replace(ResponseHandle {
            id,
            created_at: Instant::now(),
        })
    }

    /// Clear the handle if `id` is the active response.
    pub fn finish_response(&mut self, id: Option<&str>) -> Option<ResponseHandle> {
        if !self.is_active_response(id) {
            return None;
        }
        self.model_responding = false;
        self.response.take()
    }

    /// Clear the handle unconditionally, used by interruption.
    pub fn take_response(&mut self) -> Option<ResponseHandle> {
        self.response.take()
    }

    // --- pending tool calls ---

    /// Add a call to the pending set. Returns false for a duplicate call id.
    pub fn add_pending(&mut self, call: PendingToolCall) -> bool {
        if self.pending_calls.contains_key(&call.call_id) {
            return false;
        }
        self.pending_calls.insert(call.call_id.clone(), call);
        true
    }

    /// Remove a call on its own completion.
    pub fn complete_pending(&mut self, call_id: &str) -> Option<PendingToolCall> {
        self.pending_calls.remove(call_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Derived from the pending set, never stored separately.
    pub fn tool_executing(&self) -> bool {
        !self.pending_calls.is_empty()
    }

    /// Drop pending calls, the response handle and timing; phase goes to idle.
    pub fn reset(&mut self) -> Option<PhaseChange> {
        self.pending_calls.clear();
        self.response = None;
        self.model_responding = false;
        self.machine.reset_timing();
        self.machine.force(ConversationPhase::Idle)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut pending_calls: Vec<String> = self.pending_calls.keys().cloned().collect();
        pending_calls.sort();
        SessionSnapshot {
            phase: self.phase(),
            model_responding: self.model_responding,
            response_id: self.active_response_id().map(str::to_string),
            tool_executing: self.tool_executing(),
            pending_calls,
        }
    }
}
