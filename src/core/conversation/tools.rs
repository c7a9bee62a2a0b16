//! Tool-call orchestration.
//!
//! Calls are dispatched to the [`ToolExecutor`] on their own task. Only the
//! completion travels back to the control loop, through an mpsc channel, so
//! pending-set bookkeeping stays single-threaded.
//!
//! Panics inside an executor are caught and delivered to the model as a
//! failed result, as are timeouts when one is configured.
//!
//! Shutdown never aborts an executor: a call still running when the session
//! ends finishes, and its result is discarded.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::session::{ConversationSession, PendingToolCall};
use crate::core::realtime::messages::{ClientEvent, ConversationItem};

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    /// Result text, or the error message when `success` is false
    pub payload: String,
}

impl ToolOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            success: true,
            payload: payload.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: message.into(),
        }
    }

    /// The single text payload handed to the model.
    ///
    /// Failures become `{"error": "<message>"}`.
    pub fn to_output(&self) -> String {
        if self.success {
            self.payload.clone()
        } else {
            serde_json::json!({ "error": self.payload }).to_string()
        }
    }
}

/// Runs tools on behalf of the model.
///
/// `arguments` is the raw JSON string from the model, unvalidated.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: &str) -> ToolOutcome;
}

/// Executor for sessions without tools; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn execute(&self, name: &str, _arguments: &str) -> ToolOutcome {
        ToolOutcome::failure(format!("Unknown tool: {}", name))
    }
}

/// A finished call on its way back to the control loop.
#[derive(Debug, Clone)]
pub struct ToolCompletion {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub elapsed: Duration,
}

pub struct ToolCallOrchestrator {
    executor: Arc<dyn ToolExecutor>,
    /// call_id -> tool name, recorded from `response.output_item.added`
    names: HashMap<String, String>,
    completions: mpsc::UnboundedSender<ToolCompletion>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ToolCallOrchestrator {
    /// Create an orchestrator and the receiver its completions arrive on.
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<ToolCompletion>) {
        let (completions, rx) = mpsc::unbounded_channel();
        (
            Self {
                executor,
                names: HashMap::new(),
                completions,
                timeout,
                cancel,
            },
            rx,
        )
    }

    /// Remember the tool name announced for a function call item.
    pub fn record_item(&mut self, item: &ConversationItem) {
        if !item.is_function_call() {
            return;
        }
        if let (Some(call_id), Some(name)) = (item.call_id.as_ref(), item.name.as_ref()) {
            debug!(call_id = %call_id, tool = %name, "Function call announced");
            self.names.insert(call_id.clone(), name.clone());
        }
    }

    /// Register a call in the pending set and dispatch it.
    ///
    /// Returns `None` if the call id is already pending.
    pub fn begin(
        &mut self,
        session: &mut ConversationSession,
        call_id: String,
        name: Option<String>,
        arguments: String,
    ) -> Option<PendingToolCall> {
        let recorded = self.names.remove(&call_id);
        let tool_name = name
            .filter(|n| !n.is_empty())
            .or(recorded)
            .unwrap_or_else(|| "unknown".to_string());

        let call = PendingToolCall {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            started_at: Instant::now(),
        };
        if !session.add_pending(call.clone()) {
            warn!(call_id = %call_id, "Duplicate function call ignored");
            return None;
        }

        info!(call_id = %call_id, tool = %tool_name, "Dispatching tool call");
        self.spawn(call_id, tool_name, arguments, call.started_at);
        Some(call)
    }

    fn spawn(&self, call_id: String, tool_name: String, arguments: String, started_at: Instant) {
        let executor = Arc::clone(&self.executor);
        let completions = self.completions.clone();
        let timeout = self.timeout;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let run = AssertUnwindSafe(executor.execute(&tool_name, &arguments)).catch_unwind();
            let guarded = async {
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(result) => result,
                        Err(_) => Ok(ToolOutcome::failure(format!(
                            "Tool timed out after {}ms",
                            limit.as_millis()
                        ))),
                    },
                    None => run.await,
                }
            };

            let outcome = match guarded.await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(call_id = %call_id, tool = %tool_name, message = %message, "Tool panicked");
                    ToolOutcome::failure(format!("Tool panicked: {}", message))
                }
            };
            if cancel.is_cancelled() {
                debug!(call_id = %call_id, tool = %tool_name, "Tool call finished after shutdown, result dropped");
                return;
            }

            let completion = ToolCompletion {
                call_id,
                tool_name,
                outcome,
                elapsed: started_at.elapsed(),
            };
            // Receiver gone means the session ended
            let _ = completions.send(completion);
        });
    }

    /// Settle a completion against the pending set.
    ///
    /// Returns the events to send, or `None` for a late completion whose call
    /// is no longer pending.
    pub fn complete(
        &self,
        session: &mut ConversationSession,
        completion: &ToolCompletion,
    ) -> Option<Vec<ClientEvent>> {
        session.complete_pending(&completion.call_id)?;

        info!(
            call_id = %completion.call_id,
            tool = %completion.tool_name,
            success = completion.outcome.success,
            elapsed_ms = completion.elapsed.as_millis() as u64,
            "Tool call completed"
        );

        Some(vec![
            ClientEvent::ConversationItemCreate {
                item: ConversationItem::function_call_output(
                    completion.call_id.clone(),
                    completion.outcome.to_output(),
                ),
                previous_item_id: None,
            },
            ClientEvent::response_create(),
        ])
    }

    /// Forget recorded names, used on teardown.
    pub fn reset(&mut self) {
        self.names.clear();
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
