//! Realtime API message types.
//!
//! Client and server events are JSON objects discriminated by `type`. Every
//! client frame carries a generated `event_id` (`evt_<uuid>`).
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Push or patch the session configuration
//! - input_audio_buffer.append - Append microphone audio (socket transport)
//! - input_audio_buffer.commit - Commit the buffered utterance
//! - input_audio_buffer.clear - Discard buffered microphone audio
//! - output_audio_buffer.clear - Stop server-side playout (peer transport)
//! - conversation.item.create - Add a user message or tool result
//! - conversation.item.truncate - Cut an assistant item at the played duration
//! - response.create - Request a response
//! - response.cancel - Cancel the active response
//!
//! Server events use the GA names; the beta names are accepted as aliases
//! (`response.audio.delta` for `response.output_audio.delta` and so on).
//!
//! # Decoding
//!
//! [`decode_server_frame`] reads the `type` discriminator first and checks it
//! against [`KNOWN_SERVER_EVENTS`]. Unknown types never reach the typed
//! decoder, so a new server event cannot be mistaken for a malformed one.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::base::{RealtimeResult, ToolDefinition, TurnDetectionConfig};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration in the nested `audio.input` / `audio.output` shape.
///
/// Every field is optional so the same type serves the full push at
/// connect time and incremental patches mid-session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionConfig {
    /// Session type, always "realtime"
    #[serde(rename = "type")]
    pub session_type: String,

    /// Model name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Audio input and output settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl SessionConfig {
    /// An empty patch; only the fields set afterwards are sent.
    pub fn patch() -> Self {
        Self {
            session_type: "realtime".to_string(),
            model: None,
            output_modalities: None,
            instructions: None,
            audio: None,
            tools: None,
            tool_choice: None,
        }
    }
}

/// Audio section of the session configuration.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AudioSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInputSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioOutputSettings>,
}

/// Microphone side of the session.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AudioInputSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioWireFormat>,

    /// Input transcription, enables user transcript events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<InputAudioTranscription>,

    /// Turn detection; `Some(None)` serializes as `null` and disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetectionConfig>>,
}

/// Speaker side of the session.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AudioOutputSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioWireFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Wire audio encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioWireFormat {
    /// MIME-like type, "audio/pcm" for PCM16
    #[serde(rename = "type")]
    pub format_type: String,
    /// Sample rate in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
}

impl AudioWireFormat {
    /// PCM16 LE mono at the given rate.
    pub fn pcm(rate: u32) -> Self {
        Self {
            format_type: "audio/pcm".to_string(),
            rate: Some(rate),
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudioTranscription {
    /// Transcription model
    pub model: String,
    /// ISO-639-1 language hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Tool definition as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl From<&ToolDefinition> for ToolDef {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A typed user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                audio: None,
                transcript: None,
            }]),
            ..Default::default()
        }
    }

    /// The result of a tool call, delivered as a single text payload.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, output_text, output_audio)
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResponseConfig {
    /// Instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<Vec<String>>,
    /// Metadata echoed back in response events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime API.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Push or patch the session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Stop server-side audio playout (peer transport only)
    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate an assistant audio item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u64,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel a response
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        /// Response to cancel; the server picks the active one when absent
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Request a response with default settings.
    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// Request a response with per-response instructions.
    pub fn response_with_instructions(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                instructions: Some(instructions.into()),
                ..Default::default()
            }),
        }
    }

    /// The wire `type` of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::OutputAudioBufferClear => "output_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel { .. } => "response.cancel",
        }
    }

    /// Serialize to a wire frame with a fresh `event_id`.
    pub fn to_frame(&self) -> RealtimeResult<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "event_id".to_string(),
                serde_json::Value::String(format!("evt_{}", Uuid::new_v4().simple())),
            );
        }
        Ok(serde_json::to_string(&value)?)
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Every server event type the dispatcher understands, including beta aliases.
pub static KNOWN_SERVER_EVENTS: phf::Set<&'static str> = phf::phf_set! {
    "error",
    "session.created",
    "session.updated",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.committed",
    "input_audio_buffer.cleared",
    "conversation.item.created",
    "conversation.item.added",
    "conversation.item.input_audio_transcription.delta",
    "conversation.item.input_audio_transcription.completed",
    "conversation.item.input_audio_transcription.failed",
    "conversation.item.truncated",
    "response.created",
    "response.done",
    "response.cancelled",
    "response.output_item.added",
    "response.output_item.done",
    "response.output_audio.delta",
    "response.audio.delta",
    "response.output_audio.done",
    "response.audio.done",
    "response.output_audio_transcript.delta",
    "response.audio_transcript.delta",
    "response.output_audio_transcript.done",
    "response.audio_transcript.done",
    "response.output_text.delta",
    "response.text.delta",
    "response.output_text.done",
    "response.text.done",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "output_audio_buffer.cleared",
    "rate_limits.updated",
};

/// Server events received from the realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created, first frame after the transport opens
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        previous_item_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio buffer cleared
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared {},

    /// Conversation item created
    #[serde(rename = "conversation.item.created", alias = "conversation.item.added")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        #[serde(default)]
        item: Option<ConversationItem>,
    },

    /// Partial user transcript
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Final user transcript
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    /// Input audio transcription failed
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptionFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: Option<ApiError>,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: ResponseInfo,
    },

    /// Response done, in any terminal status
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: ResponseInfo,
    },

    /// Response cancelled
    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        response_id: Option<String>,
        item: ConversationItem,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: Option<String>,
        item: ConversationItem,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    OutputAudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.output_audio.done", alias = "response.audio.done")]
    OutputAudioDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Audio transcript delta
    #[serde(
        rename = "response.output_audio_transcript.delta",
        alias = "response.audio_transcript.delta"
    )]
    OutputAudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Audio transcript done
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    OutputAudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Text delta
    #[serde(rename = "response.output_text.delta", alias = "response.text.delta")]
    OutputTextDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Text done
    #[serde(rename = "response.output_text.done", alias = "response.text.done")]
    OutputTextDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    /// Function call arguments delta
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        call_id: String,
        /// Tool name; older servers only send it in `response.output_item.added`
        #[serde(default)]
        name: Option<String>,
        /// Raw JSON argument string, forwarded unvalidated
        #[serde(default)]
        arguments: String,
    },

    /// Server-side playout started (peer transport)
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Server-side playout finished (peer transport)
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Server-side playout cleared (peer transport)
    #[serde(rename = "output_audio_buffer.cleared")]
    OutputAudioBufferCleared {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Rate limits updated
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },
}

impl ServerEvent {
    /// Decode base64 audio from an audio delta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// A known event, fully decoded
    Event(ServerEvent),
    /// A well-formed frame with a type outside [`KNOWN_SERVER_EVENTS`]
    Unknown { event_type: String },
    /// Unparseable JSON, a missing `type`, or a known type with a bad body
    Malformed {
        event_type: Option<String>,
        error: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
}

/// Decode an inbound frame: discriminator first, then the typed body.
pub fn decode_server_frame(text: &str) -> DecodedFrame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return DecodedFrame::Malformed {
                event_type: None,
                error: e.to_string(),
            };
        }
    };

    if !KNOWN_SERVER_EVENTS.contains(envelope.event_type.as_str()) {
        return DecodedFrame::Unknown {
            event_type: envelope.event_type,
        };
    }

    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => DecodedFrame::Event(event),
        Err(e) => DecodedFrame::Malformed {
            event_type: Some(envelope.event_type),
            error: e.to_string(),
        },
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Parameter that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// How the dispatcher treats an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorClass {
    /// A response was requested while one is already active
    DuplicateResponse,
    /// `response.cancel` raced with the response finishing
    NothingToCancel,
    /// Commit of an empty or too-short input buffer
    BufferTooSmall,
    /// Everything else: surfaced to observers, connection kept
    Surfaced,
}

impl ApiError {
    pub fn classify(&self) -> ProtocolErrorClass {
        match self.code.as_deref() {
            Some("conversation_already_has_active_response") => {
                ProtocolErrorClass::DuplicateResponse
            }
            Some("response_cancel_not_active") => ProtocolErrorClass::NothingToCancel,
            Some("input_audio_buffer_commit_empty") => ProtocolErrorClass::BufferTooSmall,
            _ if self.message.to_lowercase().contains("buffer too small") => {
                ProtocolErrorClass::BufferTooSmall
            }
            _ => ProtocolErrorClass::Surfaced,
        }
    }
}

/// Session information echoed by the server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    #[serde(default)]
    pub id: Option<String>,
    /// Response status (in_progress, completed, cancelled, failed, incomplete)
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

/// Rate limit information.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub name: String,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub remaining: u64,
    #[serde(default)]
    pub reset_seconds: f64,
}

// =============================================================================
// Tests
// =============================================================================
