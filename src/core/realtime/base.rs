//! Base types for the realtime voice session.
//!
//! This module defines the error type shared by every layer of the engine,
//! the connection state machine exposed to observers, the transport
//! strategy enum and the tool catalog types pushed with the session
//! configuration.
//!
//! # Audio Format
//!
//! Model input and output are PCM 16-bit signed little-endian, mono, 24kHz.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::core::audio::AudioError;
use crate::core::conversation::{PhaseChange, TranscriptEntry};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while establishing or running a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the realtime endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The ephemeral credential could not be fetched
    #[error("Credential fetch failed (HTTP {status}): {message}")]
    CredentialFetch {
        /// HTTP status code, 0 when no response was received
        status: u16,
        /// Response body or transport error
        message: String,
    },

    /// Session handshake failed or was rejected
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer negotiation or session handshake did not finish in time
    #[error("Negotiation timed out after {0}ms")]
    NegotiationTimeout(u64),

    /// The transport strategy chosen at construction cannot run here
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Protocol error reported by the model service
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Audio pipeline failure while starting the session
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::SerializationError(err.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Transport Strategy
// =============================================================================

/// Transport used to carry protocol messages and audio.
///
/// Chosen at construction; an unavailable strategy fails `connect()` instead
/// of falling back to the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON events over a WebSocket, audio base64-encoded inside events
    #[default]
    Socket,
    /// Peer connection: events on a data channel, audio on media tracks
    Peer,
}

impl TransportKind {
    /// Parse transport kind from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "socket" | "websocket" | "ws" => Some(TransportKind::Socket),
            "peer" | "webrtc" | "rtc" => Some(TransportKind::Peer),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::Peer => write!(f, "peer"),
        }
    }
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether the server creates a response when the turn ends
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
        /// Whether the server creates a response when the turn ends
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
}

impl TurnDetectionConfig {
    /// Whether the server requests a response by itself at the end of a turn.
    pub fn creates_response(&self) -> bool {
        match self {
            TurnDetectionConfig::ServerVad {
                create_response, ..
            }
            | TurnDetectionConfig::SemanticVad {
                create_response, ..
            } => create_response.unwrap_or(true),
        }
    }
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Credential exchange or handshake in progress
    Connecting,
    /// Session acknowledged and running
    Connected,
    /// The session failed; the engine forces `Disconnected` right after
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Observer Types
// =============================================================================

/// Status updates surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    /// The connection state changed
    Connection(ConnectionState),
    /// The session configuration was acknowledged
    Ready {
        /// Session id assigned by the service, when known
        session_id: Option<String>,
    },
    /// A protocol error frame that does not affect the connection
    ProtocolError {
        /// Error code from the service
        code: Option<String>,
        /// Human readable message
        message: String,
    },
    /// The transport failed; the session has been torn down
    TransportError(String),
}

/// Callback type for transcript events.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptEntry) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for phase changes.
pub type PhaseCallback =
    Arc<dyn Fn(PhaseChange) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for status updates.
pub type StatusCallback =
    Arc<dyn Fn(EngineStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registered observers. Every callback is optional.
#[derive(Clone, Default)]
pub struct EngineObservers {
    pub(crate) transcript: Option<TranscriptCallback>,
    pub(crate) phase: Option<PhaseCallback>,
    pub(crate) status: Option<StatusCallback>,
}

impl EngineObservers {
    /// Register a callback invoked whenever a transcript entry is appended or grows.
    pub fn on_transcript_appended(mut self, callback: TranscriptCallback) -> Self {
        self.transcript = Some(callback);
        self
    }

    /// Register a callback invoked on every conversation phase change.
    pub fn on_phase_changed(mut self, callback: PhaseCallback) -> Self {
        self.phase = Some(callback);
        self
    }

    /// Register a callback for connection and error status updates.
    pub fn on_status(mut self, callback: StatusCallback) -> Self {
        self.status = Some(callback);
        self
    }

    pub(crate) async fn transcript_appended(&self, entry: TranscriptEntry) {
        if let Some(cb) = self.transcript.as_ref() {
            cb(entry).await;
        }
    }

    pub(crate) async fn phase_changed(&self, change: PhaseChange) {
        if let Some(cb) = self.phase.as_ref() {
            cb(change).await;
        }
    }

    pub(crate) async fn status(&self, status: EngineStatus) {
        if let Some(cb) = self.status.as_ref() {
            cb(status).await;
        }
    }
}

impl fmt::Debug for EngineObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineObservers")
            .field("transcript", &self.transcript.is_some())
            .field("phase", &self.phase.is_some())
            .field("status", &self.status.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Error.to_string(), "Error");
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!(TransportKind::parse("socket"), Some(TransportKind::Socket));
        assert_eq!(TransportKind::parse("WebSocket"), Some(TransportKind::Socket));
        assert_eq!(TransportKind::parse("webrtc"), Some(TransportKind::Peer));
        assert_eq!(TransportKind::parse("PEER"), Some(TransportKind::Peer));
        assert_eq!(TransportKind::parse("carrier-pigeon"), None);
        assert_eq!(TransportKind::Peer.to_string(), "peer");
    }

    #[test]
    fn test_default_turn_detection() {
        let td = TurnDetectionConfig::default();
        match td {
            TurnDetectionConfig::ServerVad { threshold, .. } => {
                assert_eq!(threshold, Some(0.5));
            }
            _ => panic!("Expected ServerVad default"),
        }
        assert!(td.creates_response());
    }

    #[test]
    fn test_manual_turns() {
        let td = TurnDetectionConfig::SemanticVad {
            eagerness: Some("low".to_string()),
            create_response: Some(false),
            interrupt_response: None,
        };
        assert!(!td.creates_response());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = RealtimeError::CredentialFetch {
            status: 401,
            message: "bad key".to_string(),
        };
        assert_eq!(err.to_string(), "Credential fetch failed (HTTP 401): bad key");

        let err = RealtimeError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_observers_debug_reports_registration() {
        let observers = EngineObservers::default()
            .on_status(Arc::new(
                |_status: EngineStatus| -> futures::future::BoxFuture<'static, ()> {
                    Box::pin(async {})
                },
            ));
        let rendered = format!("{:?}", observers);
        assert!(rendered.contains("status: true"));
        assert!(rendered.contains("phase: false"));
    }
}
