//! Realtime session with the speech-and-reasoning model.
//!
//! This module holds everything that talks to the model service:
//! - `messages`: the JSON wire protocol
//! - `credential`: ephemeral credential minting
//! - `transport`: socket, peer and in-memory transports behind one trait
//! - `session`: session configuration and the readiness handshake
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz in both directions.

mod base;
pub mod credential;
pub mod messages;
pub mod session;
pub mod transport;

pub use base::{
    ConnectionState, EngineObservers, EngineStatus, PhaseCallback, RealtimeError, RealtimeResult,
    StatusCallback, ToolDefinition, TranscriptCallback, TransportKind, TurnDetectionConfig,
};
pub use credential::{
    CredentialProvider, EphemeralCredential, HttpCredentialProvider, StaticCredentialProvider,
};
pub use messages::{ClientEvent, DecodedFrame, ServerEvent, decode_server_frame};
pub use session::{build_session_config, compose_instructions, language_patch};
pub use transport::{
    InboundFrame, MemoryServer, MemoryTransport, OutboundFrame, PeerTransport, RealtimeTransport,
    TransportChannels, TransportEndpoint, WebSocketTransport,
};
