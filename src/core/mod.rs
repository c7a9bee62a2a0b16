pub mod audio;
pub mod conversation;
pub mod engine;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{
    AudioDevices, AudioError, AudioFormat, AudioRenderer, AudioResult, AudioSegment, AudioSource,
    CaptureStats, FormatConverter, MemoryDevices, MemoryRenderer, PlaybackConfig, PlaybackStats,
    WavDevices,
};

pub use conversation::{
    ConversationPhase, ConversationTranscript, NoTools, PhaseChange, SessionSnapshot, ToolExecutor,
    ToolOutcome, TranscriptEntry, TranscriptRole,
};

pub use engine::VoiceEngine;

pub use realtime::{
    ConnectionState, CredentialProvider, EngineObservers, EngineStatus, EphemeralCredential,
    HttpCredentialProvider, MemoryServer, MemoryTransport, PeerTransport, RealtimeError,
    RealtimeResult, RealtimeTransport, StaticCredentialProvider, ToolDefinition, TransportKind,
    TurnDetectionConfig, WebSocketTransport,
};
