//! Audio pipeline: format conversion, microphone capture and speaker playback.
//!
//! Everything that crosses the network is PCM16 LE mono 24kHz
//! ([`AudioFormat::wire`]). Device formats are converted at the boundary by
//! a [`FormatConverter`] built once per capture or playback session.

pub mod capture;
pub mod converter;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod format;
pub mod playback;
pub mod renderer;

use thiserror::Error;

pub use capture::{
    AudioSource, CaptureMonitor, CapturePipeline, CaptureStats, ChannelSource, FrameDisposition,
};
pub use converter::{
    FormatConverter, SILENCE_DBFS, downmix, f32_to_pcm16, meter_level, pcm16_to_f32, rms_dbfs,
    upmix,
};
#[cfg(feature = "device-audio")]
pub use device::CpalDevices;
pub use format::{AudioFormat, AudioSegment, SampleFormat, WIRE_CHANNELS, WIRE_SAMPLE_RATE};
pub use playback::{
    PlaybackActivity, PlaybackConfig, PlaybackControl, PlaybackCut, PlaybackEvent,
    PlaybackScheduler, PlaybackStats,
};
pub use renderer::{
    AudioDevices, AudioRenderer, MemoryDevices, MemoryRenderer, WavDevices, WavRenderer,
};

/// Errors raised by the audio pipeline.
///
/// None of these are fatal to a session: the offending frame or chunk is
/// dropped and counted, and the pipeline keeps running.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Format that no converter can be built for
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Frame length does not match the converter chunk size
    #[error("Frame size mismatch: expected {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    /// Resampler construction or processing failed
    #[error("Resampling error: {0}")]
    Resample(String),

    /// Invalid pipeline configuration
    #[error("Invalid audio configuration: {0}")]
    InvalidConfig(String),

    /// Audio device could not be opened or failed while running
    #[error("Audio device error: {0}")]
    Device(String),

    /// Renderer rejected scheduled audio
    #[error("Renderer error: {0}")]
    Renderer(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
