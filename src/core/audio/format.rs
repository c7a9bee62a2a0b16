//! Audio format descriptors and the segment type handed between components.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sample rate of model input and output.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Channel count of model input and output.
pub const WIRE_CHANNELS: u16 = 1;

/// Native sample encoding of an audio device or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 16-bit signed little-endian integers
    #[default]
    I16,
    /// 32-bit floats in [-1.0, 1.0]
    F32,
}

impl SampleFormat {
    /// Bytes used by one sample of one channel.
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Audio format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Sample encoding
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Create a new format descriptor.
    pub const fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// The fixed wire format: PCM16 LE, mono, 24kHz.
    pub const fn wire() -> Self {
        Self::new(WIRE_SAMPLE_RATE, WIRE_CHANNELS, SampleFormat::I16)
    }

    /// A float device format, the layout most sound cards expose.
    pub const fn device(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleFormat::F32)
    }

    /// Whether a converter can be built for this format.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Bytes in one interleaved frame.
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Number of frames covering `duration`, rounded down.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64) as usize
    }

    /// Duration of `frames` frames.
    pub fn frames_duration(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Duration of `len` bytes of encoded audio.
    pub fn bytes_duration(&self, len: usize) -> Duration {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            return Duration::ZERO;
        }
        self.frames_duration(len / frame)
    }

    /// Duration of `len` interleaved samples.
    pub fn samples_duration(&self, len: usize) -> Duration {
        if self.channels == 0 {
            return Duration::ZERO;
        }
        self.frames_duration(len / self.channels as usize)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::wire()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = match self.sample_format {
            SampleFormat::I16 => "i16",
            SampleFormat::F32 => "f32",
        };
        write!(f, "{}Hz/{}ch/{}", self.sample_rate, self.channels, encoding)
    }
}

/// Immutable unit of encoded audio moved between components.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    data: Bytes,
    format: AudioFormat,
    response_id: Option<String>,
    item_id: Option<String>,
}

impl AudioSegment {
    /// Wrap encoded bytes in the given format.
    pub fn new(data: Bytes, format: AudioFormat) -> Self {
        Self {
            data,
            format,
            response_id: None,
            item_id: None,
        }
    }

    /// Attach the response and conversation item that produced this audio.
    pub fn with_origin(mut self, response_id: Option<String>, item_id: Option<String>) -> Self {
        self.response_id = response_id;
        self.item_id = item_id;
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole frames contained in the segment.
    pub fn frames(&self) -> usize {
        let frame = self.format.bytes_per_frame();
        if frame == 0 { 0 } else { self.data.len() / frame }
    }

    pub fn duration(&self) -> Duration {
        self.format.frames_duration(self.frames())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let wire = AudioFormat::wire();
        assert_eq!(wire.sample_rate, 24_000);
        assert_eq!(wire.channels, 1);
        assert_eq!(wire.bytes_per_frame(), 2);
        assert_eq!(wire.to_string(), "24000Hz/1ch/i16");
    }

    #[test]
    fn test_durations() {
        let wire = AudioFormat::wire();
        assert_eq!(wire.frames_for(Duration::from_millis(20)), 480);
        assert_eq!(wire.bytes_duration(48_000), Duration::from_secs(1));

        let stereo = AudioFormat::device(48_000, 2);
        assert_eq!(stereo.samples_duration(96_000), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_format_has_zero_duration() {
        let broken = AudioFormat::device(0, 0);
        assert!(!broken.is_valid());
        assert_eq!(broken.bytes_duration(1024), Duration::ZERO);
        assert_eq!(broken.samples_duration(1024), Duration::ZERO);
    }

    #[test]
    fn test_segment_frames() {
        let segment = AudioSegment::new(Bytes::from(vec![0u8; 4801]), AudioFormat::wire())
            .with_origin(Some("resp_1".into()), Some("item_1".into()));
        assert_eq!(segment.frames(), 2400);
        assert_eq!(segment.duration(), Duration::from_millis(100));
        assert_eq!(segment.response_id(), Some("resp_1"));
        assert_eq!(segment.item_id(), Some("item_1"));
    }
}
