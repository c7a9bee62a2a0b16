//! Sample conversion between device formats and the wire format.
//!
//! The free functions are stateless helpers. [`FormatConverter`] wraps a
//! rubato resampler and is built once per capture or playback session; it
//! always processes fixed-size chunks.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use super::AudioError;
use super::format::AudioFormat;

/// Level reported for digital silence.
pub const SILENCE_DBFS: f32 = -160.0;

/// Decode PCM16 little-endian bytes into normalized floats.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode normalized floats as PCM16 little-endian bytes, clamping out-of-range samples.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Average interleaved channels into mono.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Duplicate mono samples across `channels` interleaved channels.
pub fn upmix(mono: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        out.extend(std::iter::repeat_n(sample, channels));
    }
    out
}

/// RMS level in dBFS, floored at [`SILENCE_DBFS`].
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DBFS;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    if mean_square <= f32::EPSILON {
        return SILENCE_DBFS;
    }
    (10.0 * mean_square.log10()).max(SILENCE_DBFS)
}

/// Map a dBFS level onto 0.0..=1.0 for meters, with -50 dBFS as the floor.
pub fn meter_level(dbfs: f32) -> f32 {
    ((dbfs + 50.0) / 50.0).clamp(0.0, 1.0)
}

/// Fixed-chunk converter between two formats.
///
/// Channels are mixed to mono, resampled, then spread to the target channel
/// count. The wire format is mono so no information is lost on either path.
pub struct FormatConverter {
    source: AudioFormat,
    target: AudioFormat,
    chunk_frames: usize,
    resampler: Option<SincFixedIn<f32>>,
}

impl FormatConverter {
    /// Build a converter for chunks of `chunk_frames` source frames.
    pub fn new(source: AudioFormat, target: AudioFormat, chunk_frames: usize) -> Result<Self, AudioError> {
        if !source.is_valid() {
            return Err(AudioError::UnsupportedFormat(source.to_string()));
        }
        if !target.is_valid() {
            return Err(AudioError::UnsupportedFormat(target.to_string()));
        }
        if chunk_frames == 0 {
            return Err(AudioError::InvalidConfig(
                "Chunk size cannot be zero".to_string(),
            ));
        }

        let resampler = if source.sample_rate != target.sample_rate {
            Some(Self::create_resampler(
                source.sample_rate,
                target.sample_rate,
                chunk_frames,
            )?)
        } else {
            None
        };

        Ok(Self {
            source,
            target,
            chunk_frames,
            resampler,
        })
    }

    fn create_resampler(
        source_rate: u32,
        target_rate: u32,
        chunk_frames: usize,
    ) -> Result<SincFixedIn<f32>, AudioError> {
        // Shorter filter than offline resampling: chunks are 10-40ms and latency matters.
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            params,
            chunk_frames,
            1,
        )
        .map_err(|e| AudioError::Resample(format!("Failed to create resampler: {e:?}")))
    }

    pub fn source(&self) -> AudioFormat {
        self.source
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Interleaved sample count expected by [`process`](Self::process).
    pub fn chunk_samples(&self) -> usize {
        self.chunk_frames * self.source.channels as usize
    }

    /// Convert one chunk of interleaved source samples into interleaved target samples.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        if input.len() != self.chunk_samples() {
            return Err(AudioError::FrameSize {
                expected: self.chunk_samples(),
                actual: input.len(),
            });
        }

        let mono = downmix(input, self.source.channels);
        let resampled = match self.resampler.as_mut() {
            Some(resampler) => {
                let mut planar = resampler
                    .process(&[mono], None)
                    .map_err(|e| AudioError::Resample(format!("Resampling failed: {e:?}")))?;
                planar.pop().unwrap_or_default()
            }
            None => mono,
        };

        Ok(upmix(&resampled, self.target.channels))
    }

    /// Decode one chunk of PCM16 bytes and convert it.
    pub fn process_pcm16(&mut self, bytes: &[u8]) -> Result<Vec<f32>, AudioError> {
        self.process(&pcm16_to_f32(bytes))
    }

    /// Convert one chunk and encode the result as PCM16 bytes.
    pub fn process_to_pcm16(&mut self, input: &[f32]) -> Result<Vec<u8>, AudioError> {
        self.process(input).map(|samples| f32_to_pcm16(&samples))
    }

    /// Drop resampler history, used after playback is halted.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

impl std::fmt::Debug for FormatConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatConverter")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("chunk_frames", &self.chunk_frames)
            .field("resampling", &self.resampler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_conversion() {
        let bytes = f32_to_pcm16(&[0.0, 0.5, -0.5, 1.0, -1.0]);
        assert_eq!(bytes.len(), 10);

        let back = pcm16_to_f32(&bytes);
        assert_eq!(back.len(), 5);
        assert!((back[1] - 0.5).abs() < 0.001);
        assert!((back[2] + 0.5).abs() < 0.001);
        assert!((back[3] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_pcm16_clamps_and_ignores_trailing_byte() {
        let bytes = f32_to_pcm16(&[2.0, -3.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);

        assert_eq!(pcm16_to_f32(&[0, 0, 7]).len(), 1);
    }

    #[test]
    fn test_downmix_and_upmix() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);

        let stereo = upmix(&[0.25, -0.25], 2);
        assert_eq!(stereo, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_levels() {
        assert_eq!(rms_dbfs(&[]), SILENCE_DBFS);
        assert_eq!(rms_dbfs(&[0.0; 64]), SILENCE_DBFS);

        let full_scale = rms_dbfs(&[1.0; 64]);
        assert!(full_scale.abs() < 0.01);
        assert_eq!(meter_level(full_scale), 1.0);
        assert_eq!(meter_level(SILENCE_DBFS), 0.0);
    }

    #[test]
    fn test_passthrough_converter() {
        let mut converter =
            FormatConverter::new(AudioFormat::wire(), AudioFormat::device(24_000, 2), 4).unwrap();
        let out = converter.process(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]);
    }

    #[test]
    fn test_wrong_chunk_size_is_rejected() {
        let mut converter =
            FormatConverter::new(AudioFormat::device(48_000, 2), AudioFormat::wire(), 960).unwrap();
        let err = converter.process(&[0.0; 100]).unwrap_err();
        assert!(matches!(
            err,
            AudioError::FrameSize {
                expected: 1920,
                actual: 100
            }
        ));
    }

    #[test]
    fn test_invalid_format_has_no_converter() {
        let result = FormatConverter::new(AudioFormat::device(0, 2), AudioFormat::wire(), 480);
        assert!(matches!(result, Err(AudioError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_downsampling_preserves_duration() {
        let source = AudioFormat::device(48_000, 2);
        let chunk_frames = 960;
        let mut converter = FormatConverter::new(source, AudioFormat::wire(), chunk_frames).unwrap();

        let chunk = vec![0.25f32; chunk_frames * 2];
        let mut produced = 0;
        for _ in 0..50 {
            produced += converter.process(&chunk).unwrap().len();
        }

        // 50 chunks of 20ms at 24kHz mono
        let expected = 24_000;
        let tolerance = chunk_frames / 2;
        assert!(
            produced.abs_diff(expected) <= tolerance,
            "produced {} frames, expected about {}",
            produced,
            expected
        );
    }
}
