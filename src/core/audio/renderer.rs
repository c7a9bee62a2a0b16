//! Audio output targets and the device bundle the engine opens per session.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::capture::AudioSource;
use super::format::{AudioFormat, SampleFormat};
use super::{AudioError, AudioResult};

/// Output side of the audio pipeline.
///
/// Samples are interleaved floats in [`format`](Self::format).
pub trait AudioRenderer: Send {
    fn format(&self) -> AudioFormat;

    /// Queue samples for output.
    fn schedule(&mut self, samples: Vec<f32>) -> AudioResult<()>;

    /// Audio scheduled but not yet played.
    fn queued(&self) -> Duration;

    /// Stop output immediately and discard everything queued.
    fn halt(&mut self);

    /// Flush any buffered output when the playback session ends.
    fn finish(&mut self) -> AudioResult<()> {
        Ok(())
    }
}

/// Audio endpoints for one session.
pub trait AudioDevices: Send + Sync {
    /// The microphone, or `None` for sessions without capture.
    fn open_source(&self) -> AudioResult<Option<Box<dyn AudioSource>>>;

    fn open_renderer(&self) -> AudioResult<Box<dyn AudioRenderer>>;
}

// =============================================================================
// Memory renderer
// =============================================================================

#[derive(Debug)]
struct MemoryState {
    format: AudioFormat,
    paced: bool,
    queue: VecDeque<f32>,
    rendered: Vec<f32>,
    last_tick: Instant,
    carry: f64,
    scheduled_samples: usize,
    halts: usize,
}

impl MemoryState {
    /// Move samples whose play time has passed from the queue to `rendered`.
    fn advance(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        if !self.paced {
            self.rendered.extend(self.queue.drain(..));
            return;
        }
        if self.queue.is_empty() {
            self.carry = 0.0;
            return;
        }

        let samples_per_sec = self.format.sample_rate as f64 * self.format.channels as f64;
        let due = elapsed.as_secs_f64() * samples_per_sec + self.carry;
        let whole = (due.floor() as usize).min(self.queue.len());
        self.carry = due - whole as f64;
        self.rendered.extend(self.queue.drain(..whole));
        if self.queue.is_empty() {
            self.carry = 0.0;
        }
    }
}

/// Renderer that records everything it plays.
///
/// In instant mode scheduled audio counts as played immediately; in paced
/// mode it plays back in real time against the tokio clock, which makes it
/// usable with paused-time tests. Clones share the same recording.
#[derive(Debug, Clone)]
pub struct MemoryRenderer {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRenderer {
    fn with_mode(format: AudioFormat, paced: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                format,
                paced,
                queue: VecDeque::new(),
                rendered: Vec::new(),
                last_tick: Instant::now(),
                carry: 0.0,
                scheduled_samples: 0,
                halts: 0,
            })),
        }
    }

    pub fn instant(format: AudioFormat) -> Self {
        Self::with_mode(format, false)
    }

    pub fn paced(format: AudioFormat) -> Self {
        Self::with_mode(format, true)
    }

    /// Samples that have been played so far.
    pub fn rendered(&self) -> Vec<f32> {
        let mut state = self.state.lock();
        state.advance();
        state.rendered.clone()
    }

    pub fn rendered_duration(&self) -> Duration {
        let mut state = self.state.lock();
        state.advance();
        state.format.samples_duration(state.rendered.len())
    }

    /// Samples ever scheduled, including halted ones.
    pub fn scheduled_samples(&self) -> usize {
        self.state.lock().scheduled_samples
    }

    pub fn halts(&self) -> usize {
        self.state.lock().halts
    }
}

impl AudioRenderer for MemoryRenderer {
    fn format(&self) -> AudioFormat {
        self.state.lock().format
    }

    fn schedule(&mut self, samples: Vec<f32>) -> AudioResult<()> {
        let mut state = self.state.lock();
        state.advance();
        let channels = state.format.channels.max(1) as usize;
        if samples.len() % channels != 0 {
            return Err(AudioError::Renderer(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        state.scheduled_samples += samples.len();
        state.queue.extend(samples);
        if !state.paced {
            state.advance();
        }
        Ok(())
    }

    fn queued(&self) -> Duration {
        let mut state = self.state.lock();
        state.advance();
        state.format.samples_duration(state.queue.len())
    }

    fn halt(&mut self) {
        let mut state = self.state.lock();
        state.advance();
        state.queue.clear();
        state.carry = 0.0;
        state.halts += 1;
    }
}

// =============================================================================
// WAV renderer
// =============================================================================

/// Renderer that writes everything scheduled to a WAV file.
pub struct WavRenderer {
    format: AudioFormat,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavRenderer {
    pub fn create(path: impl AsRef<Path>, format: AudioFormat) -> AudioResult<Self> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: match format.sample_format {
                SampleFormat::I16 => 16,
                SampleFormat::F32 => 32,
            },
            sample_format: match format.sample_format {
                SampleFormat::I16 => hound::SampleFormat::Int,
                SampleFormat::F32 => hound::SampleFormat::Float,
            },
        };
        let writer = hound::WavWriter::create(path.as_ref(), spec).map_err(|e| {
            AudioError::Renderer(format!(
                "Failed to create {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            format,
            writer: Some(writer),
        })
    }
}

impl AudioRenderer for WavRenderer {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn schedule(&mut self, samples: Vec<f32>) -> AudioResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(AudioError::Renderer("WAV file already finalized".to_string()));
        };
        let result = match self.format.sample_format {
            SampleFormat::I16 => samples.iter().try_for_each(|s| {
                writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            }),
            SampleFormat::F32 => samples.iter().try_for_each(|s| writer.write_sample(*s)),
        };
        result.map_err(|e| AudioError::Renderer(format!("WAV write failed: {}", e)))
    }

    fn queued(&self) -> Duration {
        Duration::ZERO
    }

    fn halt(&mut self) {}

    fn finish(&mut self) -> AudioResult<()> {
        match self.writer.take() {
            Some(writer) => writer
                .finalize()
                .map_err(|e| AudioError::Renderer(format!("WAV finalize failed: {}", e))),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Device bundles
// =============================================================================

/// Devices backed by memory: an optional injected source and a shared
/// [`MemoryRenderer`].
pub struct MemoryDevices {
    source: Mutex<Option<Box<dyn AudioSource>>>,
    renderer: MemoryRenderer,
}

impl MemoryDevices {
    pub fn new(renderer: MemoryRenderer) -> Self {
        Self {
            source: Mutex::new(None),
            renderer,
        }
    }

    /// No microphone; audio output is recorded in wire format.
    pub fn silent() -> Self {
        Self::new(MemoryRenderer::instant(AudioFormat::wire()))
    }

    /// Hand this source to the next session that opens the microphone.
    pub fn with_source(self, source: Box<dyn AudioSource>) -> Self {
        *self.source.lock() = Some(source);
        self
    }

    pub fn renderer(&self) -> &MemoryRenderer {
        &self.renderer
    }
}

impl AudioDevices for MemoryDevices {
    fn open_source(&self) -> AudioResult<Option<Box<dyn AudioSource>>> {
        Ok(self.source.lock().take())
    }

    fn open_renderer(&self) -> AudioResult<Box<dyn AudioRenderer>> {
        Ok(Box::new(self.renderer.clone()))
    }
}

/// No microphone; output goes to a WAV file.
pub struct WavDevices {
    path: std::path::PathBuf,
    format: AudioFormat,
}

impl WavDevices {
    pub fn new(path: impl Into<std::path::PathBuf>, format: AudioFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl AudioDevices for WavDevices {
    fn open_source(&self) -> AudioResult<Option<Box<dyn AudioSource>>> {
        Ok(None)
    }

    fn open_renderer(&self) -> AudioResult<Box<dyn AudioRenderer>> {
        Ok(Box::new(WavRenderer::create(&self.path, self.format)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_renderer_plays_immediately() {
        let mut renderer = MemoryRenderer::instant(AudioFormat::device(48_000, 2));
        renderer.schedule(vec![0.1; 960]).unwrap();
        assert_eq!(renderer.queued(), Duration::ZERO);
        assert_eq!(renderer.rendered().len(), 960);
        assert_eq!(renderer.rendered_duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let mut renderer = MemoryRenderer::instant(AudioFormat::device(48_000, 2));
        assert!(matches!(
            renderer.schedule(vec![0.0; 3]),
            Err(AudioError::Renderer(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_renderer_follows_clock() {
        let mut renderer = MemoryRenderer::paced(AudioFormat::device(24_000, 1));
        renderer.schedule(vec![0.0; 2_400]).unwrap();
        assert_eq!(renderer.queued(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(renderer.queued(), Duration::from_millis(60));

        renderer.halt();
        assert_eq!(renderer.queued(), Duration::ZERO);
        assert_eq!(renderer.rendered().len(), 960);
        assert_eq!(renderer.halts(), 1);
        assert_eq!(renderer.scheduled_samples(), 2_400);
    }

    #[test]
    fn test_wav_renderer_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut renderer = WavRenderer::create(&path, AudioFormat::wire()).unwrap();
        renderer.schedule(vec![0.5; 480]).unwrap();
        renderer.finish().unwrap();
        assert!(renderer.schedule(vec![0.0]).is_err());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.len(), 480);
    }

    #[test]
    fn test_memory_devices_hand_out_source_once() {
        let (source, _tx) = crate::core::audio::ChannelSource::new(AudioFormat::wire(), 480, 4);
        let devices = MemoryDevices::silent().with_source(Box::new(source));
        assert!(devices.open_source().unwrap().is_some());
        assert!(devices.open_source().unwrap().is_none());
        assert!(devices.open_renderer().is_ok());
    }
}
