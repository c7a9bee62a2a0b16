//! Microphone capture.
//!
//! Frames are read from an [`AudioSource`], metered, converted to the wire
//! format and handed to the transport. Sending is suppressed while the
//! assistant speaks or audio is still queued for playback, so the model
//! does not hear itself; the decision is re-evaluated for every frame.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::converter::{FormatConverter, rms_dbfs};
use super::format::AudioFormat;
use super::playback::PlaybackActivity;
use super::{AudioError, AudioResult, SILENCE_DBFS};
use crate::core::conversation::ConversationPhase;
use crate::core::realtime::transport::OutboundFrame;

/// A stream of fixed-size interleaved frames.
#[async_trait]
pub trait AudioSource: Send {
    fn format(&self) -> AudioFormat;

    /// Frames (not samples) per read.
    fn frame_len(&self) -> usize;

    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Option<Vec<f32>>;
}

/// Source fed through a channel, used by device threads and tests.
pub struct ChannelSource {
    format: AudioFormat,
    frame_len: usize,
    rx: mpsc::Receiver<Vec<f32>>,
}

impl ChannelSource {
    pub fn new(
        format: AudioFormat,
        frame_len: usize,
        capacity: usize,
    ) -> (Self, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                format,
                frame_len,
                rx,
            },
            tx,
        )
    }
}

#[async_trait]
impl AudioSource for ChannelSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frame_len(&self) -> usize {
        self.frame_len
    }

    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }
}

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Sent,
    /// Assistant speaking or playback active
    Suppressed,
    /// The converter rejected the frame or none could be built
    Dropped,
}

/// Capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_suppressed: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

/// Read-only view of a pipeline's counters that outlives the pipeline.
#[derive(Debug, Clone)]
pub struct CaptureMonitor(Arc<Counters>);

impl CaptureMonitor {
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.0.sent.load(Ordering::Relaxed),
            frames_suppressed: self.0.suppressed.load(Ordering::Relaxed),
            frames_dropped: self.0.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct CapturePipeline {
    source: Box<dyn AudioSource>,
    converter: Option<FormatConverter>,
    phase: watch::Receiver<ConversationPhase>,
    playback: PlaybackActivity,
    outbound: mpsc::Sender<OutboundFrame>,
    level: watch::Sender<f32>,
    counters: Arc<Counters>,
}

impl CapturePipeline {
    /// Build the pipeline and its converter.
    ///
    /// A source format no converter can handle does not fail construction:
    /// every frame is then dropped and counted, and levels are still metered.
    pub fn new(
        source: Box<dyn AudioSource>,
        phase: watch::Receiver<ConversationPhase>,
        playback: PlaybackActivity,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let converter =
            match FormatConverter::new(source.format(), AudioFormat::wire(), source.frame_len()) {
                Ok(converter) => Some(converter),
                Err(e) => {
                    warn!(format = %source.format(), error = %e, "Capture format unsupported, frames will be dropped");
                    None
                }
            };
        let (level, _) = watch::channel(SILENCE_DBFS);

        Self {
            source,
            converter,
            phase,
            playback,
            outbound,
            level,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Watch the input level in dBFS, updated for every frame.
    pub fn level(&self) -> watch::Receiver<f32> {
        self.level.subscribe()
    }

    pub fn monitor(&self) -> CaptureMonitor {
        CaptureMonitor(Arc::clone(&self.counters))
    }

    pub fn stats(&self) -> CaptureStats {
        self.monitor().stats()
    }

    fn suppressed(&self) -> bool {
        *self.phase.borrow() == ConversationPhase::Speaking || self.playback.is_active()
    }

    fn convert(&mut self, frame: &[f32]) -> AudioResult<Vec<u8>> {
        match self.converter.as_mut() {
            Some(converter) => converter.process_to_pcm16(frame),
            None => Err(AudioError::UnsupportedFormat(self.source.format().to_string())),
        }
    }

    /// Process one frame.
    pub async fn handle_frame(&mut self, frame: Vec<f32>) -> FrameDisposition {
        let dbfs = rms_dbfs(&frame);
        self.level.send_replace(dbfs);

        if self.suppressed() {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            trace!(dbfs, "Capture frame suppressed");
            return FrameDisposition::Suppressed;
        }

        let pcm = match self.convert(&frame) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Capture frame dropped");
                return FrameDisposition::Dropped;
            }
        };

        if self
            .outbound
            .send(OutboundFrame::Audio(Bytes::from(pcm)))
            .await
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return FrameDisposition::Dropped;
        }
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        FrameDisposition::Sent
    }

    /// Pump frames until the source ends or the session is cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> CaptureStats {
        info!(format = %self.source.format(), frame_len = self.source.frame_len(), "Capture started");
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = self.source.next_frame() => frame,
            };
            let Some(frame) = frame else {
                debug!("Capture source ended");
                break;
            };
            self.handle_frame(frame).await;
        }
        let stats = self.stats();
        info!(
            sent = stats.frames_sent,
            suppressed = stats.frames_suppressed,
            dropped = stats.frames_dropped,
            "Capture stopped"
        );
        stats
    }
}
