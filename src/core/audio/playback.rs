//! Playback scheduling.
//!
//! Inbound assistant audio is appended to a byte staging buffer. A drain
//! task takes fixed-size chunks from it, converts them to the renderer
//! format and keeps at least the pre-buffer target queued on the renderer.
//!
//! Locking: the staging mutex is always taken before the renderer mutex.
//! The drain task holds staging only to take a chunk; conversion and
//! scheduling run without it. A halt bumps the generation so the drain task
//! drops chunks taken before the halt and resets its converter instead of
//! carrying resampler history into the next response.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::AudioResult;
use super::converter::FormatConverter;
use super::format::{AudioFormat, AudioSegment};
use super::renderer::AudioRenderer;
use crate::core::conversation::ConversationPhase;

/// Playback tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Source audio per converted chunk
    pub chunk: Duration,
    /// Audio staged before playback starts, and kept queued while playing
    pub prebuffer: Duration,
    /// Drain task wake-up interval when nothing new arrives
    pub tick: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk: Duration::from_millis(20),
            prebuffer: Duration::from_millis(200),
            tick: Duration::from_millis(10),
        }
    }
}

/// Shared "audio is queued or playing" flag read by the capture pipeline.
#[derive(Debug, Clone, Default)]
pub struct PlaybackActivity(Arc<AtomicBool>);

impl PlaybackActivity {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

/// Notifications from the drain task to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The pre-buffer was reached (or the audio flushed) and output began
    Started,
    /// The renderer ran dry before the response audio was complete
    Underflow,
    /// Everything staged has been played
    Drained,
}

/// Where playback was cut by a halt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackCut {
    /// Assistant audio item that was playing
    pub item_id: String,
    /// How much of that item was actually heard
    pub played: Duration,
}

/// Operations the interruption controller needs from playback.
pub trait PlaybackControl: Send + Sync {
    /// Stop output, discard unplayed audio and report where it stopped.
    fn halt(&self) -> Option<PlaybackCut>;

    fn is_active(&self) -> bool;
}

/// Playback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub segments_accepted: u64,
    pub segments_refused: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub underflows: u64,
    pub halts: u64,
}

#[derive(Debug, Default)]
struct Telemetry {
    segments_accepted: AtomicU64,
    segments_refused: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    underflows: AtomicU64,
    halts: AtomicU64,
}

impl Telemetry {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            segments_accepted: self.segments_accepted.load(Ordering::Relaxed),
            segments_refused: self.segments_refused.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
            halts: self.halts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct ItemCursor {
    item_id: Option<String>,
    scheduled: Duration,
}

#[derive(Debug, Default)]
struct Staging {
    bytes: VecDeque<u8>,
    /// (item id, byte count) for each run of staged bytes, in order
    origins: VecDeque<(Option<String>, usize)>,
    /// The response audio is complete; the tail may be padded
    flushed: bool,
    started: bool,
    cursor: Option<ItemCursor>,
}

impl Staging {
    fn clear(&mut self) {
        self.bytes.clear();
        self.origins.clear();
        self.flushed = false;
        self.started = false;
        self.cursor = None;
    }

    /// Take up to `len` bytes, returning them with the item they started in.
    fn take(&mut self, len: usize) -> (Vec<u8>, Option<String>) {
        let len = len.min(self.bytes.len());
        let chunk: Vec<u8> = self.bytes.drain(..len).collect();

        let item = self.origins.front().and_then(|(item, _)| item.clone());
        let mut remaining = len;
        while remaining > 0 {
            let Some(front) = self.origins.front_mut() else {
                break;
            };
            if front.1 > remaining {
                front.1 -= remaining;
                remaining = 0;
            } else {
                remaining -= front.1;
                self.origins.pop_front();
            }
        }
        (chunk, item)
    }
}

struct Shared {
    config: PlaybackConfig,
    source: AudioFormat,
    staging: Mutex<Staging>,
    renderer: Mutex<Box<dyn AudioRenderer>>,
    /// Bumped under the staging lock by every halt
    generation: AtomicU64,
    activity: PlaybackActivity,
    notify: Notify,
    telemetry: Telemetry,
}

/// Handle to the playback pipeline. Clones share the same staging buffer.
#[derive(Clone)]
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    phase: watch::Receiver<ConversationPhase>,
}

impl PlaybackScheduler {
    /// Create a scheduler for wire-format audio rendered on `renderer`.
    pub fn new(
        config: PlaybackConfig,
        renderer: Box<dyn AudioRenderer>,
        phase: watch::Receiver<ConversationPhase>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                source: AudioFormat::wire(),
                staging: Mutex::new(Staging::default()),
                renderer: Mutex::new(renderer),
                generation: AtomicU64::new(0),
                activity: PlaybackActivity::default(),
                notify: Notify::new(),
                telemetry: Telemetry::default(),
            }),
            phase,
        }
    }

    pub fn activity(&self) -> PlaybackActivity {
        self.shared.activity.clone()
    }

    /// Stage a segment. Refused while the user is speaking.
    pub fn enqueue(&self, segment: AudioSegment) -> bool {
        let phase = *self.phase.borrow();
        if phase == ConversationPhase::Listening {
            Telemetry::bump(&self.shared.telemetry.segments_refused);
            trace!(bytes = segment.bytes().len(), "Segment refused while listening");
            return false;
        }
        if segment.format() != self.shared.source {
            Telemetry::bump(&self.shared.telemetry.segments_refused);
            warn!(format = %segment.format(), "Segment refused: not wire format");
            return false;
        }
        if segment.is_empty() {
            return true;
        }

        {
            let mut staging = self.shared.staging.lock();
            let item = segment.item_id().map(str::to_string);
            let len = segment.bytes().len();
            staging.bytes.extend(segment.bytes().iter().copied());
            match staging.origins.back_mut() {
                Some((last, count)) if *last == item => *count += len,
                _ => staging.origins.push_back((item, len)),
            }
            staging.flushed = false;
            self.shared.activity.set(true);
        }
        Telemetry::bump(&self.shared.telemetry.segments_accepted);
        self.shared.notify.notify_one();
        true
    }

    /// Mark the current response audio complete so the tail can play out.
    pub fn flush(&self) {
        {
            let mut staging = self.shared.staging.lock();
            if staging.bytes.is_empty() && !staging.started {
                return;
            }
            staging.flushed = true;
        }
        self.shared.notify.notify_one();
    }

    /// Let capture resume once a drain has been handled.
    ///
    /// Returns `false`, leaving capture suppressed, when new audio was
    /// staged after the drain.
    pub fn release_activity(&self) -> bool {
        let staging = self.shared.staging.lock();
        if !staging.bytes.is_empty() || staging.started {
            return false;
        }
        self.shared.activity.set(false);
        true
    }

    /// Bytes staged but not yet handed to the renderer.
    pub fn staged_bytes(&self) -> usize {
        self.shared.staging.lock().bytes.len()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.shared.telemetry.snapshot()
    }

    /// Spawn the drain task.
    ///
    /// Fails if no converter can be built for the renderer format.
    pub fn start(
        &self,
        cancel: CancellationToken,
    ) -> AudioResult<(JoinHandle<()>, mpsc::UnboundedReceiver<PlaybackEvent>)> {
        let target = self.shared.renderer.lock().format();
        let chunk_frames = self.shared.source.frames_for(self.shared.config.chunk).max(1);
        let converter = FormatConverter::new(self.shared.source, target, chunk_frames)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            target_format = %target,
            chunk_ms = self.shared.config.chunk.as_millis() as u64,
            prebuffer_ms = self.shared.config.prebuffer.as_millis() as u64,
            "Starting playback"
        );

        let drainer = Drainer {
            shared: Arc::clone(&self.shared),
            converter,
            chunk_bytes: chunk_frames * self.shared.source.bytes_per_frame(),
            generation: 0,
            dry: false,
            events: events_tx,
        };
        Ok((tokio::spawn(drainer.run(cancel)), events_rx))
    }
}

impl PlaybackControl for PlaybackScheduler {
    fn halt(&self) -> Option<PlaybackCut> {
        let mut staging = self.shared.staging.lock();
        let discarded = staging.bytes.len();
        let cursor = staging.cursor.take();
        staging.clear();
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        let mut renderer = self.shared.renderer.lock();
        let queued = renderer.queued();
        renderer.halt();
        self.shared.activity.set(false);
        Telemetry::bump(&self.shared.telemetry.halts);

        debug!(
            discarded_bytes = discarded,
            queued_ms = queued.as_millis() as u64,
            "Playback halted"
        );

        cursor.and_then(|c| {
            c.item_id.map(|item_id| PlaybackCut {
                item_id,
                played: c.scheduled.saturating_sub(queued),
            })
        })
    }

    fn is_active(&self) -> bool {
        self.shared.activity.is_active()
    }
}

struct Drainer {
    shared: Arc<Shared>,
    converter: FormatConverter,
    chunk_bytes: usize,
    generation: u64,
    /// Inside an underflow; counted once per dry spell
    dry: bool,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Drainer {
    async fn run(mut self, cancel: CancellationToken) {
        let tick = self.shared.config.tick;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shared.notify.notified() => {}
                _ = tokio::time::sleep(tick) => {}
            }
            for event in self.pump() {
                let _ = self.events.send(event);
            }
        }

        let mut renderer = self.shared.renderer.lock();
        renderer.halt();
        if let Err(e) = renderer.finish() {
            warn!(error = %e, "Failed to finish renderer");
        }
        self.shared.activity.set(false);
        debug!("Playback drain task stopped");
    }

    fn pump(&mut self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        let prebuffer = self.shared.config.prebuffer;
        let source = self.shared.source;

        {
            let mut staging = self.shared.staging.lock();
            let generation = self.shared.generation.load(Ordering::Acquire);
            if generation != self.generation {
                self.generation = generation;
                self.converter.reset();
                self.dry = false;
            }

            if !staging.started {
                let staged = source.bytes_duration(staging.bytes.len());
                if staging.bytes.is_empty() || (staged < prebuffer && !staging.flushed) {
                    return events;
                }
                staging.started = true;
                events.push(PlaybackEvent::Started);
            }
        }

        while self.shared.renderer.lock().queued() < prebuffer {
            let (mut chunk, item) = {
                let mut staging = self.shared.staging.lock();
                if self.halted() {
                    break;
                }
                if staging.bytes.len() >= self.chunk_bytes
                    || (staging.flushed && !staging.bytes.is_empty())
                {
                    staging.take(self.chunk_bytes)
                } else {
                    break;
                }
            };
            let real = source.bytes_duration(chunk.len());
            chunk.resize(self.chunk_bytes, 0);

            let samples = match self.converter.process_pcm16(&chunk) {
                Ok(samples) => samples,
                Err(e) => {
                    Telemetry::bump(&self.shared.telemetry.chunks_dropped);
                    warn!(error = %e, "Failed to convert playback chunk");
                    continue;
                }
            };

            {
                let mut renderer = self.shared.renderer.lock();
                // A halt bumps the generation before it takes the renderer
                if self.halted() {
                    Telemetry::bump(&self.shared.telemetry.chunks_dropped);
                    trace!("Dropping chunk taken before a halt");
                    break;
                }
                if let Err(e) = renderer.schedule(samples) {
                    Telemetry::bump(&self.shared.telemetry.chunks_dropped);
                    warn!(error = %e, "Renderer rejected chunk");
                    continue;
                }
            }
            Telemetry::bump(&self.shared.telemetry.chunks_scheduled);
            self.dry = false;

            let mut staging = self.shared.staging.lock();
            if self.halted() {
                break;
            }
            let cursor = staging.cursor.get_or_insert(ItemCursor {
                item_id: item.clone(),
                scheduled: Duration::ZERO,
            });
            if cursor.item_id != item {
                *cursor = ItemCursor {
                    item_id: item,
                    scheduled: Duration::ZERO,
                };
            }
            cursor.scheduled += real;
        }

        let mut staging = self.shared.staging.lock();
        if self.halted() || !staging.started {
            return events;
        }
        if self.shared.renderer.lock().queued().is_zero() {
            if staging.bytes.is_empty() && staging.flushed {
                // Activity stays set until the control loop releases it
                staging.started = false;
                staging.flushed = false;
                staging.cursor = None;
                staging.origins.clear();
                self.dry = false;
                events.push(PlaybackEvent::Drained);
                debug!("Playback drained");
            } else if !staging.flushed && !self.dry {
                self.dry = true;
                Telemetry::bump(&self.shared.telemetry.underflows);
                events.push(PlaybackEvent::Underflow);
                trace!(staged_bytes = staging.bytes.len(), "Playback underflow");
            }
        }

        events
    }

    fn halted(&self) -> bool {
        self.shared.generation.load(Ordering::Acquire) != self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::renderer::MemoryRenderer;
    use bytes::Bytes;

    fn segment(ms: u64, item: &str) -> AudioSegment {
        let format = AudioFormat::wire();
        let frames = format.frames_for(Duration::from_millis(ms));
        AudioSegment::new(Bytes::from(vec![0u8; frames * 2]), format)
            .with_origin(Some("resp_1".into()), Some(item.into()))
    }

    fn scheduler(
        renderer: MemoryRenderer,
        phase: ConversationPhase,
    ) -> (PlaybackScheduler, watch::Sender<ConversationPhase>) {
        let (tx, rx) = watch::channel(phase);
        (
            PlaybackScheduler::new(PlaybackConfig::default(), Box::new(renderer), rx),
            tx,
        )
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<PlaybackEvent>,
        wanted: PlaybackEvent,
    ) {
        loop {
            match events.recv().await {
                Some(event) if event == wanted => return,
                Some(_) => continue,
                None => panic!("playback stopped before {:?}", wanted),
            }
        }
    }

    #[test]
    fn test_refuses_segments_while_listening() {
        let renderer = MemoryRenderer::instant(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer, ConversationPhase::Listening);
        assert!(!playback.enqueue(segment(100, "item_1")));
        assert_eq!(playback.staged_bytes(), 0);
        assert!(!playback.is_active());
        assert_eq!(playback.stats().segments_refused, 1);
    }

    #[test]
    fn test_refuses_non_wire_format() {
        let renderer = MemoryRenderer::instant(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer, ConversationPhase::Speaking);
        let odd = AudioSegment::new(Bytes::from(vec![0u8; 64]), AudioFormat::device(48_000, 2));
        assert!(!playback.enqueue(odd));
    }

    #[test]
    fn test_enqueue_marks_active() {
        let renderer = MemoryRenderer::instant(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer, ConversationPhase::Speaking);
        assert!(playback.enqueue(segment(100, "item_1")));
        assert_eq!(playback.staged_bytes(), 4_800);
        assert!(playback.is_active());
        assert!(playback.activity().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_prebuffer() {
        let renderer = MemoryRenderer::paced(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer.clone(), ConversationPhase::Speaking);
        let cancel = CancellationToken::new();
        let (_task, mut events) = playback.start(cancel.clone()).unwrap();

        playback.enqueue(segment(100, "item_1"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(renderer.scheduled_samples(), 0);

        playback.enqueue(segment(150, "item_1"));
        wait_for(&mut events, PlaybackEvent::Started).await;
        assert!(renderer.scheduled_samples() > 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_preserves_duration() {
        let target = AudioFormat::device(48_000, 2);
        let renderer = MemoryRenderer::paced(target);
        let (playback, _phase) = scheduler(renderer.clone(), ConversationPhase::Speaking);
        let cancel = CancellationToken::new();
        let (_task, mut events) = playback.start(cancel.clone()).unwrap();

        // 1010ms: not a whole number of 20ms chunks
        for _ in 0..10 {
            playback.enqueue(segment(101, "item_1"));
        }
        playback.flush();
        wait_for(&mut events, PlaybackEvent::Drained).await;

        let played = renderer.rendered_duration();
        let expected = Duration::from_millis(1_010);
        let chunk = PlaybackConfig::default().chunk;
        assert!(
            played >= expected && played <= expected + chunk,
            "played {:?}",
            played
        );
        assert_eq!(playback.staged_bytes(), 0);
        assert!(playback.is_active());
        assert!(playback.release_activity());
        assert!(!playback.is_active());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_capture_suppressed_for_new_audio() {
        let renderer = MemoryRenderer::instant(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer, ConversationPhase::Speaking);
        let cancel = CancellationToken::new();
        let (_task, mut events) = playback.start(cancel.clone()).unwrap();

        playback.enqueue(segment(60, "item_1"));
        playback.flush();
        wait_for(&mut events, PlaybackEvent::Drained).await;
        assert!(playback.is_active());

        playback.enqueue(segment(60, "item_2"));
        assert!(!playback.release_activity());
        assert!(playback.is_active());
        cancel.cancel();
    }

    struct SlowRenderer {
        inner: MemoryRenderer,
        delay: Duration,
    }

    impl AudioRenderer for SlowRenderer {
        fn format(&self) -> AudioFormat {
            self.inner.format()
        }

        fn schedule(&mut self, samples: Vec<f32>) -> AudioResult<()> {
            std::thread::sleep(self.delay);
            self.inner.schedule(samples)
        }

        fn queued(&self) -> Duration {
            self.inner.queued()
        }

        fn halt(&mut self) {
            self.inner.halt()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_staging_not_blocked_by_slow_renderer() {
        let renderer = MemoryRenderer::instant(AudioFormat::wire());
        let slow = SlowRenderer {
            inner: renderer.clone(),
            delay: Duration::from_millis(15),
        };
        let (_phase_tx, phase) = watch::channel(ConversationPhase::Speaking);
        let playback = PlaybackScheduler::new(PlaybackConfig::default(), Box::new(slow), phase);
        let cancel = CancellationToken::new();
        let (_task, _events) = playback.start(cancel.clone()).unwrap();

        // 100 chunks at 15ms each keeps the drain task busy for 1.5s
        playback.enqueue(segment(2_000, "item_1"));
        playback.flush();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let started = std::time::Instant::now();
        assert!(playback.enqueue(segment(20, "item_1")));
        assert!(started.elapsed() < Duration::from_millis(200));

        let started = std::time::Instant::now();
        playback.halt();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(renderer.scheduled_samples() < AudioFormat::wire().frames_for(Duration::from_secs(2)));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_discards_and_reports_played() {
        let renderer = MemoryRenderer::paced(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer.clone(), ConversationPhase::Speaking);
        let cancel = CancellationToken::new();
        let (_task, mut events) = playback.start(cancel.clone()).unwrap();

        playback.enqueue(segment(2_000, "item_7"));
        wait_for(&mut events, PlaybackEvent::Started).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let cut = playback.halt().unwrap();
        assert_eq!(cut.item_id, "item_7");
        let played = cut.played.as_millis() as i64;
        assert!((played - 500).abs() <= 40, "played {}ms", played);

        assert_eq!(playback.staged_bytes(), 0);
        assert!(!playback.is_active());
        assert_eq!(renderer.halts(), 1);
        assert!(playback.halt().is_none());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_underflow_counted_once_per_gap() {
        let renderer = MemoryRenderer::paced(AudioFormat::wire());
        let (playback, _phase) = scheduler(renderer, ConversationPhase::Speaking);
        let cancel = CancellationToken::new();
        let (_task, mut events) = playback.start(cancel.clone()).unwrap();

        playback.enqueue(segment(210, "item_1"));
        wait_for(&mut events, PlaybackEvent::Started).await;
        wait_for(&mut events, PlaybackEvent::Underflow).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(playback.stats().underflows, 1);

        playback.flush();
        wait_for(&mut events, PlaybackEvent::Drained).await;
        assert_eq!(playback.stats().underflows, 1);
        cancel.cancel();
    }
}
