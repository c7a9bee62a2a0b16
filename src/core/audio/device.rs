//! Live microphone and speaker through cpal.
//!
//! cpal streams are not `Send`, so each one lives on a dedicated thread
//! that exchanges samples with the async side through shared buffers.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::capture::{AudioSource, ChannelSource};
use super::format::AudioFormat;
use super::renderer::{AudioDevices, AudioRenderer};
use super::{AudioError, AudioResult};

/// Capture frame length.
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Frames buffered between the device thread and the capture task.
const SOURCE_CAPACITY: usize = 50;

/// Default input and output devices of the default host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevices for CpalDevices {
    fn open_source(&self) -> AudioResult<Option<Box<dyn AudioSource>>> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<AudioResult<(ChannelSource, AudioFormat)>>();

        thread::Builder::new()
            .name("cpal-input".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_input_device() else {
                    let _ = ready_tx.send(Err(AudioError::Device(
                        "No default input device found".to_string(),
                    )));
                    return;
                };
                let config = match device.default_input_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Device(format!(
                            "Failed to get device config: {}",
                            e
                        ))));
                        return;
                    }
                };

                let format = AudioFormat::device(config.sample_rate().0, config.channels());
                let frame_len = format.frames_for(FRAME_DURATION);
                let frame_samples = frame_len * format.channels as usize;
                let (source, tx) = ChannelSource::new(format, frame_len, SOURCE_CAPACITY);
                let pending = Mutex::new(Vec::with_capacity(frame_samples));
                let callback_tx = tx.clone();

                let stream = device.build_input_stream(
                    &config.config(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut pending = pending.lock();
                        pending.extend_from_slice(data);
                        while pending.len() >= frame_samples {
                            let frame: Vec<f32> = pending.drain(..frame_samples).collect();
                            // Full channel: the capture task is behind, drop the frame
                            let _ = callback_tx.try_send(frame);
                        }
                    },
                    |err| warn!(error = %err, "Input stream error"),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Device(format!(
                            "Failed to build input stream: {}",
                            e
                        ))));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Device(format!(
                        "Failed to start input stream: {}",
                        e
                    ))));
                    return;
                }

                info!(format = %format, "Microphone opened");
                if ready_tx.send(Ok((source, format))).is_err() {
                    return;
                }

                // Keep the stream alive until the capture side goes away
                while !tx.is_closed() {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                debug!("Microphone closed");
            })
            .map_err(|e| AudioError::Device(format!("Failed to spawn input thread: {}", e)))?;

        let (source, _format) = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("Input thread exited early".to_string()))??;
        Ok(Some(Box::new(source)))
    }

    fn open_renderer(&self) -> AudioResult<Box<dyn AudioRenderer>> {
        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::channel::<AudioResult<AudioFormat>>();

        let thread_queue = Arc::clone(&queue);
        let thread_alive = Arc::clone(&alive);
        thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let Some(device) = host.default_output_device() else {
                    let _ = ready_tx.send(Err(AudioError::Device(
                        "No default output device found".to_string(),
                    )));
                    return;
                };
                let config = match device.default_output_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Device(format!(
                            "Failed to get device config: {}",
                            e
                        ))));
                        return;
                    }
                };
                let format = AudioFormat::device(config.sample_rate().0, config.channels());

                let stream = device.build_output_stream(
                    &config.config(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = thread_queue.lock();
                        for sample in data.iter_mut() {
                            *sample = queue.pop_front().unwrap_or(0.0);
                        }
                    },
                    |err| warn!(error = %err, "Output stream error"),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Device(format!(
                            "Failed to build output stream: {}",
                            e
                        ))));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Device(format!(
                        "Failed to start output stream: {}",
                        e
                    ))));
                    return;
                }

                info!(format = %format, "Speaker opened");
                if ready_tx.send(Ok(format)).is_err() {
                    return;
                }
                while thread_alive.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                debug!("Speaker closed");
            })
            .map_err(|e| AudioError::Device(format!("Failed to spawn output thread: {}", e)))?;

        let format = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("Output thread exited early".to_string()))??;
        Ok(Box::new(CpalRenderer {
            format,
            queue,
            alive,
        }))
    }
}

/// Renderer feeding the speaker thread.
struct CpalRenderer {
    format: AudioFormat,
    queue: Arc<Mutex<VecDeque<f32>>>,
    alive: Arc<AtomicBool>,
}

impl AudioRenderer for CpalRenderer {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn schedule(&mut self, samples: Vec<f32>) -> AudioResult<()> {
        self.queue.lock().extend(samples);
        Ok(())
    }

    fn queued(&self) -> Duration {
        self.format.samples_duration(self.queue.lock().len())
    }

    fn halt(&mut self) {
        self.queue.lock().clear();
    }
}

impl Drop for CpalRenderer {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}
