//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate, downmixes and
//! resamples to the configured input rate, and re-chunks the callback
//! buffers into fixed-size [`AudioFrame`]s.

use crate::audio::{RecordStream, resample, to_mono};
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Frames buffered between the audio thread and the consumer (~4s at defaults).
const FRAME_CHANNEL_SIZE: usize = 64;
/// How often the capture thread checks whether its consumer went away.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// The target sample rate for the pipeline (e.g., 16kHz).
    target_sample_rate: u32,
    /// Samples per emitted frame.
    frame_samples: usize,
}

impl CpalCapture {
    /// Resolve the input device.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then converts to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SpeechError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| SpeechError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| SpeechError::Audio(format!("no default input config: {e}")))?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels -> {}Hz frames of {} samples",
            stream_config.sample_rate,
            stream_config.channels,
            config.input_sample_rate,
            config.frame_samples
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            frame_samples: config.frame_samples.max(1),
        })
    }

    /// Open a record stream.
    ///
    /// The cpal stream lives on a dedicated thread (cpal streams are not
    /// `Send`) until the returned [`RecordStream`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the input stream cannot be built or started.
    pub async fn open(&self) -> Result<RecordStream> {
        let (tx, rx) = mpsc::channel::<AudioFrame>(FRAME_CHANNEL_SIZE);
        let closed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let target_rate = self.target_sample_rate;
        let frame_samples = self.frame_samples;
        let thread_closed = Arc::clone(&closed);

        std::thread::Builder::new()
            .name("colloquy-capture".into())
            .spawn(move || {
                run_capture_thread(
                    &device,
                    &stream_config,
                    FrameChunker::new(frame_samples, target_rate),
                    tx,
                    &thread_closed,
                    ready_tx,
                );
            })
            .map_err(|e| SpeechError::Audio(format!("cannot spawn capture thread: {e}")))?;

        await_ready(ready_rx).await?;
        Ok(RecordStream::new(rx, closed))
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Wait for the capture thread to report whether its stream started.
async fn await_ready(ready: oneshot::Receiver<Result<()>>) -> Result<()> {
    ready.await.unwrap_or_else(|_| {
        Err(SpeechError::Audio(
            "capture thread exited before the stream started".into(),
        ))
    })
}

fn run_capture_thread(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    mut chunker: FrameChunker,
    tx: mpsc::Sender<AudioFrame>,
    closed: &AtomicBool,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let native_rate = stream_config.sample_rate;
    let native_channels = stream_config.channels;
    let tx_callback = tx.clone();

    let stream = device.build_input_stream(
        stream_config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            let mono = if native_channels > 1 {
                to_mono(data, native_channels)
            } else {
                data.to_vec()
            };
            let samples = resample(&mono, native_rate, chunker.sample_rate);
            for frame in chunker.push(&samples) {
                // Never block the audio thread.
                if tx_callback.try_send(frame).is_err() {
                    debug!("frame channel full or closed, dropping frame");
                }
            }
        },
        move |err| {
            error!("audio input stream error: {err}");
        },
        None,
    );

    let started = stream
        .map_err(|e| SpeechError::Audio(format!("failed to build input stream: {e}")))
        .and_then(|s| {
            s.play()
                .map_err(|e| SpeechError::Audio(format!("failed to start input stream: {e}")))?;
            Ok(s)
        });
    let stream = match started {
        Ok(s) => {
            let _ = ready_tx.send(Ok(()));
            s
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    debug!("record stream opened");

    while !closed.load(Ordering::SeqCst) && !tx.is_closed() {
        std::thread::sleep(CLOSE_POLL_INTERVAL);
    }

    drop(stream);
    debug!("record stream closed");
}

/// Re-chunks arbitrary sample buffers into fixed-size frames.
struct FrameChunker {
    pending: Vec<f32>,
    frame_samples: usize,
    sample_rate: u32,
}

impl FrameChunker {
    fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            sample_rate,
        }
    }

    fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(full, self.sample_rate));
        }
        frames
    }
}
