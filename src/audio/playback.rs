//! Audio playback to system speakers via cpal.

use crate::audio::{PlaybackOutcome, resample};
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::SynthesizedAudio;
use crate::pipeline::stop::{StopFlag, StopSignal};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Interval at which blocking playback checks for completion and stop requests.
pub const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
    /// Number of playback calls currently running.
    active: watch::Sender<usize>,
}

impl CpalPlayback {
    /// Create a new playback instance.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SpeechError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| SpeechError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            active: watch::channel(0).0,
        })
    }

    /// Play audio samples through the output device.
    ///
    /// Resolves when all samples have been played or `stop` is raised; the
    /// stop flag is checked every [`PLAYBACK_POLL_INTERVAL`].
    ///
    /// # Errors
    ///
    /// Returns an error if the audio stream cannot be created or played.
    pub async fn play(
        &self,
        audio: &SynthesizedAudio,
        stop: &StopSignal,
    ) -> Result<PlaybackOutcome> {
        let samples = resample(
            &audio.samples,
            audio.sample_rate,
            self.stream_config.sample_rate,
        );
        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let flag = stop.flag();

        let _active = ActiveGuard::enter(&self.active);
        tokio::task::spawn_blocking(move || play_blocking(&device, &stream_config, samples, &flag))
            .await
            .map_err(|e| SpeechError::Audio(format!("playback task failed: {e}")))?
    }

    /// Resolve once no playback call is running.
    pub async fn wait_until_finished(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
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

fn play_blocking(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    samples: Vec<f32>,
    stop: &StopFlag,
) -> Result<PlaybackOutcome> {
    if samples.is_empty() {
        return Ok(PlaybackOutcome::Finished);
    }

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));

    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut buf) = buffer_clone.lock() else {
                    return;
                };

                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| SpeechError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SpeechError::Audio(format!("failed to start output stream: {e}")))?;

    let outcome = loop {
        std::thread::sleep(PLAYBACK_POLL_INTERVAL);
        if stop.is_set() {
            debug!("playback stopped");
            break PlaybackOutcome::Stopped;
        }
        let buf = buffer
            .lock()
            .map_err(|e| SpeechError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break PlaybackOutcome::Finished;
        }
    };

    drop(stream);
    Ok(outcome)
}

/// Keeps the active-playback count raised while a `play` future is alive.
struct ActiveGuard<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a watch::Sender<usize>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}
