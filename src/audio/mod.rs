//! Audio device contract plus the cpal implementation.
//!
//! The dialog loop only talks to [`AudioDevice`]; [`CpalDevice`] is the
//! concrete microphone/speaker backend selected at startup.

pub mod capture;
pub mod playback;

use crate::error::Result;
use crate::pipeline::messages::{AudioFrame, SynthesizedAudio, Utterance};
use crate::pipeline::stop::StopSignal;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub use capture::CpalCapture;
pub use playback::CpalPlayback;

/// How a playback call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every sample was played.
    Finished,
    /// The stop signal was raised before the end.
    Stopped,
}

/// Microphone and speaker capabilities used by the dialog loop.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// Open a live stream of fixed-size frames from the microphone.
    ///
    /// Dropping the returned stream closes the underlying device stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpeechError::Audio`] if the input device cannot be opened.
    async fn open_record_stream(&self) -> Result<RecordStream>;

    /// Turn captured frames into an utterance.
    fn build_utterance(&self, frames: Vec<AudioFrame>) -> Utterance {
        Utterance::from_frames(frames)
    }

    /// Play audio, returning when it finished or `stop` was raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be created.
    async fn play(&self, audio: &SynthesizedAudio, stop: &StopSignal) -> Result<PlaybackOutcome>;

    /// Resolve once nothing is playing on this device.
    async fn wait_until_playback_finished(&self);
}

/// A live stream of audio frames.
///
/// Wraps the receiving side of the capture channel. When the stream is
/// dropped the producer is told to stop so the device is released.
pub struct RecordStream {
    inner: ReceiverStream<AudioFrame>,
    closed: Arc<AtomicBool>,
}

impl RecordStream {
    /// Wrap a frame receiver. `closed` is raised when the stream is dropped.
    pub fn new(rx: mpsc::Receiver<AudioFrame>, closed: Arc<AtomicBool>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            closed,
        }
    }

    /// Wrap a frame receiver whose producer watches for channel closure only.
    pub fn from_receiver(rx: mpsc::Receiver<AudioFrame>) -> Self {
        Self::new(rx, Arc::new(AtomicBool::new(false)))
    }

    /// Receive the next frame, or `None` once the source has ended.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.inner.as_mut().recv().await
    }
}

impl Stream for RecordStream {
    type Item = AudioFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close();
    }
}

/// Microphone + speaker pair backed by cpal.
pub struct CpalDevice {
    capture: CpalCapture,
    playback: CpalPlayback,
}

impl CpalDevice {
    /// Resolve both devices from the audio config.
    ///
    /// # Errors
    ///
    /// Returns an error if either device cannot be found.
    pub fn new(config: &crate::config::AudioConfig) -> Result<Self> {
        Ok(Self {
            capture: CpalCapture::new(config)?,
            playback: CpalPlayback::new(config)?,
        })
    }
}

#[async_trait]
impl AudioDevice for CpalDevice {
    async fn open_record_stream(&self) -> Result<RecordStream> {
        self.capture.open().await
    }

    async fn play(&self, audio: &SynthesizedAudio, stop: &StopSignal) -> Result<PlaybackOutcome> {
        self.playback.play(audio, stop).await
    }

    async fn wait_until_playback_finished(&self) {
        self.playback.wait_until_finished().await;
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels.max(1));
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation resampler.
///
/// Good enough for speech in both directions (48kHz capture → 16kHz,
/// 22kHz synthesis → device rate).
pub fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// A short two-tone acknowledgement chime.
pub fn chime(sample_rate: u32) -> SynthesizedAudio {
    let tone = |freq: f32, ms: u32| {
        let n = (sample_rate as usize * ms as usize) / 1000;
        (0..n).map(move |i| {
            let t = i as f32 / sample_rate as f32;
            // Linear fade-out avoids a click at the end of each tone.
            let env = 1.0 - i as f32 / n as f32;
            0.2 * env * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
    };
    SynthesizedAudio {
        samples: tone(880.0, 90).chain(tone(1320.0, 120)).collect(),
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn to_mono_averages_channels() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn resample_halves_length() {
        let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let out = resample(&input, 48_000, 24_000);
        assert_eq!(out.len(), 240);
        assert!((out[1] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn chime_is_short_and_quiet() {
        let c = chime(16_000);
        assert_eq!(c.samples.len(), 16_000 * 210 / 1000);
        assert!(c.samples.iter().all(|s| s.abs() <= 0.2));
    }

    #[tokio::test]
    async fn dropping_record_stream_raises_closed_flag() {
        let (tx, rx) = mpsc::channel(4);
        let closed = Arc::new(AtomicBool::new(false));
        let mut stream = RecordStream::new(rx, Arc::clone(&closed));
        tx.send(AudioFrame::new(vec![0.0; 4], 16_000)).await.unwrap();
        assert!(stream.next_frame().await.is_some());
        drop(stream);
        assert!(closed.load(Ordering::SeqCst));
        assert!(tx.is_closed());
    }
}
