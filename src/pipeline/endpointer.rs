//! Utterance endpointing using energy-based silence detection.
//!
//! After a wake trigger the endpointer keeps everything captured during a
//! short lead time, then counts consecutive silent frames (mean absolute
//! amplitude below a threshold). A long enough silence run, or the maximum
//! duration, ends the recording.

use crate::audio::AudioDevice;
use crate::config::RecordingConfig;
use crate::error::Result;
use crate::pipeline::messages::{AudioFrame, Utterance};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extra wall-clock time granted beyond the maximum duration before a
/// stalled source is abandoned.
const STALL_GRACE: Duration = Duration::from_secs(1);

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The silence run reached its limit; trailing silence was trimmed.
    Silence,
    /// The maximum duration was reached.
    MaxDuration,
    /// The audio source ended or stalled.
    SourceEnded,
}

/// Parameters for one recording.
#[derive(Debug, Clone, Copy)]
pub struct RecordSettings {
    /// Audio retained unconditionally at the start.
    pub lead_time: Duration,
    /// Mean absolute amplitude below which a frame is silent.
    pub silence_threshold: f32,
    /// Silence that ends the utterance.
    pub silence_duration: Duration,
    /// Hard cap on the utterance length.
    pub max_duration: Duration,
}

impl From<&RecordingConfig> for RecordSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            lead_time: Duration::from_secs_f32(config.lead_time_secs.max(0.0)),
            silence_threshold: config.silence_threshold,
            silence_duration: Duration::from_millis(u64::from(config.silence_duration_ms)),
            max_duration: Duration::from_secs_f32(config.max_duration_secs.max(0.0)),
        }
    }
}

/// Captures one utterance from an [`AudioDevice`].
pub struct Endpointer {
    device: Arc<dyn AudioDevice>,
    silence_duration: Duration,
}

impl Endpointer {
    /// Create an endpointer whose silence run must last `silence_duration`.
    pub fn new(device: Arc<dyn AudioDevice>, silence_duration: Duration) -> Self {
        Self {
            device,
            silence_duration,
        }
    }

    /// Record until silence or the maximum duration.
    ///
    /// # Errors
    ///
    /// Returns an error if the record stream cannot be opened.
    pub async fn record(
        &self,
        lead_time: Duration,
        silence_threshold: f32,
        max_duration: Duration,
    ) -> Result<Utterance> {
        let settings = RecordSettings {
            lead_time,
            silence_threshold,
            silence_duration: self.silence_duration,
            max_duration,
        };
        let (utterance, _) = self.record_with(settings).await?;
        Ok(utterance)
    }

    /// Record with explicit settings, also reporting why recording ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the record stream cannot be opened.
    pub async fn record_with(&self, settings: RecordSettings) -> Result<(Utterance, StopReason)> {
        let mut stream = self.device.open_record_stream().await?;
        info!("recording...");

        let deadline = tokio::time::Instant::now() + settings.max_duration + STALL_GRACE;
        let mut tracker = SilenceTracker::new(settings);

        let reason = loop {
            let frame = match tokio::time::timeout_at(deadline, stream.next_frame()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    warn!("record stream ended before the utterance was complete");
                    break StopReason::SourceEnded;
                }
                Err(_) => {
                    warn!("record stream stalled, stopping at the wall-clock deadline");
                    break StopReason::SourceEnded;
                }
            };
            if let Some(reason) = tracker.push(frame) {
                break reason;
            }
        };
        drop(stream);

        let frames = tracker.finish(reason);
        let utterance = self.device.build_utterance(frames);
        info!(
            reason = ?reason,
            duration_ms = utterance.duration().as_millis() as u64,
            "recording stopped"
        );
        Ok((utterance, reason))
    }
}

/// Frame-by-frame endpointing state, measured on the audio clock.
struct SilenceTracker {
    settings: RecordSettings,
    frames: Vec<AudioFrame>,
    elapsed: Duration,
    silence_run: usize,
    silence_elapsed: Duration,
}

impl SilenceTracker {
    fn new(settings: RecordSettings) -> Self {
        Self {
            settings,
            frames: Vec::new(),
            elapsed: Duration::ZERO,
            silence_run: 0,
            silence_elapsed: Duration::ZERO,
        }
    }

    /// Add a frame; returns a stop reason once recording should end.
    fn push(&mut self, frame: AudioFrame) -> Option<StopReason> {
        let started_at = self.elapsed;
        let frame_duration = frame.duration();

        if started_at >= self.settings.lead_time {
            if frame.mean_amplitude() < self.settings.silence_threshold {
                self.silence_run += 1;
                self.silence_elapsed += frame_duration;
            } else {
                self.silence_run = 0;
                self.silence_elapsed = Duration::ZERO;
            }
        }

        self.frames.push(frame);
        self.elapsed += frame_duration;

        if self.silence_run > 0 && self.silence_elapsed >= self.settings.silence_duration {
            debug!(frames = self.silence_run, "silence run complete");
            return Some(StopReason::Silence);
        }
        if self.elapsed >= self.settings.max_duration {
            return Some(StopReason::MaxDuration);
        }
        None
    }

    /// Return the kept frames, trimming the silence run that ended the recording.
    fn finish(mut self, reason: StopReason) -> Vec<AudioFrame> {
        if reason == StopReason::Silence {
            let keep = self.frames.len().saturating_sub(self.silence_run);
            self.frames.truncate(keep);
        }
        self.frames
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::audio::{PlaybackOutcome, RecordStream};
    use crate::error::SpeechError;
    use crate::pipeline::messages::SynthesizedAudio;
    use crate::pipeline::stop::StopSignal;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    const RATE: u32 = 16_000;
    const FRAME: usize = 1600; // 100ms

    fn settings() -> RecordSettings {
        RecordSettings {
            lead_time: Duration::from_secs(1),
            silence_threshold: 0.01,
            silence_duration: Duration::from_millis(500),
            max_duration: Duration::from_secs(3),
        }
    }

    fn frame(amplitude: f32) -> AudioFrame {
        AudioFrame::new(vec![amplitude; FRAME], RATE)
    }

    #[test]
    fn silence_during_lead_time_is_not_counted() {
        let mut tracker = SilenceTracker::new(settings());
        for _ in 0..10 {
            assert_eq!(tracker.push(frame(0.0)), None);
        }
        assert_eq!(tracker.silence_run, 0);
    }

    #[test]
    fn loud_frame_resets_silence_run() {
        let mut tracker = SilenceTracker::new(settings());
        for _ in 0..10 {
            tracker.push(frame(0.5));
        }
        for _ in 0..4 {
            assert_eq!(tracker.push(frame(0.0)), None);
        }
        tracker.push(frame(0.5));
        assert_eq!(tracker.silence_run, 0);
        for _ in 0..4 {
            assert_eq!(tracker.push(frame(0.0)), None);
        }
        assert_eq!(tracker.push(frame(0.0)), Some(StopReason::Silence));
    }

    #[test]
    fn silence_stop_trims_only_the_run() {
        let mut tracker = SilenceTracker::new(settings());
        for _ in 0..12 {
            tracker.push(frame(0.5));
        }
        let mut reason = None;
        while reason.is_none() {
            reason = tracker.push(frame(0.001));
        }
        let frames = tracker.finish(StopReason::Silence);
        assert_eq!(frames.len(), 12);
        assert!(frames.iter().all(|f| f.mean_amplitude() >= 0.5));
    }

    #[test]
    fn max_duration_keeps_everything() {
        let mut tracker = SilenceTracker::new(settings());
        let mut pushed = 0;
        let reason = loop {
            pushed += 1;
            if let Some(r) = tracker.push(frame(0.5)) {
                break r;
            }
        };
        assert_eq!(reason, StopReason::MaxDuration);
        assert_eq!(pushed, 30);
        assert_eq!(tracker.finish(reason).len(), 30);
    }

    /// Hands out one prepared frame receiver.
    struct ScriptedDevice(std::sync::Mutex<Option<mpsc::Receiver<AudioFrame>>>);

    impl ScriptedDevice {
        fn new(rx: mpsc::Receiver<AudioFrame>) -> Arc<Self> {
            Arc::new(Self(std::sync::Mutex::new(Some(rx))))
        }
    }

    #[async_trait]
    impl AudioDevice for ScriptedDevice {
        async fn open_record_stream(&self) -> Result<RecordStream> {
            self.0
                .lock()
                .unwrap()
                .take()
                .map(RecordStream::from_receiver)
                .ok_or_else(|| SpeechError::Audio("device busy".into()))
        }

        async fn play(&self, _audio: &SynthesizedAudio, _stop: &StopSignal) -> Result<PlaybackOutcome> {
            Ok(PlaybackOutcome::Finished)
        }

        async fn wait_until_playback_finished(&self) {}
    }

    fn endpointer(rx: mpsc::Receiver<AudioFrame>) -> Endpointer {
        Endpointer::new(ScriptedDevice::new(rx), Duration::from_secs(2))
    }

    async fn record_default(endpointer: &Endpointer) -> Result<Utterance> {
        endpointer
            .record(Duration::from_secs(2), 0.01, Duration::from_secs(15))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn record_stops_after_silence_and_drops_it() {
        let (tx, rx) = mpsc::channel(64);
        for _ in 0..20 {
            tx.try_send(frame(0.5)).unwrap();
        }
        for _ in 0..25 {
            tx.try_send(frame(0.0)).unwrap();
        }

        let utterance = record_default(&endpointer(rx)).await.unwrap();
        assert_eq!(utterance.frame_count(), 20);
        assert_eq!(utterance.duration(), Duration::from_secs(2));
        // The device stream was released.
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn record_stops_exactly_at_max_duration() {
        let (tx, rx) = mpsc::channel(8);
        let producer = tokio::spawn(async move {
            while tx.send(frame(0.5)).await.is_ok() {}
        });

        let utterance = record_default(&endpointer(rx)).await.unwrap();
        assert_eq!(utterance.frame_count(), 150);
        assert_eq!(utterance.duration(), Duration::from_secs(15));
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_is_abandoned_at_the_wall_clock_deadline() {
        let (tx, rx) = mpsc::channel(8);
        for _ in 0..5 {
            tx.try_send(frame(0.5)).unwrap();
        }
        let started = tokio::time::Instant::now();

        let (utterance, reason) = endpointer(rx)
            .record_with(RecordSettings {
                lead_time: Duration::from_secs(2),
                silence_threshold: 0.01,
                silence_duration: Duration::from_secs(2),
                max_duration: Duration::from_secs(15),
            })
            .await
            .unwrap();
        assert_eq!(reason, StopReason::SourceEnded);
        assert_eq!(utterance.frame_count(), 5);
        assert_eq!(utterance.duration(), Duration::from_millis(500));
        assert_eq!(started.elapsed(), Duration::from_secs(16));
        drop(tx);
    }

    #[tokio::test]
    async fn unopenable_device_is_an_audio_error() {
        let device = Arc::new(ScriptedDevice(std::sync::Mutex::new(None)));
        let endpointer = Endpointer::new(device, Duration::from_secs(2));
        let err = record_default(&endpointer).await.unwrap_err();
        assert!(matches!(err, SpeechError::Audio(_)));
    }

    #[test]
    fn amplitude_equal_to_threshold_is_not_silence() {
        let mut tracker = SilenceTracker::new(settings());
        for _ in 0..10 {
            tracker.push(frame(0.5));
        }
        tracker.push(frame(0.01));
        assert_eq!(tracker.silence_run, 0);
    }
}
