//! Wake word gating.
//!
//! [`TranscriptWakeword`] listens for short phrases (energy onset followed
//! by a pause), transcribes each one and fires when the transcript contains
//! the configured wake word. [`ManualTrigger`] fires on every line read
//! from standard input, for setups without a reliable microphone.

use crate::audio::AudioDevice;
use crate::config::WakewordConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use crate::stt::SpeechToText;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Audio kept from before the onset so the first syllable is not clipped.
const PRE_ROLL: Duration = Duration::from_millis(300);

/// Blocks until a trigger condition is detected.
#[async_trait]
pub trait WakeWordDetector: Send + Sync {
    /// Resolve once the wake word (or trigger) is detected.
    ///
    /// Recognition hiccups are logged and listening continues.
    ///
    /// # Errors
    ///
    /// Returns an error only if the input source cannot be used at all.
    async fn await_wake_word(&self) -> Result<()>;
}

/// Wake word detection by transcribing short phrases.
pub struct TranscriptWakeword {
    audio: Arc<dyn AudioDevice>,
    stt: Arc<dyn SpeechToText>,
    wake_word: String,
    energy_threshold: f32,
    phrase_silence: Duration,
    max_phrase: Duration,
}

impl TranscriptWakeword {
    /// Build from the wake word settings.
    pub fn new(
        config: &WakewordConfig,
        audio: Arc<dyn AudioDevice>,
        stt: Arc<dyn SpeechToText>,
    ) -> Self {
        Self {
            audio,
            stt,
            wake_word: config.wake_word.trim().to_lowercase(),
            energy_threshold: config.energy_threshold,
            phrase_silence: Duration::from_millis(u64::from(config.phrase_silence_ms)),
            max_phrase: Duration::from_secs_f32(config.max_phrase_secs.max(0.1)),
        }
    }

    /// Whether a transcript contains the wake word.
    pub fn matches(&self, transcript: &str) -> bool {
        contains_wake_word(transcript, &self.wake_word)
    }
}

#[async_trait]
impl WakeWordDetector for TranscriptWakeword {
    async fn await_wake_word(&self) -> Result<()> {
        let mut stream = self.audio.open_record_stream().await?;
        let mut collector =
            PhraseCollector::new(self.energy_threshold, self.phrase_silence, self.max_phrase);
        info!(wake_word = %self.wake_word, "listening for wake word...");

        loop {
            let Some(frame) = stream.next_frame().await else {
                return Err(SpeechError::WakeWord("audio stream ended".into()));
            };
            let Some(phrase) = collector.push(frame) else {
                continue;
            };

            let utterance = self.audio.build_utterance(phrase);
            match self.stt.transcribe(&utterance).await {
                Ok(transcript) if self.matches(&transcript) => {
                    info!(transcript = %transcript, "wake word detected");
                    return Ok(());
                }
                Ok(transcript) => debug!(transcript = %transcript, "no wake word in phrase"),
                Err(e) => warn!("could not transcribe phrase, still listening: {e}"),
            }
        }
    }
}

fn contains_wake_word(transcript: &str, wake_word: &str) -> bool {
    !wake_word.is_empty() && transcript.to_lowercase().contains(wake_word)
}

/// Cuts a frame stream into phrases: onset above the energy threshold,
/// end after a pause or at the maximum phrase length.
struct PhraseCollector {
    threshold: f32,
    pause: Duration,
    max_phrase: Duration,
    pre_roll: VecDeque<AudioFrame>,
    pre_roll_len: Duration,
    phrase: Vec<AudioFrame>,
    phrase_len: Duration,
    silence: Duration,
}

impl PhraseCollector {
    fn new(threshold: f32, pause: Duration, max_phrase: Duration) -> Self {
        Self {
            threshold,
            pause,
            max_phrase,
            pre_roll: VecDeque::new(),
            pre_roll_len: Duration::ZERO,
            phrase: Vec::new(),
            phrase_len: Duration::ZERO,
            silence: Duration::ZERO,
        }
    }

    fn push(&mut self, frame: AudioFrame) -> Option<Vec<AudioFrame>> {
        let loud = frame.mean_amplitude() >= self.threshold;
        let len = frame.duration();

        if self.phrase.is_empty() {
            if !loud {
                self.pre_roll_len += len;
                self.pre_roll.push_back(frame);
                while self.pre_roll_len > PRE_ROLL {
                    let Some(old) = self.pre_roll.pop_front() else {
                        break;
                    };
                    self.pre_roll_len = self.pre_roll_len.saturating_sub(old.duration());
                }
                return None;
            }
            self.phrase.extend(self.pre_roll.drain(..));
            self.phrase_len = self.pre_roll_len;
            self.pre_roll_len = Duration::ZERO;
        }

        self.silence = if loud { Duration::ZERO } else { self.silence + len };
        self.phrase.push(frame);
        self.phrase_len += len;

        if self.silence >= self.pause || self.phrase_len >= self.max_phrase {
            self.phrase_len = Duration::ZERO;
            self.silence = Duration::ZERO;
            return Some(std::mem::take(&mut self.phrase));
        }
        None
    }
}

/// Fires whenever a line is read from standard input.
pub struct ManualTrigger {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTrigger {
    /// Read triggers from this process's stdin.
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl WakeWordDetector for ManualTrigger {
    async fn await_wake_word(&self) -> Result<()> {
        println!("Press Enter to talk...");
        let mut lines = self.lines.lock().await;
        match lines.next_line().await? {
            Some(_) => Ok(()),
            None => Err(SpeechError::WakeWord("standard input closed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::pipeline::messages::Utterance;

    const RATE: u32 = 16_000;

    fn frame(amplitude: f32) -> AudioFrame {
        // 100ms
        AudioFrame::new(vec![amplitude; 1600], RATE)
    }

    fn collector() -> PhraseCollector {
        PhraseCollector::new(0.01, Duration::from_millis(300), Duration::from_secs(2))
    }

    #[test]
    fn silence_never_forms_a_phrase() {
        let mut c = collector();
        for _ in 0..50 {
            assert!(c.push(frame(0.0)).is_none());
        }
        assert!(c.pre_roll.len() <= 3);
    }

    #[test]
    fn phrase_ends_after_pause_and_keeps_pre_roll() {
        let mut c = collector();
        for _ in 0..10 {
            c.push(frame(0.0));
        }
        for _ in 0..4 {
            assert!(c.push(frame(0.5)).is_none());
        }
        assert!(c.push(frame(0.0)).is_none());
        assert!(c.push(frame(0.0)).is_none());
        let phrase = c.push(frame(0.0)).unwrap();
        // 3 pre-roll + 4 loud + 3 pause frames.
        assert_eq!(phrase.len(), 10);
        assert_eq!(Utterance::from_frames(phrase).duration(), Duration::from_secs(1));
    }

    #[test]
    fn long_phrase_is_cut_at_maximum() {
        let mut c = collector();
        let mut pushed = 0;
        let phrase = loop {
            pushed += 1;
            if let Some(p) = c.push(frame(0.5)) {
                break p;
            }
        };
        assert_eq!(pushed, 20);
        assert_eq!(phrase.len(), 20);
    }

    #[test]
    fn wake_word_match_is_case_insensitive_substring() {
        assert!(contains_wake_word("Hey Computer, wie spät?", "computer"));
        assert!(!contains_wake_word("Hey Kompott", "computer"));
        assert!(!contains_wake_word("anything", ""));
    }
}
