//! Message types passed between pipeline stages.

use crate::error::{Result, SpeechError};
use std::io::Cursor;
use std::time::Duration;

/// A fixed-size chunk of raw audio samples from the microphone.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Mean absolute amplitude of the frame.
    pub fn mean_amplitude(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.abs()).sum::<f32>() / self.samples.len() as f32
    }

    /// Audio duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// A finished recording, ready for transcription.
///
/// Built once from the captured frames and never modified afterwards.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<f32>,
    sample_rate: u32,
    frame_count: usize,
}

impl Utterance {
    /// Concatenate frames into an utterance.
    pub fn from_frames(frames: Vec<AudioFrame>) -> Self {
        let sample_rate = frames.first().map_or(0, |f| f.sample_rate);
        let frame_count = frames.len();
        let samples = frames.into_iter().flat_map(|f| f.samples).collect();
        Self {
            samples,
            sample_rate,
            frame_count,
        }
    }

    /// The recorded samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames the utterance was built from.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Whether the utterance holds no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Audio duration of the utterance.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Encode as a 16-bit mono WAV file.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAV writer fails.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SpeechError::Audio(format!("cannot create WAV writer: {e}")))?;
            for &s in &self.samples {
                let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                writer
                    .write_sample(v)
                    .map_err(|e| SpeechError::Audio(format!("cannot write WAV sample: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| SpeechError::Audio(format!("cannot finalize WAV: {e}")))?;
        }
        Ok(cursor.into_inner())
    }
}

/// A sentence extracted from the LLM fragment stream, ready for TTS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceChunk {
    /// Sentence text (trimmed).
    pub text: String,
    /// Whether this is the unterminated remainder flushed at stream end.
    pub is_final: bool,
}

/// Synthesized audio from TTS, ready for playback.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// f32 audio samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    /// Decode a WAV byte buffer (any integer or float format, any channel count).
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a readable WAV file.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| SpeechError::Tts(format!("invalid WAV data: {e}")))?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => read_until_eof(reader.into_samples::<f32>())?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                read_until_eof(reader.into_samples::<i32>())?
                    .into_iter()
                    .map(|v| v as f32 / scale)
                    .collect()
            }
        };
        let samples = if spec.channels > 1 {
            crate::audio::to_mono(&interleaved, spec.channels)
        } else {
            interleaved
        };
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }
}

/// Exact duration of `samples` at `sample_rate`, in whole nanoseconds.
fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos(samples as u64 * 1_000_000_000 / u64::from(sample_rate))
}

/// Collect WAV samples, stopping quietly at a premature end of data.
///
/// Streaming writers (`espeak-ng --stdout`) emit a placeholder data length,
/// so running out of bytes early is expected.
fn read_until_eof<T>(samples: impl Iterator<Item = hound::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for sample in samples {
        match sample {
            Ok(v) => out.push(v),
            Err(hound::Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(SpeechError::Tts(format!("cannot read WAV samples: {e}"))),
        }
    }
    Ok(out)
}
