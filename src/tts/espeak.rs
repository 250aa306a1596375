//! `espeak-ng` command-line backend.

use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::SynthesizedAudio;
use crate::tts::TextToSpeech;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Renders speech by running `espeak-ng --stdout` once per sentence.
#[derive(Debug, Clone)]
pub struct EspeakTts {
    binary: String,
    voice: String,
}

impl EspeakTts {
    /// Check that the binary runs and remember the voice.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be executed.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let output = std::process::Command::new(&config.espeak_binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SpeechError::Tts(format!(
                    "cannot run '{}' (is espeak-ng installed?): {e}",
                    config.espeak_binary
                ))
            })?;
        let version = String::from_utf8_lossy(&output.stdout);
        info!("using {}", version.trim());

        Ok(Self {
            binary: config.espeak_binary.clone(),
            voice: config.espeak_voice.clone(),
        })
    }
}

#[async_trait]
impl TextToSpeech for EspeakTts {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let output = Command::new(&self.binary)
            .args(["-v", &self.voice, "--stdout", "--", text])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpeechError::Tts(format!("cannot run {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(SpeechError::Tts(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        SynthesizedAudio::from_wav_bytes(&output.stdout)
    }
}
