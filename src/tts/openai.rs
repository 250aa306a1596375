//! OpenAI-compatible `/v1/audio/speech` backend.

use crate::config::{TtsConfig, resolve_api_key};
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::SynthesizedAudio;
use crate::tts::TextToSpeech;
use async_trait::async_trait;
use tracing::debug;

/// Speech synthesis over HTTP, requesting WAV output.
pub struct OpenAiTts {
    client: reqwest::Client,
    url: String,
    model: String,
    voice: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTts")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl OpenAiTts {
    /// Create a client for the configured endpoint.
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/audio/speech", config.api_url.trim_end_matches('/')),
            model: config.model.clone(),
            voice: config.voice.clone(),
            api_key: resolve_api_key(&config.api_key),
        }
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "wav",
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Tts(format!("speech request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SpeechError::Tts(format!(
                "speech endpoint returned HTTP {}: {body_text}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Tts(format!("cannot read speech response: {e}")))?;
        debug!(bytes = bytes.len(), "speech audio received");
        SynthesizedAudio::from_wav_bytes(&bytes)
    }
}
