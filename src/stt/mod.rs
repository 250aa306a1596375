//! Speech-to-text contract and the OpenAI-compatible HTTP backend.

use crate::audio::RecordStream;
use crate::config::{SttConfig, resolve_api_key};
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::Utterance;
use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, info};

/// Incremental transcription results.
pub type TextStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Turns recorded speech into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a finished utterance.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Stt`] if transcription fails.
    async fn transcribe(&self, utterance: &Utterance) -> Result<String>;

    /// Transcribe a live frame stream.
    ///
    /// The default collects frames until the stream ends and transcribes
    /// them once, yielding a single result. Backends with real streaming
    /// recognition yield partial results instead.
    fn transcribe_stream<'a>(&'a self, mut frames: RecordStream) -> TextStream<'a> {
        Box::pin(async_stream::stream! {
            let mut collected = Vec::new();
            while let Some(frame) = frames.next_frame().await {
                collected.push(frame);
            }
            let utterance = Utterance::from_frames(collected);
            if !utterance.is_empty() {
                yield self.transcribe(&utterance).await;
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcription via an OpenAI-compatible `/v1/audio/transcriptions` endpoint
/// (OpenAI, faster-whisper-server, whisper.cpp server, ...).
pub struct OpenAiStt {
    client: reqwest::Client,
    url: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiStt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiStt")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("language", &self.language)
            .finish()
    }
}

impl OpenAiStt {
    /// Configure the client.
    pub fn new(config: &SttConfig) -> Self {
        let url = format!(
            "{}/v1/audio/transcriptions",
            config.api_url.trim_end_matches('/')
        );
        info!("STT configured: {url} model={}", config.model);
        Self {
            client: reqwest::Client::new(),
            url,
            model: config.model.clone(),
            language: config.language.clone(),
            api_key: resolve_api_key(&config.api_key),
        }
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
        if utterance.is_empty() {
            return Ok(String::new());
        }
        let started = Instant::now();
        let wav = utterance.to_wav_bytes()?;
        debug!(audio_bytes = wav.len(), "starting transcription");

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Stt(format!("transcription request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Stt(format!(
                "transcription endpoint returned HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Stt(format!("unexpected transcription response: {e}")))?;
        let text = result.text.trim().to_owned();
        info!(
            "transcribed {:.1}s of audio in {}ms: \"{text}\"",
            utterance.duration().as_secs_f32(),
            started.elapsed().as_millis()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::pipeline::messages::AudioFrame;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Reports how many samples it was given.
    #[derive(Default)]
    struct CountingStt {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SpeechToText for CountingStt {
        async fn transcribe(&self, utterance: &Utterance) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(format!("{} samples", utterance.samples().len()))
        }
    }

    #[tokio::test]
    async fn default_stream_transcribes_once_at_end() {
        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(AudioFrame::new(vec![0.1; 160], 16_000)).await.unwrap();
        }
        drop(tx);

        let stt = CountingStt::default();
        let results: Vec<String> = stt
            .transcribe_stream(RecordStream::from_receiver(rx))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(results, vec!["480 samples"]);
        assert_eq!(*stt.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn default_stream_of_nothing_yields_nothing() {
        let (tx, rx) = mpsc::channel::<AudioFrame>(1);
        drop(tx);
        let stt = CountingStt::default();
        let results: Vec<Result<String>> = stt
            .transcribe_stream(RecordStream::from_receiver(rx))
            .collect()
            .await;
        assert!(results.is_empty());
        assert_eq!(*stt.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_utterance_skips_the_request() {
        let stt = OpenAiStt::new(&SttConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..SttConfig::default()
        });
        let text = stt.transcribe(&Utterance::from_frames(Vec::new())).await.unwrap();
        assert!(text.is_empty());
    }
}
