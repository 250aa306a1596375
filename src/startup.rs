//! Startup initialization: builds every provider from the configuration.
//!
//! Call [`initialize_providers`] once at startup. Any failure here (unknown
//! device, missing `espeak-ng`, ...) is fatal before a session begins.

use crate::audio::{AudioDevice, CpalDevice};
use crate::config::{
    LlmProvider, SpeechConfig, SttProvider, TtsProvider, WakewordProvider,
};
use crate::error::Result;
use crate::llm::{LanguageModel, OpenAiLlm};
use crate::stt::{OpenAiStt, SpeechToText};
use crate::tts::{EspeakTts, OpenAiTts, TextToSpeech};
use crate::wakeword::{ManualTrigger, TranscriptWakeword, WakeWordDetector};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Every provider handle the dialog loop needs, constructed once and passed
/// explicitly.
#[derive(Clone)]
pub struct Providers {
    /// Microphone and speaker.
    pub audio: Arc<dyn AudioDevice>,
    /// Wake word gate.
    pub wakeword: Arc<dyn WakeWordDetector>,
    /// Transcription.
    pub stt: Arc<dyn SpeechToText>,
    /// Sentence rendering.
    pub tts: Arc<dyn TextToSpeech>,
    /// Response generation.
    pub llm: Arc<dyn LanguageModel>,
}

/// Build the providers selected in `config`.
///
/// # Errors
///
/// Returns an error if the audio devices cannot be opened or a provider
/// cannot be constructed.
pub fn initialize_providers(config: &SpeechConfig) -> Result<Providers> {
    let started = Instant::now();
    let audio: Arc<dyn AudioDevice> = Arc::new(CpalDevice::new(&config.audio)?);
    let providers = build_providers(config, audio)?;
    info!(
        "providers ready in {:.1}s",
        started.elapsed().as_secs_f32()
    );
    Ok(providers)
}

/// Build the non-audio providers around an existing audio device.
///
/// # Errors
///
/// Returns an error if a provider cannot be constructed.
pub fn build_providers(config: &SpeechConfig, audio: Arc<dyn AudioDevice>) -> Result<Providers> {
    let stt: Arc<dyn SpeechToText> = match config.stt.provider {
        SttProvider::OpenAi => Arc::new(OpenAiStt::new(&config.stt)),
    };

    let tts: Arc<dyn TextToSpeech> = match config.tts.provider {
        TtsProvider::OpenAi => Arc::new(OpenAiTts::new(&config.tts)),
        TtsProvider::Espeak => Arc::new(EspeakTts::new(&config.tts)?),
    };

    let llm: Arc<dyn LanguageModel> = match config.llm.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiLlm::new(
            &config.llm,
            config.conversation.exit_phrases.clone(),
        )),
    };

    let wakeword: Arc<dyn WakeWordDetector> = match config.wakeword.provider {
        WakewordProvider::Transcript => Arc::new(TranscriptWakeword::new(
            &config.wakeword,
            Arc::clone(&audio),
            Arc::clone(&stt),
        )),
        WakewordProvider::Manual => Arc::new(ManualTrigger::new()),
    };

    info!(
        wakeword = ?config.wakeword.provider,
        stt = ?config.stt.provider,
        tts = ?config.tts.provider,
        llm = ?config.llm.provider,
        "providers selected"
    );

    Ok(Providers {
        audio,
        wakeword,
        stt,
        tts,
        llm,
    })
}
