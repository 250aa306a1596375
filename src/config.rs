//! Configuration types for the dialog loop and its providers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable consulted when an API key is not set in the file.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Utterance endpointing settings.
    pub recording: RecordingConfig,
    /// Wake word gate settings.
    pub wakeword: WakewordConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Dialog loop behaviour (thresholds, fixed phrases).
    pub conversation: ConversationConfig,
    /// Barge-in (interrupt) behaviour while the assistant is speaking.
    pub barge_in: BargeInConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. Audio is resampled to this rate.
    pub input_sample_rate: u32,
    /// Number of samples per captured frame.
    pub frame_samples: usize,
    /// Output sample rate in Hz. Synthesized audio is resampled to this rate.
    pub output_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            frame_samples: 1024,
            output_sample_rate: 24_000,
            input_device: None,
            output_device: None,
        }
    }
}

/// Utterance endpointing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Audio retained unconditionally after recording starts (seconds).
    pub lead_time_secs: f32,
    /// Mean absolute amplitude below which a frame counts as silence.
    ///
    /// Samples are f32 in \[-1, 1\]; 0.008 is roughly 250 on a 16-bit scale.
    pub silence_threshold: f32,
    /// Continuous silence that ends an utterance (ms).
    pub silence_duration_ms: u32,
    /// Hard cap on the utterance length (seconds).
    pub max_duration_secs: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            lead_time_secs: 2.0,
            silence_threshold: 0.008,
            silence_duration_ms: 2000,
            max_duration_secs: 15.0,
        }
    }
}

/// Which wake word detector to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakewordProvider {
    /// Transcribe short phrases and look for the wake word in the text.
    #[default]
    Transcript,
    /// Trigger on every line typed on standard input.
    Manual,
}

/// Wake word gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Detector variant.
    pub provider: WakewordProvider,
    /// The trigger phrase (matched case-insensitively).
    pub wake_word: String,
    /// Mean absolute amplitude that starts a candidate phrase.
    pub energy_threshold: f32,
    /// Silence that closes a candidate phrase (ms).
    pub phrase_silence_ms: u32,
    /// Maximum length of a candidate phrase (seconds).
    pub max_phrase_secs: f32,
    /// Play a short chime once the wake word is detected.
    pub chime: bool,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            provider: WakewordProvider::default(),
            wake_word: "computer".to_owned(),
            energy_threshold: 0.008,
            phrase_silence_ms: 800,
            max_phrase_secs: 4.0,
            chime: true,
        }
    }
}

/// Which speech-to-text backend to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    /// OpenAI-compatible `/v1/audio/transcriptions` endpoint.
    #[default]
    OpenAi,
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Backend variant.
    pub provider: SttProvider,
    /// Base URL of the transcription server.
    pub api_url: String,
    /// Model name sent with each request.
    pub model: String,
    /// API key (falls back to `OPENAI_API_KEY`).
    pub api_key: Option<String>,
    /// Spoken language hint (ISO-639-1).
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::default(),
            api_url: "http://127.0.0.1:8000".to_owned(),
            model: "whisper-1".to_owned(),
            api_key: None,
            language: Some("de".to_owned()),
        }
    }
}

/// Which language model backend to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions API (Ollama, vLLM, llama.cpp, ...).
    #[default]
    OpenAi,
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend variant.
    pub provider: LlmProvider,
    /// Base URL of the chat completions server.
    pub api_url: String,
    /// Model identifier.
    pub model: String,
    /// API key (falls back to `OPENAI_API_KEY`).
    pub api_key: Option<String>,
    /// System prompt placed at the start of every conversation.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            api_url: "http://localhost:11434".to_owned(),
            model: "llama3.2".to_owned(),
            api_key: None,
            system_prompt: "Du bist ein hilfreicher Sprachassistent. Antworte kurz, \
                            in ganzen Sätzen und ohne Formatierung."
                .to_owned(),
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// Which text-to-speech backend to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// OpenAI-compatible `/v1/audio/speech` endpoint.
    OpenAi,
    /// Local `espeak-ng` command-line synthesizer.
    #[default]
    Espeak,
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Backend variant.
    pub provider: TtsProvider,
    /// Base URL of the speech server.
    pub api_url: String,
    /// Speech model name.
    pub model: String,
    /// Voice name.
    pub voice: String,
    /// API key (falls back to `OPENAI_API_KEY`).
    pub api_key: Option<String>,
    /// Path or name of the espeak binary.
    pub espeak_binary: String,
    /// espeak voice / language.
    pub espeak_voice: String,
    /// Pause after each spoken sentence (ms).
    pub inter_utterance_pause_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            api_url: "http://127.0.0.1:8000".to_owned(),
            model: "tts-1".to_owned(),
            voice: "alloy".to_owned(),
            api_key: None,
            espeak_binary: "espeak-ng".to_owned(),
            espeak_voice: "de".to_owned(),
            inter_utterance_pause_ms: 1200,
        }
    }
}

/// Dialog loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Transcripts with fewer trimmed characters trigger a re-prompt.
    pub min_transcript_chars: usize,
    /// Insufficient transcripts in a row that end the turn (0 = unbounded).
    ///
    /// Every earlier miss is answered with `reprompt_message`; the miss that
    /// reaches the bound is answered with `reprompt_limit_message` and the
    /// loop waits for the wake word again.
    pub max_reprompts: u32,
    /// A trailing response fragment must have more characters than this to be spoken.
    pub min_flush_chars: usize,
    /// Fuzzy-match score (0–100) at which a transcript ends the conversation.
    pub exit_threshold: u8,
    /// Phrases that end the conversation.
    pub exit_phrases: Vec<String>,
    /// Spoken when the transcript is too short.
    pub reprompt_message: String,
    /// Spoken when `max_reprompts` is reached, before waiting for the wake word.
    pub reprompt_limit_message: String,
    /// Spoken before the farewell phrase when the conversation ends.
    pub farewell_prefix: String,
    /// One of these is chosen at random on exit.
    pub farewell_phrases: Vec<String>,
    /// Speak a greeting (announcing the wake word) at start-up.
    pub greet_on_start: bool,
    /// One of these is chosen at random for the start-up greeting.
    pub greetings: Vec<String>,
    /// Completion debouncer poll interval (ms).
    pub completion_poll_ms: u64,
    /// Inactive polls that must be exceeded before speech counts as finished.
    pub completion_idle_polls: u32,
    /// Upper bound on the completion wait (seconds).
    pub completion_max_wait_secs: u64,
    /// Echo the streamed response to stdout.
    pub console_output: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            min_transcript_chars: 10,
            max_reprompts: 3,
            min_flush_chars: 2,
            exit_threshold: crate::llm::DEFAULT_EXIT_THRESHOLD,
            exit_phrases: to_strings(&[
                "stop chat",
                "end chat",
                "goodbye",
                "exit",
                "bye",
                "finish",
                "halt stoppen",
                "chat beenden",
                "auf wiedersehen",
                "tschüss",
                "ende",
                "schluss",
            ]),
            reprompt_message: "Ich habe dich nicht verstanden. Sag es noch mal.".to_owned(),
            reprompt_limit_message: "Ich warte wieder auf das Aktivierungswort.".to_owned(),
            farewell_prefix: "Ich beende das Programm, ".to_owned(),
            farewell_phrases: to_strings(&[
                "Auf Wiedersehen!",
                "Mach's gut!",
                "Bis zum nächsten Mal!",
                "Tschüss!",
                "Ciao!",
                "Adieu!",
                "Schönen Tag noch!",
                "Bis bald!",
                "Pass auf dich auf!",
                "Bleib gesund!",
                "Man sieht sich!",
                "Bis später!",
                "Bis dann!",
                "Alles Gute!",
                "Leb wohl!",
            ]),
            greet_on_start: true,
            greetings: to_strings(&[
                "Guten Tag!",
                "Hallo und willkommen!",
                "Schön, dass du da bist!",
                "Hey, alles klar?",
                "Herzlich willkommen!",
            ]),
            completion_poll_ms: 100,
            completion_idle_polls: 15,
            completion_max_wait_secs: 120,
            console_output: true,
        }
    }
}

/// Barge-in configuration (user interrupts the assistant with the wake word).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Whether the interrupt monitor runs while the assistant speaks.
    pub enabled: bool,
    /// Spoken after queued speech has been dropped.
    pub replacement_message: Option<String>,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            replacement_message: Some("Okay, ich höre.".to_owned()),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Resolve an API key from config, falling back to [`API_KEY_ENV`].
pub fn resolve_api_key(configured: &Option<String>) -> Option<String> {
    configured
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed (including
    /// unknown provider names).
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/colloquy/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("colloquy")
            .join("config.toml")
    }
}
