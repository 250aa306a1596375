//! Colloquy: the turn-taking core of a spoken-dialog assistant.
//!
//! A single dialog loop gates on a wake word, records an utterance with
//! silence endpointing, transcribes it, streams a chat-completion response
//! and speaks it sentence by sentence while the rest is still arriving:
//! Microphone → Endpointer → STT → LLM → Segmenter → Speech queue → Speaker
//!
//! # Architecture
//!
//! - **Audio**: capture and playback via `cpal`, behind [`audio::AudioDevice`]
//! - **Wake word**: transcript matching or a manual Enter trigger
//! - **STT / LLM / TTS**: trait-based providers, selected from configuration
//! - **Pipeline**: the endpointer, sentence segmenter, speech queue,
//!   completion debouncer and the [`DialogCoordinator`] state machine

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod startup;
pub mod stt;
pub mod tts;
pub mod wakeword;

pub use config::SpeechConfig;
pub use conversation::{ChatMessage, ConversationState, Role};
pub use error::{Result, SpeechError};
pub use pipeline::coordinator::{DialogCoordinator, DialogState, SessionEnd, SessionSummary};
pub use startup::Providers;
