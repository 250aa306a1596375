//! Language model contract and the OpenAI-compatible streaming backend.

mod api;
pub mod farewell;
pub mod sse;

pub use api::OpenAiLlm;
pub use farewell::FarewellMatcher;

use crate::conversation::ChatMessage;
use crate::error::Result;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// Default fuzzy-match score at which a transcript counts as a farewell.
pub const DEFAULT_EXIT_THRESHOLD: u8 = 80;

/// Lazily produced, ordered, non-restartable response text.
///
/// An `Err` item ends the response early; fragments received before it
/// remain valid.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Chat model used by the dialog loop.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start generating a reply to the full conversation history.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpeechError::Llm`] if the request cannot be started.
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream>;

    /// The phrases that end the conversation.
    fn exit_phrases(&self) -> &[String];

    /// Whether `text` matches an exit phrase with a score of at least
    /// `threshold` (0-100).
    fn is_conversation_ending(&self, text: &str, threshold: u8) -> bool {
        FarewellMatcher::new(self.exit_phrases().iter().cloned(), threshold).is_farewell(text)
    }
}
