//! OpenAI-compatible chat completions backend.
//!
//! Works with any server implementing `/v1/chat/completions` with
//! `stream: true`:
//! - Ollama (`http://localhost:11434`)
//! - vLLM, llama.cpp server, LM Studio
//! - OpenAI itself

use crate::config::{LlmConfig, resolve_api_key};
use crate::conversation::ChatMessage;
use crate::error::{Result, SpeechError};
use crate::llm::sse::{SseLineParser, completion_delta, error_message};
use crate::llm::{FragmentStream, LanguageModel};
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

/// Streaming chat model reached over HTTP.
pub struct OpenAiLlm {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: usize,
    exit_phrases: Vec<String>,
}

impl std::fmt::Debug for OpenAiLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiLlm")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiLlm {
    /// Configure the client.
    ///
    /// `exit_phrases` drive [`LanguageModel::is_conversation_ending`].
    pub fn new(config: &LlmConfig, exit_phrases: Vec<String>) -> Self {
        let url = format!(
            "{}/v1/chat/completions",
            config.api_url.trim_end_matches('/')
        );
        info!("API LLM configured: {url} model={}", config.model);
        Self {
            client: reqwest::Client::new(),
            url,
            model: config.model.clone(),
            api_key: resolve_api_key(&config.api_key),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            exit_phrases,
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let mut request = self.client.post(&self.url).json(&self.request_body(messages));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Llm(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Llm(format!(
                "chat endpoint returned HTTP {}: {}",
                status.as_u16(),
                error_message(&body)
            )));
        }
        debug!(messages = messages.len(), "response stream opened");

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseLineParser::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(SpeechError::Llm(format!("response stream broke: {e}")));
                        return;
                    }
                };
                for event in parser.push(&chunk) {
                    if event.is_done() {
                        return;
                    }
                    if let Some(delta) = completion_delta(&event.data) {
                        yield Ok(delta);
                    }
                }
            }
            if let Some(event) = parser.flush()
                && !event.is_done()
                && let Some(delta) = completion_delta(&event.data)
            {
                yield Ok(delta);
            }
        };
        Ok(Box::pin(stream))
    }

    fn exit_phrases(&self) -> &[String] {
        &self.exit_phrases
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn request_body_carries_history_in_order() {
        let llm = OpenAiLlm::new(&LlmConfig::default(), Vec::new());
        let body = llm.request_body(&[
            ChatMessage::system("sys"),
            ChatMessage::user("hallo"),
            ChatMessage::assistant("hi"),
        ]);
        assert_eq!(body["stream"], true);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(body["messages"][1]["content"], "hallo");
    }

    #[test]
    fn url_tolerates_trailing_slash() {
        let config = LlmConfig {
            api_url: "http://localhost:11434/".into(),
            ..LlmConfig::default()
        };
        let llm = OpenAiLlm::new(&config, Vec::new());
        assert_eq!(llm.url, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn farewell_check_honors_the_given_threshold() {
        let llm = OpenAiLlm::new(&LlmConfig::default(), vec!["tschüss".into()]);
        // Embedded phrase scores 90.
        assert!(llm.is_conversation_ending("Okay tschüss dann", 80));
        assert!(!llm.is_conversation_ending("Okay tschüss dann", 100));
        assert!(llm.is_conversation_ending("Tschüss!", 100));
        assert!(!llm.is_conversation_ending("Wie spät ist es?", 80));
    }
}
