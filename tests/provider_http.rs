//! HTTP contract tests for the OpenAI-compatible STT, LLM and TTS clients.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use colloquy::config::{LlmConfig, SttConfig, TtsConfig, TtsProvider};
use colloquy::llm::{LanguageModel, OpenAiLlm};
use colloquy::pipeline::messages::{AudioFrame, Utterance};
use colloquy::stt::{OpenAiStt, SpeechToText};
use colloquy::tts::{OpenAiTts, TextToSpeech};
use colloquy::{ChatMessage, SpeechError};
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn llm(server: &MockServer) -> OpenAiLlm {
    let config = LlmConfig {
        api_url: server.uri(),
        model: "test-model".into(),
        api_key: Some("test-key".into()),
        ..LlmConfig::default()
    };
    OpenAiLlm::new(&config, vec!["auf wiedersehen".into()])
}

fn utterance() -> Utterance {
    Utterance::from_frames(vec![AudioFrame::new(vec![0.25; 1600], 16_000)])
}

fn sse(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": delta}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn collect(llm: &OpenAiLlm) -> Vec<String> {
    let stream = llm
        .chat_stream(&[ChatMessage::system("Sei kurz."), ChatMessage::user("Hallo")])
        .await
        .unwrap();
    stream.map(|r| r.unwrap()).collect().await
}

#[tokio::test]
async fn chat_stream_yields_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Sei kurz."},
                {"role": "user", "content": "Hallo"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse(&["Hal", "lo! ", "Wie geht's?"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(collect(&llm(&server)).await, vec!["Hal", "lo! ", "Wie geht's?"]);
}

#[tokio::test]
async fn done_marker_ends_the_stream() {
    let server = MockServer::start().await;
    let mut body = sse(&["Erst."]);
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": "never"}}]})
    ));
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    assert_eq!(collect(&llm(&server)).await, vec!["Erst."]);
}

#[tokio::test]
async fn role_only_and_empty_chunks_are_skipped() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\n: keep-alive\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"role": "assistant"}}]}),
        json!({"choices": [{"delta": {"content": "Ja."}}]}),
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    assert_eq!(collect(&llm(&server)).await, vec!["Ja."]);
}

#[tokio::test]
async fn http_error_fails_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": {"message": "model not found"}})),
        )
        .mount(&server)
        .await;

    let err = match llm(&server).chat_stream(&[ChatMessage::user("Hallo")]).await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    assert!(matches!(err, SpeechError::Llm(_)));
    let message = err.to_string();
    assert!(message.contains("404"), "{message}");
    assert!(message.contains("model not found"), "{message}");
}

#[tokio::test]
async fn farewell_detection_uses_configured_phrases() {
    let server = MockServer::start().await;
    let llm = llm(&server);
    assert!(llm.is_conversation_ending("Auf Wiedersehen!", 80));
    assert!(!llm.is_conversation_ending("Wie wird das Wetter morgen?", 80));
}

#[tokio::test]
async fn transcription_uploads_wav_and_trims_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("name=\"model\""))
        .and(body_string_contains("whisper-1"))
        .and(body_string_contains("name=\"language\""))
        .and(body_string_contains("filename=\"audio.wav\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  Hallo Welt \n"})))
        .expect(1)
        .mount(&server)
        .await;

    let stt = OpenAiStt::new(&SttConfig {
        api_url: server.uri(),
        model: "whisper-1".into(),
        api_key: Some("test-key".into()),
        language: Some("de".into()),
        ..SttConfig::default()
    });
    assert_eq!(stt.transcribe(&utterance()).await.unwrap(), "Hallo Welt");
}

#[tokio::test]
async fn transcription_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let stt = OpenAiStt::new(&SttConfig {
        api_url: server.uri(),
        api_key: Some("test-key".into()),
        ..SttConfig::default()
    });
    let err = stt.transcribe(&utterance()).await.unwrap_err();
    assert!(matches!(err, SpeechError::Stt(_)));
    assert!(err.to_string().contains("overloaded"));
}

#[tokio::test]
async fn speech_request_decodes_wav_response() {
    let server = MockServer::start().await;
    let wav = utterance().to_wav_bytes().unwrap();
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({
            "model": "tts-1",
            "voice": "alloy",
            "input": "Guten Tag.",
            "response_format": "wav"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wav))
        .expect(1)
        .mount(&server)
        .await;

    let tts = OpenAiTts::new(&TtsConfig {
        provider: TtsProvider::OpenAi,
        api_url: server.uri(),
        model: "tts-1".into(),
        voice: "alloy".into(),
        api_key: Some("test-key".into()),
        ..TtsConfig::default()
    });
    let audio = tts.synthesize("Guten Tag.").await.unwrap();
    assert_eq!(audio.sample_rate, 16_000);
    assert_eq!(audio.samples.len(), 1600);
}
