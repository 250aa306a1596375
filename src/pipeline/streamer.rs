//! Pipelines the LLM fragment stream into the speech queue.
//!
//! Every sentence completed by the segmenter is handed to the speech queue
//! immediately, so the first sentence is audible while the rest of the
//! response is still being generated.

use crate::llm::FragmentStream;
use crate::pipeline::segmenter::SentenceSegmenter;
use crate::pipeline::speech_queue::SpeechSink;
use futures_util::StreamExt;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How consuming the response ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The stream ran to its end.
    Completed,
    /// The stream broke; the message describes why.
    Failed(String),
    /// The turn was cancelled (barge-in or shutdown).
    Interrupted,
}

/// Result of streaming one response.
#[derive(Debug, Clone)]
pub struct StreamedResponse {
    /// Concatenation of every fragment received.
    pub text: String,
    /// Number of sentences handed to the speech queue.
    pub sentences: usize,
    /// How the stream ended.
    pub outcome: StreamOutcome,
}

/// Drives a [`SentenceSegmenter`] from a fragment stream.
pub struct ResponseStreamer<'a> {
    sink: &'a dyn SpeechSink,
    min_flush_chars: usize,
    echo: bool,
}

impl<'a> ResponseStreamer<'a> {
    /// Create a streamer feeding `sink`.
    pub fn new(sink: &'a dyn SpeechSink, min_flush_chars: usize) -> Self {
        Self {
            sink,
            min_flush_chars,
            echo: false,
        }
    }

    /// Also print fragments to stdout as they arrive.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Consume `stream` until it ends, fails or `cancel` fires.
    ///
    /// On cancellation the stream is dropped right away, which closes the
    /// upstream connection, and the buffered tail is discarded.
    pub async fn run(
        &self,
        mut stream: FragmentStream,
        cancel: &CancellationToken,
    ) -> StreamedResponse {
        let mut segmenter = SentenceSegmenter::new(self.min_flush_chars);
        let mut text = String::new();
        let mut sentences = 0;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break StreamOutcome::Interrupted,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    self.echo_fragment(&fragment);
                    text.push_str(&fragment);
                    for chunk in segmenter.feed(&fragment) {
                        self.sink.enqueue(chunk.text);
                        sentences += 1;
                    }
                }
                Some(Err(e)) => {
                    warn!("response stream failed, keeping partial response: {e}");
                    break StreamOutcome::Failed(e.to_string());
                }
                None => break StreamOutcome::Completed,
            }
        };
        drop(stream);

        if outcome != StreamOutcome::Interrupted
            && let Some(chunk) = segmenter.flush()
        {
            self.sink.enqueue(chunk.text);
            sentences += 1;
        }
        if self.echo {
            println!();
        }
        debug!(sentences, chars = text.chars().count(), ?outcome, "response streamed");

        StreamedResponse {
            text,
            sentences,
            outcome,
        }
    }

    fn echo_fragment(&self, fragment: &str) {
        if self.echo {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(fragment.as_bytes());
            let _ = stdout.flush();
        }
    }
}
