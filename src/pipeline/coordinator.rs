//! The dialog state machine.
//!
//! ```text
//! AwaitingWake ─▶ Recording ─▶ Transcribing ─┬▶ InsufficientInput ─▶ Recording
//!                                            └▶ SufficientInput ─▶ CheckExit ─┬▶ Exit
//!                                                                            └▶ Continue
//! Continue ─▶ GeneratingResponse ─▶ AwaitingCompletion ─▶ AwaitingWake
//! ```
//!
//! One [`DialogCoordinator`] owns the conversation history and drives every
//! provider through the [`Providers`] context. Speech goes through a single
//! [`SpeechQueue`] worker; the optional [`InterruptMonitor`] runs alongside
//! response generation.

use crate::audio::chime;
use crate::config::{SpeechConfig, WakewordProvider};
use crate::conversation::ConversationState;
use crate::error::Result;
use crate::pipeline::debounce::{CompletionDebouncer, QueueProbe};
use crate::pipeline::endpointer::{Endpointer, RecordSettings};
use crate::pipeline::interrupt::InterruptMonitor;
use crate::pipeline::speech_queue::SpeechQueue;
use crate::pipeline::stop::StopSignal;
use crate::pipeline::streamer::{ResponseStreamer, StreamOutcome};
use crate::startup::Providers;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// States of the dialog loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Waiting for the wake word.
    AwaitingWake,
    /// Capturing the user's utterance.
    Recording,
    /// Turning the utterance into text.
    Transcribing,
    /// The transcript was too short; re-prompting.
    InsufficientInput,
    /// The transcript is long enough to act on.
    SufficientInput,
    /// Checking whether the user wants to stop.
    CheckExit,
    /// Saying goodbye; terminal.
    Exit,
    /// Recording the user's message.
    Continue,
    /// Streaming the model's answer into the speech queue.
    GeneratingResponse,
    /// Waiting for queued speech to finish.
    AwaitingCompletion,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingWake => "awaiting_wake",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::InsufficientInput => "insufficient_input",
            Self::SufficientInput => "sufficient_input",
            Self::CheckExit => "check_exit",
            Self::Exit => "exit",
            Self::Continue => "continue",
            Self::GeneratingResponse => "generating_response",
            Self::AwaitingCompletion => "awaiting_completion",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user said goodbye.
    Farewell,
    /// The shutdown token was cancelled.
    Shutdown,
}

/// What the caller gets back when the loop halts.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// `role: content` lines of the finished conversation.
    pub transcript: String,
    /// Number of completed user/assistant exchanges.
    pub exchanges: usize,
    /// Why the loop stopped.
    pub end: SessionEnd,
}

enum TurnEnd {
    /// Back to the wake word.
    Done,
    /// The user said goodbye.
    Exit,
    /// Shutdown was requested.
    Shutdown,
}

/// Drives one conversation from wake word to farewell.
pub struct DialogCoordinator {
    config: SpeechConfig,
    providers: Providers,
    queue: Arc<SpeechQueue>,
    conversation: ConversationState,
    endpointer: Endpointer,
    record_settings: RecordSettings,
    debouncer: CompletionDebouncer,
    state: DialogState,
    exchanges: usize,
    cancel: CancellationToken,
}

impl DialogCoordinator {
    /// Wire up the loop and spawn the speech worker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: SpeechConfig, providers: Providers, cancel: CancellationToken) -> Self {
        let queue = Arc::new(SpeechQueue::spawn(
            Arc::clone(&providers.tts),
            Arc::clone(&providers.audio),
            Duration::from_millis(config.tts.inter_utterance_pause_ms),
            &cancel,
        ));
        let record_settings = RecordSettings::from(&config.recording);
        let endpointer = Endpointer::new(
            Arc::clone(&providers.audio),
            record_settings.silence_duration,
        );
        Self {
            conversation: ConversationState::new(config.llm.system_prompt.clone()),
            debouncer: CompletionDebouncer::from_config(&config.conversation),
            endpointer,
            record_settings,
            queue,
            providers,
            config,
            state: DialogState::AwaitingWake,
            exchanges: 0,
            cancel,
        }
    }

    /// Current state.
    pub fn state(&self) -> DialogState {
        self.state
    }

    /// The speech queue shared with the worker.
    pub fn speech_queue(&self) -> &Arc<SpeechQueue> {
        &self.queue
    }

    /// Run until the user says goodbye or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Audio device failures (recording or wake word input) end the session
    /// with an error.
    pub async fn run(mut self) -> Result<SessionSummary> {
        if self.config.conversation.greet_on_start {
            self.greet().await;
        }

        let end = self.converse().await;
        self.queue.shutdown().await;
        let end = end?;

        let transcript = self.conversation.transcript();
        self.conversation.reset();
        info!(?end, exchanges = self.exchanges, "dialog loop halted");
        Ok(SessionSummary {
            transcript,
            exchanges: self.exchanges,
            end,
        })
    }

    async fn converse(&mut self) -> Result<SessionEnd> {
        loop {
            self.enter(DialogState::AwaitingWake);
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(SessionEnd::Shutdown),
                woke = self.providers.wakeword.await_wake_word() => woke?,
            }
            self.play_chime().await;

            let span = info_span!("turn", id = %Uuid::new_v4());
            match self.run_turn().instrument(span).await? {
                TurnEnd::Done => {}
                TurnEnd::Exit => return Ok(SessionEnd::Farewell),
                TurnEnd::Shutdown => return Ok(SessionEnd::Shutdown),
            }
        }
    }

    /// One wake-word-initiated turn, including re-prompts and barge-ins.
    async fn run_turn(&mut self) -> Result<TurnEnd> {
        let mut reprompts: u32 = 0;

        loop {
            self.enter(DialogState::Recording);
            let utterance = tokio::select! {
                () = self.cancel.cancelled() => return Ok(TurnEnd::Shutdown),
                recorded = self.endpointer.record_with(self.record_settings) => recorded?.0,
            };

            self.enter(DialogState::Transcribing);
            let transcript = match self.providers.stt.transcribe(&utterance).await {
                Ok(text) => text.trim().to_owned(),
                Err(e) => {
                    warn!("transcription failed: {e}");
                    String::new()
                }
            };

            if transcript.chars().count() < self.config.conversation.min_transcript_chars {
                self.enter(DialogState::InsufficientInput);
                reprompts += 1;
                let bound = self.config.conversation.max_reprompts;
                if bound > 0 && reprompts >= bound {
                    info!(reprompts, "no usable input, waiting for the wake word again");
                    self.queue
                        .enqueue(self.config.conversation.reprompt_limit_message.clone());
                    if !self.wait_until_spoken().await {
                        return Ok(TurnEnd::Shutdown);
                    }
                    return Ok(TurnEnd::Done);
                }
                debug!(transcript = %transcript, "transcript too short, re-prompting");
                self.queue
                    .enqueue(self.config.conversation.reprompt_message.clone());
                if !self.wait_until_spoken().await {
                    return Ok(TurnEnd::Shutdown);
                }
                continue;
            }
            reprompts = 0;

            self.enter(DialogState::SufficientInput);
            if self.config.conversation.console_output {
                println!("Du: {transcript}");
            }

            self.enter(DialogState::CheckExit);
            if self
                .providers
                .llm
                .is_conversation_ending(&transcript, self.config.conversation.exit_threshold)
            {
                self.enter(DialogState::Exit);
                self.conversation.push_user(transcript);
                self.conversation.request_exit();
                self.say_farewell().await;
                return Ok(TurnEnd::Exit);
            }

            self.enter(DialogState::Continue);
            self.conversation.push_user(transcript);
            debug!(chars = self.conversation.last_prompt_length(), "user message recorded");

            let turn = self.cancel.child_token();
            let monitor = self.config.barge_in.enabled.then(|| {
                InterruptMonitor::spawn(
                    Arc::clone(&self.providers.wakeword),
                    Arc::clone(&self.queue),
                    self.config.barge_in.replacement_message.clone(),
                    turn.clone(),
                )
            });

            self.enter(DialogState::GeneratingResponse);
            self.generate_response(&turn).await;

            self.enter(DialogState::AwaitingCompletion);
            let mut probe = QueueProbe::new(self.queue.activity());
            tokio::select! {
                outcome = self.debouncer.await_idle(&mut probe) => {
                    debug!(?outcome, "speech finished");
                }
                () = turn.cancelled() => {}
            }

            let interrupted = match monitor {
                Some(monitor) => monitor.finish().await,
                None => false,
            };
            if self.cancel.is_cancelled() {
                return Ok(TurnEnd::Shutdown);
            }
            if !interrupted {
                return Ok(TurnEnd::Done);
            }

            info!("barge-in, listening right away");
            if !self.wait_until_spoken().await {
                return Ok(TurnEnd::Shutdown);
            }
        }
    }

    /// Stream the model's answer into the speech queue and record it.
    async fn generate_response(&mut self, turn: &CancellationToken) {
        let stream = tokio::select! {
            () = turn.cancelled() => return,
            opened = self.providers.llm.chat_stream(self.conversation.messages()) => opened,
        };
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("could not start response: {e}");
                return;
            }
        };

        let echo = self.config.conversation.console_output;
        if echo {
            print!("Assistent: ");
        }
        let response = ResponseStreamer::new(
            self.queue.as_ref(),
            self.config.conversation.min_flush_chars,
        )
        .with_echo(echo)
        .run(stream, turn)
        .await;

        match &response.outcome {
            StreamOutcome::Completed => {}
            StreamOutcome::Failed(reason) => warn!("response truncated: {reason}"),
            StreamOutcome::Interrupted => info!("response interrupted"),
        }
        if !response.text.trim().is_empty() {
            self.conversation.push_assistant(response.text);
            self.exchanges += 1;
        }
    }

    async fn greet(&self) {
        let greeting = self
            .config
            .conversation
            .greetings
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        let invitation = match self.config.wakeword.provider {
            WakewordProvider::Transcript => format!(
                "Sag \"{}\", wenn du mit mir sprechen möchtest.",
                self.config.wakeword.wake_word
            ),
            WakewordProvider::Manual => {
                "Drück die Eingabetaste, wenn du mit mir sprechen möchtest.".to_owned()
            }
        };
        self.queue.enqueue(format!("{greeting} {invitation}").trim().to_owned());
        self.wait_until_spoken().await;
    }

    async fn say_farewell(&self) {
        let phrase = self
            .config
            .conversation
            .farewell_phrases
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        let farewell = format!("{}{phrase}", self.config.conversation.farewell_prefix);
        info!(farewell = %farewell, "ending conversation");
        self.queue.enqueue(farewell);
        if self.wait_until_spoken().await {
            self.providers.audio.wait_until_playback_finished().await;
        }
    }

    async fn play_chime(&self) {
        if !self.config.wakeword.chime {
            return;
        }
        let sound = chime(self.config.audio.output_sample_rate);
        if let Err(e) = self.providers.audio.play(&sound, &StopSignal::new()).await {
            warn!("could not play chime: {e}");
        }
    }

    /// Wait for the speech queue to drain; `false` if shutdown came first.
    async fn wait_until_spoken(&self) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = self.queue.wait_until_done() => true,
        }
    }

    fn enter(&mut self, next: DialogState) {
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(DialogState::AwaitingWake.to_string(), "awaiting_wake");
        assert_eq!(
            DialogState::GeneratingResponse.to_string(),
            "generating_response"
        );
    }
}
