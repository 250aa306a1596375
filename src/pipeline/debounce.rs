//! Debounced "playback has really finished" detection.
//!
//! Speech activity flickers between sentences (synthesis of the next
//! sentence, the inter-utterance pause), so a single idle observation is not
//! enough. The debouncer polls an [`ActivityProbe`] at a fixed interval and
//! only returns after a run of consecutive idle observations.

use crate::config::ConversationConfig;
use crate::pipeline::speech_queue::QueueActivity;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Something that can be asked whether speech is still going on.
pub trait ActivityProbe: Send {
    /// Whether there was activity since the previous call.
    fn is_active(&mut self) -> bool;
}

impl<F> ActivityProbe for F
where
    F: FnMut() -> bool + Send,
{
    fn is_active(&mut self) -> bool {
        self()
    }
}

/// Probe backed by the speech queue's activity channel.
///
/// Also reports a task that started and finished entirely between two polls.
pub struct QueueProbe {
    rx: watch::Receiver<QueueActivity>,
    last_started: u64,
}

impl QueueProbe {
    /// Wrap an activity receiver.
    pub fn new(rx: watch::Receiver<QueueActivity>) -> Self {
        let last_started = rx.borrow().started;
        Self { rx, last_started }
    }
}

impl ActivityProbe for QueueProbe {
    fn is_active(&mut self) -> bool {
        let current = *self.rx.borrow_and_update();
        let started_since = current.started != self.last_started;
        self.last_started = current.started;
        current.is_active() || started_since
    }
}

/// How the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// Enough consecutive idle polls were observed.
    Idle,
    /// The safety cap elapsed first.
    TimedOut,
}

/// Waits until activity has been absent for a run of polls.
#[derive(Debug, Clone, Copy)]
pub struct CompletionDebouncer {
    poll_interval: Duration,
    idle_polls: u32,
    max_wait: Duration,
}

impl CompletionDebouncer {
    /// Create a debouncer that returns once more than `idle_polls`
    /// consecutive polls (one every `poll_interval`) saw no activity.
    pub fn new(poll_interval: Duration, idle_polls: u32, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            idle_polls,
            max_wait,
        }
    }

    /// Build from the conversation settings.
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(
            Duration::from_millis(config.completion_poll_ms.max(1)),
            config.completion_idle_polls,
            Duration::from_secs(config.completion_max_wait_secs),
        )
    }

    /// Poll `probe` until it has been idle long enough.
    pub async fn await_idle(&self, probe: &mut dyn ActivityProbe) -> DebounceOutcome {
        let deadline = tokio::time::Instant::now() + self.max_wait;
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut inactive: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        max_wait_secs = self.max_wait.as_secs(),
                        "speech did not finish in time, continuing anyway"
                    );
                    return DebounceOutcome::TimedOut;
                }
            }

            if probe.is_active() {
                if inactive > 0 {
                    debug!(after = inactive, "activity resumed, resetting idle count");
                }
                inactive = 0;
            } else {
                inactive += 1;
                if inactive > self.idle_polls {
                    return DebounceOutcome::Idle;
                }
            }
        }
    }
}
