//! Barge-in: the user interrupts the assistant with the wake word.

use crate::pipeline::speech_queue::SpeechQueue;
use crate::wakeword::WakeWordDetector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Watches for the wake word while a response is generated and spoken.
///
/// On detection the current turn is cancelled (so no further LLM output is
/// consumed) and all queued speech is skipped.
pub struct InterruptMonitor {
    handle: JoinHandle<bool>,
    stop: CancellationToken,
}

impl InterruptMonitor {
    /// Start monitoring for the duration of one turn.
    pub fn spawn(
        detector: Arc<dyn WakeWordDetector>,
        queue: Arc<SpeechQueue>,
        replacement: Option<String>,
        turn: CancellationToken,
    ) -> Self {
        let stop = turn.child_token();
        let monitor_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let detected = tokio::select! {
                () = monitor_stop.cancelled() => return false,
                result = detector.await_wake_word() => result,
            };
            match detected {
                Ok(()) => {
                    info!("barge-in detected, dropping current response");
                    turn.cancel();
                    queue.skip_all(replacement).await;
                    true
                }
                Err(e) => {
                    warn!("interrupt monitor stopped: {e}");
                    false
                }
            }
        });
        Self { handle, stop }
    }

    /// Stop monitoring; returns whether a barge-in happened.
    pub async fn finish(self) -> bool {
        self.stop.cancel();
        match self.handle.await {
            Ok(interrupted) => interrupted,
            Err(e) => {
                warn!("interrupt monitor task failed: {e}");
                false
            }
        }
    }
}
