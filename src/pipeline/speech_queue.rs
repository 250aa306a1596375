//! FIFO speech queue drained by a single worker task.
//!
//! The dialog loop (and the barge-in monitor) enqueue sentences through the
//! [`SpeechQueue`] handle. One worker task dequeues them in order, renders
//! each with the [`TextToSpeech`] provider and plays it on the
//! [`AudioDevice`], so at most one sentence is audible at any time.
//!
//! Cancellation goes through a shared [`StopSignal`]: [`SpeechQueue::skip_all`]
//! raises it, drains the queue, waits for the worker to go idle and lowers
//! it again before the optional replacement is queued.

use crate::audio::{AudioDevice, PlaybackOutcome};
use crate::pipeline::stop::StopSignal;
use crate::tts::{TextToSpeech, clean_for_speech};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A sentence waiting to be spoken, with its FIFO position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechTask {
    /// Monotonic sequence number assigned on enqueue.
    pub seq: u64,
    /// Raw sentence text.
    pub text: String,
}

/// Snapshot of the queue published on every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueActivity {
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Whether the worker is rendering, playing or pausing after a task.
    pub busy: bool,
    /// Number of tasks the worker has started so far.
    pub started: u64,
}

impl QueueActivity {
    /// Whether anything is queued or being spoken.
    pub fn is_active(&self) -> bool {
        self.busy || self.pending > 0
    }
}

/// Anything sentences can be handed to for speaking.
pub trait SpeechSink: Send + Sync {
    /// Queue `text` and return its sequence number.
    fn enqueue(&self, text: String) -> u64;
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<SpeechTask>,
    busy: bool,
    next_seq: u64,
    started: u64,
}

impl QueueState {
    fn activity(&self) -> QueueActivity {
        QueueActivity {
            pending: self.tasks.len(),
            busy: self.busy,
            started: self.started,
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
    activity: watch::Sender<QueueActivity>,
    stop: StopSignal,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned queue only means a panic elsewhere; the data is still a
        // consistent VecDeque, so keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &QueueState) {
        self.activity.send_replace(state.activity());
    }
}

/// Handle to the speech queue and its worker.
///
/// Dropping the handle stops the worker.
pub struct SpeechQueue {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechQueue {
    /// Spawn the worker task.
    ///
    /// `pause` is inserted after each spoken sentence; the worker exits when
    /// `shutdown` is cancelled or the handle is dropped.
    pub fn spawn(
        tts: Arc<dyn TextToSpeech>,
        audio: Arc<dyn AudioDevice>,
        pause: Duration,
        shutdown: &CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            activity: watch::channel(QueueActivity::default()).0,
            stop: StopSignal::new(),
        });
        let cancel = shutdown.child_token();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            tts,
            audio,
            pause,
            cancel.clone(),
        ));
        Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a sentence to the queue.
    pub fn enqueue(&self, text: impl Into<String>) -> u64 {
        let text = text.into();
        let seq = {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!(seq, text = %text, "queued sentence");
            state.tasks.push_back(SpeechTask { seq, text });
            self.shared.publish(&state);
            seq
        };
        self.shared.wake.notify_one();
        seq
    }

    /// Drop everything queued or playing, then optionally queue `replacement`.
    ///
    /// When this returns no previously queued sentence will be heard.
    pub async fn skip_all(&self, replacement: Option<String>) {
        self.shared.stop.set();
        let dropped = {
            let mut state = self.shared.lock();
            let dropped = state.tasks.len();
            state.tasks.clear();
            self.shared.publish(&state);
            dropped
        };
        info!(dropped, "skipping queued speech");
        self.wait_until_idle().await;
        self.shared.stop.clear();

        if let Some(text) = replacement.filter(|t| !t.trim().is_empty()) {
            self.enqueue(text);
        }
    }

    /// Resolve once the worker is not handling a task. Queued tasks may remain.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.activity.subscribe();
        let _ = rx.wait_for(|a| !a.busy).await;
    }

    /// Resolve once the queue is empty and the worker is idle.
    pub async fn wait_until_done(&self) {
        let mut rx = self.shared.activity.subscribe();
        let _ = rx.wait_for(|a| !a.is_active()).await;
    }

    /// Whether anything is queued or being spoken right now.
    pub fn still_speaking(&self) -> bool {
        self.shared.lock().activity().is_active()
    }

    /// Subscribe to activity changes.
    pub fn activity(&self) -> watch::Receiver<QueueActivity> {
        self.shared.activity.subscribe()
    }

    /// The stop signal shared with playback.
    pub fn stop_signal(&self) -> &StopSignal {
        &self.shared.stop
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.shared.stop.set();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("speech worker ended abnormally: {e}");
        }
    }
}

impl SpeechSink for SpeechQueue {
    fn enqueue(&self, text: String) -> u64 {
        SpeechQueue::enqueue(self, text)
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    tts: Arc<dyn TextToSpeech>,
    audio: Arc<dyn AudioDevice>,
    pause: Duration,
    cancel: CancellationToken,
) {
    debug!("speech worker started");
    loop {
        let task = loop {
            {
                let mut state = shared.lock();
                if let Some(task) = state.tasks.pop_front() {
                    state.busy = true;
                    state.started += 1;
                    shared.publish(&state);
                    break task;
                }
            }
            tokio::select! {
                () = shared.wake.notified() => {}
                () = cancel.cancelled() => {
                    debug!("speech worker stopped");
                    return;
                }
            }
        };

        // A skip may have landed between enqueue and dequeue.
        if !shared.stop.is_set() {
            speak(&task, tts.as_ref(), audio.as_ref(), &shared.stop, pause).await;
        } else {
            debug!(seq = task.seq, "dropping sentence after stop");
        }

        {
            let mut state = shared.lock();
            state.busy = false;
            shared.publish(&state);
        }
    }
}

async fn speak(
    task: &SpeechTask,
    tts: &dyn TextToSpeech,
    audio: &dyn AudioDevice,
    stop: &StopSignal,
    pause: Duration,
) {
    let text = clean_for_speech(&task.text);
    if text.is_empty() {
        return;
    }

    let rendered = tokio::select! {
        biased;
        () = stop.raised() => return,
        rendered = tts.synthesize(&text) => rendered,
    };
    let rendered = match rendered {
        Ok(a) => a,
        Err(e) => {
            warn!(seq = task.seq, "synthesis failed, skipping sentence: {e}");
            return;
        }
    };
    if stop.is_set() {
        return;
    }

    debug!(seq = task.seq, text = %text, "speaking");
    match audio.play(&rendered, stop).await {
        Ok(PlaybackOutcome::Finished) => {}
        Ok(PlaybackOutcome::Stopped) => return,
        Err(e) => {
            warn!(seq = task.seq, "playback failed: {e}");
            return;
        }
    }

    if !pause.is_zero() {
        tokio::select! {
            () = stop.raised() => {}
            () = tokio::time::sleep(pause) => {}
        }
    }
}
