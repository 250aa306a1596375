//! The turn-taking pipeline: recording, response streaming, speech output
//! and the dialog state machine that drives them.

pub mod coordinator;
pub mod debounce;
pub mod endpointer;
pub mod interrupt;
pub mod messages;
pub mod segmenter;
pub mod speech_queue;
pub mod stop;
pub mod streamer;
