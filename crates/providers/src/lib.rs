//! Model-provider boundary.
//!
//! Engines see one opaque trait: [`Completer`]. Implementations here
//! cover the OpenAI-compatible HTTP adapter, a scripted test double,
//! and the journal-backed [`ReplayCompleter`] that substitutes recorded
//! completions during deterministic replay.

pub mod openai;
pub mod replay;
pub mod retry;
pub mod scripted;
pub mod traits;

pub use openai::OpenAiCompleter;
pub use replay::{ReplayCompleter, ReplayMode};
pub use retry::{with_retry, RetryPolicy};
pub use scripted::ScriptedCompleter;
pub use traits::{CompleteOptions, Completer};
