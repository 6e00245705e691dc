//! Append-only trace journal and deterministic-replay support.
//!
//! Every engine run writes `TraceEvent`s through a [`TraceJournal`]:
//! node entries/exits, tool requests/responses, model prompts and
//! completions. A journal can later be read back to rebuild a run, and
//! [`replay::compare`] checks that a re-execution followed the same
//! path as the original.

pub mod event;
pub mod journal;
pub mod redact;
pub mod replay;

pub use event::{TraceEvent, TraceKind};
pub use journal::TraceJournal;
pub use replay::{canonical_args_hash, compare, reproducible_run_id, ReplayReport};
