//! Shared domain types for the ensemble runtime.
//!
//! Everything that crosses a crate boundary lives here: the `State`
//! record threaded through engines, the closed streaming event union,
//! the error taxonomy, cancellation tokens, and configuration.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod state;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use event::EngineEvent;
pub use state::{
    Evidence, EvidenceMeta, Message, MessageKind, NextAction, RunStatus, SourceKind, State,
    SubGoal, ToolCall,
};
