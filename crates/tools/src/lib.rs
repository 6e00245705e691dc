//! Named, typed tools and the registry that dispatches them.
//!
//! Every invocation flows through [`ToolRegistry::dispatch`], which
//! journals a `tool_request`/`tool_response` pair correlated by call
//! id, enforces the per-call timeout, and observes cancellation before
//! touching the tool.

pub mod builtin;
pub mod issues;
pub mod registry;
pub mod replay;
pub mod web;

pub use registry::{Tool, ToolDefinition, ToolRegistry};
pub use replay::{replay_registry, ReplayTool};
pub use web::{Fetcher, HttpFetcher, SearchHit, Searcher};
