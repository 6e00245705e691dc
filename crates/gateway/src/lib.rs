//! The ensemble gateway: a registry-fronted dispatcher that routes
//! requests to the engines and streams their events to clients, plus
//! the human-in-the-loop session controller and the HTTP/CLI surfaces.

pub mod api;
pub mod cancel;
pub mod cli;
pub mod dispatcher;
pub mod ratelimit;
pub mod state;
pub mod timeline;

pub use dispatcher::{dispatch, DispatchRequest, PipelineHandler, PipelineRegistry};
pub use state::AppState;
