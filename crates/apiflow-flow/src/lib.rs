//! Flow execution and stateful variable interpolation
//!
//! This crate is the core of the ApiFlow Workbench. It owns:
//!
//! - [`session`] - the per-session scoped variable store
//! - [`interpolate`] - resolution of `{{scope.path}}` references against
//!   session state
//! - [`state`] - the flow lifecycle state machine and bounded history
//! - [`executor`] - sequential and bounded-parallel step orchestration
//!
//! Everything else in the workbench (CRUD proxying, tool framing, the HTTP
//! client) is plumbing around this engine.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod executor;
pub mod interpolate;
pub mod session;
pub mod state;

pub use executor::*;
pub use interpolate::{
    build_variable_summary, extract_references, extract_value_references, has_variables,
    reference_scopes, resolve_text, resolve_value, validate_references, InterpolationContext,
    InvalidReference, ReferenceValidation,
};
pub use session::*;
pub use state::*;

use thiserror::Error;

/// Errors surfaced by the flow engine
///
/// Validation and duplicate-id errors are reported before any execution and
/// never mutate shared state. Step-level failures are recorded into the
/// flow's results and errors; they reach the caller only through the terminal
/// [`apiflow_protocol::models::FlowState`].
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow definition failed structural validation; no step was executed
    #[error("flow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A live flow with the same id already exists
    #[error("flow already exists: {0}")]
    DuplicateFlow(String),

    /// A step failed during execution
    #[error("step {step_id} failed: {message}")]
    StepExecution {
        /// Id of the failing step
        step_id: String,
        /// Failure description
        message: String,
    },

    /// The whole-flow deadline was exceeded
    #[error("flow timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before the deadline fired
        elapsed_ms: u64,
    },

    /// Failure in the HTTP collaborator
    #[error("backend error: {0}")]
    Backend(#[from] apiflow_backend::BackendError),

    /// Flow state could not be serialized or deserialized
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using [`FlowError`]
pub type Result<T> = std::result::Result<T, FlowError>;
