//! ApiFlow Protocol - Core types and definitions for the ApiFlow Workbench
//!
//! This crate provides the shared protocol definitions used across all ApiFlow
//! crates. It includes the flow execution models (steps, configs, states,
//! results) and the resource models proxied to the remote backend.
//!
//! # Core Types
//!
//! - [`FlowStep`] - A single HTTP request definition within a flow
//! - [`FlowConfig`] - Per-run execution policy (timeout, concurrency, error stop)
//! - [`FlowState`] - The lifecycle record of one flow execution
//! - [`StepResult`] - The immutable outcome of one step attempt
//! - [`ExecutionReport`] - What a caller receives after a flow terminates
//!
//! # Backend Resources
//!
//! CRUD operations are proxied to a fixed remote backend for:
//! - [`Project`] / [`Folder`] - Organizational hierarchy
//! - [`Endpoint`] - Reusable HTTP request definitions
//! - [`Environment`] - Named variable sets for interpolation
//!
//! # Example
//!
//! ```rust
//! use apiflow_protocol::models::{FlowStep, FlowConfig};
//!
//! let step = FlowStep::get("fetch_token", "https://auth.example.com/token")
//!     .with_expected_status(200);
//!
//! let config = FlowConfig::default();
//! assert!(config.stop_on_error);
//! assert!(!config.parallel);
//! ```

#![warn(missing_docs)]

/// Protocol models module
pub mod models;

pub use models::*;
