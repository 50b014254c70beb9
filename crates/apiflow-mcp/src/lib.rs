//! Assistant tool surface for the ApiFlow Workbench
//!
//! Provides the registry of callable tools exposed to AI assistants, the
//! handlers that proxy CRUD operations to the remote backend, the flow
//! execution tools, and a file loader for on-disk flow definitions.

#![warn(missing_docs)]

/// File-based flow definition loader
pub mod loader;
/// Tool registry with schema-validated handlers
pub mod registry;
/// CRUD proxy and flow tool handlers
pub mod tools;

pub use loader::*;
pub use registry::*;
pub use tools::*;
