//! Somnus SDK
//!
//! Shared types for the Somnus engine and the adapter crates that plug
//! capabilities into it: the error taxonomy and the capability parameter
//! contract.

/// Error types and handling
pub mod errors;

/// Capability parameter types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{ParamType, ParameterField, ParameterSchema, ToolError, ToolInput};
