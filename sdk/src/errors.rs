//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Somnus engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Recovery policy
//!
//! - `BackendUnavailable` is never retried by the core; it propagates out of a
//!   run and the scheduler records the run as failed.
//! - `UnknownCapability` is recovered inside the run loop (the turn's tool step
//!   is skipped).
//! - `PersistenceCorrupt` is recovered by materializing a fresh entity.

use thiserror::Error;

/// Trait for engine error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never contains entity
    /// credentials or raw backend payloads.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require manual intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Backend**: the language-model backend failed or returned nothing usable
/// - **Capability**: a tool or adapter name could not be resolved
/// - **Persistence**: stored entity state is missing, corrupt, or unwritable
/// - **Scheduling**: an entity is already mid-run
/// - **Configuration**: invalid or missing configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::UnknownCapability("teleport".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::DaemonAlreadyRunning;
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Backend errors
    #[error("Language model backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Consolidation produced an empty summary")]
    EmptySummary,

    // Capability errors
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("No adapter named '{0}' is installed")]
    CapabilityNotFound(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    // Persistence errors
    #[error("Persisted state for entity '{id}' is corrupt: {reason}")]
    PersistenceCorrupt { id: String, reason: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    // Scheduling errors
    #[error("Entity '{0}' is already running")]
    EntityBusy(String),

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::BackendUnavailable(_) => {
                "Language model backend unavailable. Check the endpoint, API key and network"
            }
            Self::EmptySummary => "The backend returned no summary. The entity stays awake",

            Self::UnknownCapability(_) => "The model asked for a capability that is not enabled",
            Self::CapabilityNotFound(_) => {
                "Unknown adapter name. Use 'somnus capability list' to see installed adapters"
            }
            Self::InvalidParameter { .. } => "A capability was called with invalid parameters",

            Self::PersistenceCorrupt { .. } => {
                "Stored entity state was unreadable and has been reset"
            }
            Self::EntityNotFound(_) => "No entity with this id. Create it first",
            Self::Database(_) => "Database operation failed. Try restarting the daemon",

            Self::EntityBusy(_) => "The entity is mid-run. Try again once it settles",
            Self::DaemonAlreadyRunning => "Stop the existing daemon first with 'somnus stop'",

            Self::Config(_) => "Check your config.toml file for errors",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::DaemonAlreadyRunning | Self::Config(_) => false,

            _ => true,
        }
    }
}
