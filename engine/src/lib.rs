//! Somnus Engine Library
//!
//! Persistent autonomous entities: each one wakes, acts through tools over
//! a bounded number of turns, consolidates what happened into its journal
//! and goes back to sleep. Used by the `somnus` binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// LLM provider abstraction layer
pub mod llm;

/// Timestamped short- and long-term memory
pub mod memory;

/// Tools, adapters and the per-run tool registry
pub mod capability;

/// Entities and their run loop
pub mod entity;

/// Database persistence module
pub mod db;

/// Wake scheduling and the concurrency guard
pub mod scheduler;

/// Daemon lifecycle management module
pub mod daemon;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
