//! Follow-Up Common Library
//!
//! Shared code for the Follow-Up services including:
//! - Database models, repository and the roster store abstraction
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, MemoryStore, Repository, RosterStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of numbered sessions tracked per student
pub const SESSION_COUNT: i32 = 8;
