//! Error handling module for Fleet Guardian.
//!
//! This module defines the error types used throughout the crate. Every
//! variant maps to a machine-readable kind (see [`Error::kind`]) so that an
//! administrative client can tell an advisory condition from a hard block.
//!
//! # Example
//!
//! ```
//! use fleet_guardian::error::{Error, Result};
//!
//! fn handle_error(result: Result<()>) {
//!     match result {
//!         Ok(_) => println!("Operation succeeded"),
//!         Err(Error::ActiveConnectionsBlockDeletion { count, .. }) => {
//!             println!("Drain the server first, {} users still connected", count)
//!         }
//!         Err(Error::ServerNotFound(id)) => println!("Server '{}' is not registered", id),
//!         Err(e) => println!("{}: {}", e.kind(), e),
//!     }
//! }
//! ```
use thiserror::Error;

/// Errors that can occur in the fleet-guardian crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or parse a configuration file or string.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains values that cannot be used.
    ///
    /// This error occurs when:
    /// - An interval or timeout is zero
    /// - The auto-offline threshold is below the unhealthy threshold
    /// - The forecast smoothing factor is out of range
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Malformed input to `create`/`update` or to a query.
    ///
    /// `field` names the first violated field. Always recoverable by the
    /// caller correcting its input, never retried automatically.
    #[error("Invalid value for '{field}': {message}")]
    Validation {
        /// Name of the offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// An operation referenced an unknown server id.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Deletion attempted while the server still carries live sessions.
    ///
    /// This is the only hard lifecycle guard. The caller must drive the
    /// server offline and wait for connections to drain, then retry.
    #[error("Server {server_id} still has {count} active connections, deletion is blocked")]
    ActiveConnectionsBlockDeletion {
        /// Server the deletion targeted
        server_id: String,
        /// Connection count observed at the time of the request
        count: u64,
    },

    /// SSH test requested for a server without a stored key or password.
    #[error("No SSH credentials configured for server {0}")]
    CredentialsMissing(String),

    /// A probe did not finish within its time budget.
    #[error("Probe timed out: {0}")]
    ProbeTimeout(String),

    /// A probe could not reach its target.
    #[error("Probe connection failed: {0}")]
    ProbeConnection(String),

    /// A lifecycle transition lost the per-server serialization race.
    ///
    /// The caller should refetch current state and retry.
    #[error("Concurrent transition in progress: {0}")]
    ConcurrencyConflict(String),

    /// Reading or writing a persisted file failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Missing or invalid bearer token on the admin API.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Machine-readable kind carried by every error response.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigParse(_) => "config_parse_error",
            Error::ConfigInvalid(_) => "config_invalid",
            Error::Validation { .. } => "validation_error",
            Error::ServerNotFound(_) => "not_found",
            Error::ActiveConnectionsBlockDeletion { .. } => "active_connections_block_deletion",
            Error::CredentialsMissing(_) => "credentials_missing",
            Error::ProbeTimeout(_) => "probe_timeout",
            Error::ProbeConnection(_) => "probe_connection",
            Error::ConcurrencyConflict(_) => "concurrency_conflict",
            Error::Persistence(_) => "persistence_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether retrying the same request later can succeed without the
    /// caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ActiveConnectionsBlockDeletion { .. }
                | Error::ProbeTimeout(_)
                | Error::ProbeConnection(_)
                | Error::ConcurrencyConflict(_)
        )
    }
}

/// Result type for fleet-guardian operations.
pub type Result<T> = std::result::Result<T, Error>;
