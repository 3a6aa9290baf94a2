//! Error types for the connectivity core.
//!
//! Transport failures are recoverable (the lobby reconnects, the JSON-RPC
//! connect retries), process failures are surfaced to the user, and protocol
//! failures are logged. The variants below keep those groups apart so callers
//! can decide without string matching.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the connectivity core.
#[derive(Debug, Error)]
pub enum IceError {
    // Transport errors
    #[error("Not connected to {endpoint}")]
    NotConnected { endpoint: String },

    #[error("Connection to {endpoint} lost")]
    Disconnected { endpoint: String },

    #[error("Connection to {endpoint} refused after {attempts} attempts")]
    ConnectionRefused { endpoint: String, attempts: u32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Protocol errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("RPC call {method} failed: {error}")]
    Rpc {
        method: String,
        error: serde_json::Value,
    },

    #[error("Invalid relay message: {message}")]
    InvalidRelayMessage { message: String },

    // Process lifecycle errors
    #[error("Failed to launch {program}: {message}")]
    LaunchFailed { program: String, message: String },

    #[error("No ICE adapter running for this session")]
    AdapterNotRunning,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for connectivity operations.
pub type Result<T> = std::result::Result<T, IceError>;

impl From<std::io::Error> for IceError {
    fn from(err: std::io::Error) -> Self {
        IceError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IceError {
    fn from(err: serde_json::Error) -> Self {
        IceError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for IceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IceError::Timeout(Duration::from_secs(0))
        } else {
            IceError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl IceError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        IceError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// - -32601: Method not found
    /// - -32603: Internal error
    /// - -32000: Transport error
    /// - -32001: Process lifecycle error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            IceError::NotConnected { .. }
            | IceError::Disconnected { .. }
            | IceError::ConnectionRefused { .. }
            | IceError::Timeout(_)
            | IceError::Network { .. } => -32000,

            IceError::LaunchFailed { .. } | IceError::AdapterNotRunning => -32001,

            _ => -32603,
        }
    }

    /// Transport errors that the reconnect logic is expected to recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IceError::Disconnected { .. }
                | IceError::ConnectionRefused { .. }
                | IceError::Timeout(_)
                | IceError::Network { .. }
        )
    }
}
