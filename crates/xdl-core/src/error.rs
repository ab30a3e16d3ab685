//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Project root does not exist: {path}")]
    NoProject { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Packager Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Packager launcher not found: {launcher}")]
    LauncherNotFound { launcher: String },

    #[error("Failed to spawn packager process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Packager process error: {message}")]
    Process { message: String },

    #[error("Timed out after {timeout_ms}ms waiting for the packager to exit")]
    StopTimeout { timeout_ms: u64 },

    // ─────────────────────────────────────────────────────────────
    // Tunnel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Tunnel error: {message}")]
    Tunnel { message: String },

    // ─────────────────────────────────────────────────────────────
    // Local Server Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Local server error: {message}")]
    Server { message: String },

    #[error("Proxy error: {message}")]
    Proxy { message: String },

    #[error("Manifest error: {message}")]
    Manifest { message: String },

    // ─────────────────────────────────────────────────────────────
    // Remote API Errors
    // ─────────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn stop_timeout(timeout: std::time::Duration) -> Self {
        Self::StopTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Tunnel { .. }
                | Error::Proxy { .. }
                | Error::Manifest { .. }
                | Error::Api { .. }
                | Error::StopTimeout { .. }
        )
    }

    /// Check if this error should abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::NoProject { .. }
                | Error::LauncherNotFound { .. }
                | Error::ProcessSpawn { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
