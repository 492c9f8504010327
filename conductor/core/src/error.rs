//! Conductor Errors
//!
//! Every failure that can end a dialogue turn is expressed as a
//! [`ConductorError`]. Errors are cloneable so they can travel inside
//! [`StreamEvent::Error`](crate::backend::StreamEvent) and
//! [`TurnEvent::Error`](crate::messages::TurnEvent) without losing detail.
//!
//! Frame-level parse failures are deliberately absent: a malformed stream line
//! is skipped by the frame decoder and never becomes an error.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the conductor and its collaborators
#[derive(Clone, Debug, Error)]
pub enum ConductorError {
    /// Backend credentials are missing; the turn never starts
    #[error("backend '{backend}' is not configured: missing API key")]
    NotConfigured {
        /// Backend that was selected for the turn
        backend: String,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure while opening or reading the completion stream
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// No data arrived within the configured idle window
    #[error("completion stream stalled for {0:?}")]
    StreamTimeout(Duration),

    /// Stream closed without a completion marker or error
    #[error("completion stream closed unexpectedly")]
    StreamClosed,

    /// Backend cannot accept the supplied input (e.g. an image)
    #[error("backend '{backend}' does not accept image input")]
    UnsupportedInput {
        /// Backend that rejected the request
        backend: String,
    },

    /// Avatar driver command failed
    #[error("avatar driver error: {0}")]
    Driver(String),
}

impl ConductorError {
    /// Whether this error was raised before any network traffic
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::NotConfigured { .. } | Self::Config(_))
    }

    /// Whether this error came from the upstream transport
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::HttpStatus { .. } | Self::StreamTimeout(_) | Self::StreamClosed
        )
    }
}

impl From<reqwest::Error> for ConductorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ConfigError> for ConductorError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias for conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;
