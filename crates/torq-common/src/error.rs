//! Error types for torq.
//!
//! Two disjoint failure channels exist:
//!
//! - [`ValidationError`] is an expected, user-correctable condition (unknown
//!   serial, missing user, conflicting arguments). It is returned as a value
//!   and halts the current command without unwinding.
//! - [`Error`] is a fatal failure (bridge transport, non-zero exit, reconnect
//!   timeout, violated preconditions). It is propagated with `?` and ends the
//!   invocation.
//!
//! # Human-Facing Output
//!
//! ```text
//! There is more than one device currently connected.
//! Suggestion:
//!	 Run one of the following commands to choose one of the connected devices:
//!	 torq --serial emulator-5554
//!	 torq --serial emulator-5556
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for fatal torq failures.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a validation step: `Err` carries the user-facing reason.
pub type Checked = std::result::Result<(), ValidationError>;

/// A user-correctable failure carried as a value.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            message: message.into(),
            suggestion,
        }
    }

    /// Validation error without a suggestion.
    pub fn bare(message: impl Into<String>) -> Self {
        Self::new(message, None)
    }

    /// Validation error with a suggestion.
    pub fn suggest(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::new(message, Some(suggestion.into()))
    }

    /// Format for the terminal: message, then the indented suggestion if any.
    pub fn render(&self) -> String {
        match &self.suggestion {
            Some(suggestion) => format!("{}\nSuggestion:\n\t {}", self.message, suggestion),
            None => self.message.clone(),
        }
    }
}

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Bridge executable could not be run or exited unsuccessfully.
    Bridge,
    /// Device misbehaved (reconnect timeout, unparseable state).
    Device,
    /// Trace configuration or capture errors.
    Trace,
    /// File I/O and serialization errors.
    Io,
    /// Violated internal preconditions.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Bridge => write!(f, "bridge"),
            ErrorCategory::Device => write!(f, "device"),
            ErrorCategory::Trace => write!(f, "trace"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Unified fatal error type for torq.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file {path}: {message}")]
    InvalidConfigFile { path: String, message: String },

    // Bridge errors (20-29)
    #[error("failed to run `{command}`: {message}")]
    BridgeSpawn { command: String, message: String },

    #[error("`{command}` exited with status {code:?}: {stderr}")]
    BridgeExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    // Device errors (30-39)
    #[error("Device with serial {serial} took too long to reconnect after being rooted.")]
    ReconnectTimeout { serial: String },

    #[error("unexpected output from `{command}`: {message}")]
    UnexpectedOutput { command: String, message: String },

    // Trace errors (40-49)
    #[error("Cannot create config because a valid dur_ms was not set.")]
    MissingDuration,

    #[error("trace viewer failed: {0}")]
    Viewer(String),

    #[error("simpleperf conversion failed at {step}: {message}")]
    Conversion { step: String, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors (90-99)
    #[error("no device serial has been resolved; resolve the connection first")]
    SerialUnresolved,
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Bridge errors
    /// - 30-39: Device errors
    /// - 40-49: Trace errors
    /// - 60-69: I/O errors
    /// - 90-99: Internal errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfigFile { .. } => 11,
            Error::BridgeSpawn { .. } => 20,
            Error::BridgeExit { .. } => 21,
            Error::ReconnectTimeout { .. } => 30,
            Error::UnexpectedOutput { .. } => 31,
            Error::MissingDuration => 40,
            Error::Viewer(_) => 41,
            Error::Conversion { .. } => 42,
            Error::Io(_) => 60,
            Error::SerialUnresolved => 90,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfigFile { .. } => ErrorCategory::Config,
            Error::BridgeSpawn { .. } | Error::BridgeExit { .. } => ErrorCategory::Bridge,
            Error::ReconnectTimeout { .. } | Error::UnexpectedOutput { .. } => {
                ErrorCategory::Device
            }
            Error::MissingDuration | Error::Viewer(_) | Error::Conversion { .. } => {
                ErrorCategory::Trace
            },
            Error::Io(_) => ErrorCategory::Io,
            Error::SerialUnresolved => ErrorCategory::Internal,
        }
    }

    /// Returns whether re-running the invocation could plausibly succeed.
    ///
    /// Nothing is retried automatically; this is a hint for the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidConfigFile { .. } => true,
            Error::BridgeSpawn { .. } => false, // adb missing from PATH
            Error::BridgeExit { .. } => true,
            Error::ReconnectTimeout { .. } => true, // device may still be rebooting
            Error::UnexpectedOutput { .. } => false,
            Error::MissingDuration => false,
            Error::Viewer(_) => true,
            Error::Conversion { .. } => false,
            Error::Io(_) => true,
            Error::SerialUnresolved => false,
        }
    }

    /// Shorthand used by parsers of bridge output.
    pub fn unexpected_output(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnexpectedOutput {
            command: command.into(),
            message: message.into(),
        }
    }
}
