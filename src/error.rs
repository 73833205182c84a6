//! Error handling module for devstation
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Library code returns `ProvisionError`; the binary wraps it with anyhow context.

use thiserror::Error;

use crate::run_state::RunTransitionError;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors (file operations, process spawning)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (config values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external command ran but exited unsuccessfully
    #[error("`{program}` failed (exit code {code}): {stderr}")]
    Command {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Fetching a remote archive failed
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// Unpacking or inspecting an archive failed
    #[error("Archive error: {0}")]
    Archive(String),

    /// Run state machine transition errors
    #[error("Run transition error: {0}")]
    Transition(#[from] RunTransitionError),

    /// System errors (user lookup, permissions)
    #[error("System error: {0}")]
    System(String),
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a command failure error
    pub fn command(program: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }
}
