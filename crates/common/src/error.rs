//! Error types for minerscope
//!
//! Only input and setup failures are errors. Per-port and per-host network
//! outcomes are encoded in the scan results instead.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinerScopeError {
    #[error("malformed address input '{token}': {reason}")]
    MalformedAddressInput { token: String, reason: String },

    #[error("malformed port input '{token}': {reason}")]
    MalformedPortInput { token: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rule definition error: {0}")]
    RuleDefinition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MinerScopeError {
    pub fn malformed_address(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAddressInput {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_port(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPortInput {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised by validating user input, before any network activity.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedAddressInput { .. } | Self::MalformedPortInput { .. }
        )
    }
}

/// Result type alias for minerscope operations
pub type MinerScopeResult<T> = Result<T, MinerScopeError>;
