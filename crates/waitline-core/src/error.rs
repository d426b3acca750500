// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the waitline queue service.

use thiserror::Error;

/// The primary error type used across all waitline crates.
///
/// Business conflicts (duplicate active token, daily limit reached) are not
/// errors here: issuance returns a structured outcome enum so callers branch
/// on the case instead of matching error strings.
#[derive(Debug, Error)]
pub enum WaitlineError {
    /// Configuration errors (invalid TOML, missing secrets, malformed keys).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed caller input (bad phone number, missing clinic slug).
    /// Returned directly, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Action invalid for the current session or token status.
    /// Rejected before any mutation is attempted.
    #[error("invalid state: {0}")]
    State(String),

    /// Transient messaging-provider failure (5xx, timeout). Queued for
    /// retry with bounded attempts.
    #[error("transient provider error: {message}")]
    Transient {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Decryption authentication-tag mismatch: corruption or forgery.
    /// Fatal, logged, never silently swallowed.
    #[error("tamper detected: {0}")]
    Tamper(String),

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Channel errors (gateway bind failure, non-retryable provider reply).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WaitlineError {
    /// True for state errors -- outcomes the conversational flow reports to
    /// the user rather than logging as failures.
    pub fn is_expected(&self) -> bool {
        matches!(self, WaitlineError::State(_))
    }
}
