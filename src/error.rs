//! Error types for the oracle node.
//!
//! This module defines all error types used throughout the node, grouped by
//! subsystem, together with the retry classification the submission pipeline
//! relies on.

use thiserror::Error;

/// Result type alias for oracle node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message fragment that marks a chain error as non-retryable
pub const INSUFFICIENT_FUNDS_MARKER: &str = "insufficient funds";

/// Main error type for the oracle node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Ingestion Errors
    // ═══════════════════════════════════════════════════════════════════

    /// No data source registered under this name
    #[error("Data source {0} not found")]
    UnknownSource(String),

    /// Parsed payload did not satisfy the source schema
    #[error("Data validation failed for {source_name}: {reason}")]
    SchemaValidation {
        /// Source the payload came from
        source_name: String,
        /// Which rule was violated
        reason: String,
    },

    /// Parse function could not extract a value from the payload
    #[error("Failed to parse payload from {source_name}: {reason}")]
    Parse {
        /// Source the payload came from
        source_name: String,
        /// Parser error details
        reason: String,
    },

    /// HTTP transport failure
    #[error("HTTP request to {url} failed: {reason}")]
    Http {
        /// Requested URL
        url: String,
        /// Transport error details
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Consensus Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Round is missing, expired or no longer active
    #[error("Invalid or inactive consensus round: {0}")]
    InvalidRound(String),

    /// No leader has been elected yet
    #[error("No leader available to start consensus round")]
    NoLeader,

    /// Validator is not part of the registry
    #[error("Validator not found: {0}")]
    ValidatorNotFound(String),

    /// Validator is registered but was not snapshotted into the round
    #[error("Validator {validator} is not a participant of round {round_id}")]
    NotParticipant {
        /// Round identifier
        round_id: String,
        /// Submitting validator
        validator: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Chain & Submission Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Error reported by the chain client
    #[error("Chain error: {0}")]
    Chain(String),

    /// Transaction was not confirmed within the wait window
    #[error("Transaction {hash} confirmation timeout after {waited_secs}s")]
    ConfirmationTimeout {
        /// Transaction hash
        hash: String,
        /// Seconds spent waiting
        waited_secs: u64,
    },

    /// Submission gave up after exhausting all attempts
    #[error("Failed to submit data for request {request_id} after {attempts} attempts: {last_error}")]
    SubmissionFailed {
        /// Request identifier
        request_id: u64,
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        last_error: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid configuration value
    #[error("Invalid configuration {name}: {reason}")]
    Config {
        /// Configuration key
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Retry classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure, worth another attempt
    Retryable,
    /// Permanent failure, abort immediately
    Fatal,
}

impl Error {
    /// Classify the error for retry loops.
    ///
    /// Chain errors mentioning insufficient funds are fatal, as are caller
    /// errors and configuration problems. Transport failures and confirmation
    /// timeouts are retryable.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Error::Chain(msg) | Error::Internal(msg) => {
                if msg.to_lowercase().contains(INSUFFICIENT_FUNDS_MARKER) {
                    ErrorClass::Fatal
                } else {
                    ErrorClass::Retryable
                }
            }
            Error::Http { .. }
            | Error::Parse { .. }
            | Error::SchemaValidation { .. }
            | Error::ConfirmationTimeout { .. } => ErrorClass::Retryable,
            Error::UnknownSource(_)
            | Error::InvalidRound(_)
            | Error::NoLeader
            | Error::ValidatorNotFound(_)
            | Error::NotParticipant { .. }
            | Error::SubmissionFailed { .. }
            | Error::Config { .. }
            | Error::Serialization(_)
            | Error::Io(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true if another attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Ingestion errors: 1xxx
            Error::UnknownSource(_) => 1001,
            Error::SchemaValidation { .. } => 1002,
            Error::Parse { .. } => 1003,
            Error::Http { .. } => 1004,

            // Consensus errors: 2xxx
            Error::InvalidRound(_) => 2001,
            Error::NoLeader => 2002,
            Error::ValidatorNotFound(_) => 2003,
            Error::NotParticipant { .. } => 2004,

            // Chain errors: 3xxx
            Error::Chain(_) => 3001,
            Error::ConfirmationTimeout { .. } => 3002,
            Error::SubmissionFailed { .. } => 3003,

            // Configuration errors: 5xxx
            Error::Config { .. } => 5001,
            Error::Serialization(_) => 5002,
            Error::Io(_) => 5003,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let codes = vec![
            Error::UnknownSource("".into()).code(),
            Error::SchemaValidation { source_name: "".into(), reason: "".into() }.code(),
            Error::Parse { source_name: "".into(), reason: "".into() }.code(),
            Error::Http { url: "".into(), reason: "".into() }.code(),
            Error::InvalidRound("".into()).code(),
            Error::NoLeader.code(),
            Error::ValidatorNotFound("".into()).code(),
            Error::NotParticipant { round_id: "".into(), validator: "".into() }.code(),
            Error::Chain("".into()).code(),
            Error::ConfirmationTimeout { hash: "".into(), waited_secs: 0 }.code(),
            Error::SubmissionFailed { request_id: 0, attempts: 0, last_error: "".into() }.code(),
            Error::Config { name: "".into(), reason: "".into() }.code(),
            Error::Serialization("".into()).code(),
            Error::Io("".into()).code(),
            Error::Internal("".into()).code(),
        ];

        let mut unique_codes = codes.clone();
        unique_codes.sort();
        unique_codes.dedup();

        assert_eq!(codes.len(), unique_codes.len(), "Error codes must be unique");
    }

    #[test]
    fn test_insufficient_funds_is_fatal() {
        let err = Error::Chain("execution reverted: Insufficient funds for gas".into());
        assert_eq!(err.classify(), ErrorClass::Fatal);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert_eq!(Error::Chain("connection reset".into()).classify(), ErrorClass::Retryable);
        assert!(Error::ConfirmationTimeout { hash: "0xab".into(), waited_secs: 300 }.is_recoverable());
        assert!(Error::Http { url: "http://x".into(), reason: "503".into() }.is_recoverable());
    }

    #[test]
    fn test_caller_errors_are_fatal() {
        assert!(!Error::NoLeader.is_recoverable());
        assert!(!Error::InvalidRound("r1".into()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::SubmissionFailed {
            request_id: 42,
            attempts: 5,
            last_error: "timeout".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("timeout"));
    }
}
