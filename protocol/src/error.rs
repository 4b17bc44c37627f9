//! Error types for the bridge.
//!
//! Policy rejections and integrity violations are *not* errors: they are
//! verdicts, carried by [`VerificationResult`](crate::message::VerificationResult).
//! [`BridgeError`] covers everything that stops a request before it reaches
//! the verification pipeline, plus configuration and codec failures.

use thiserror::Error;

/// Errors raised outside the verification verdict path.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required field is missing or empty. Never reaches the pipeline.
    #[error("malformed request: missing {0}")]
    MissingField(&'static str),

    /// A field is present but cannot be parsed (bad timestamp, bad direction).
    #[error("malformed request: invalid {field}: {reason}")]
    InvalidField {
        /// The offending field name, as it appears on the wire.
        field: &'static str,
        /// Why it was refused.
        reason: String,
    },

    /// The request body is not the expected JSON shape.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The bridge identity token is missing or wrong.
    #[error("bridge token rejected")]
    Unauthenticated,

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A business payload does not match the message shape it was decoded as.
    #[error("codec error: {0}")]
    Codec(String),
}

impl BridgeError {
    /// True for errors that map to an HTTP 400 (client sent garbage).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            BridgeError::MissingField(_)
                | BridgeError::InvalidField { .. }
                | BridgeError::Malformed(_)
        )
    }
}

/// Failure to persist an audit record or incident. Logged, never propagated
/// into a verification verdict.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing store could not be written.
    #[error("audit store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("audit record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store refused the write for its own reasons.
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}
