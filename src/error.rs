//! Error taxonomy for the live sensor core.
//!
//! Only two things are real failures here: a raw record that is not a record
//! at all, and a collaborator that can no longer deliver data. Duplicate and
//! out-of-order readings are ordinary ingest outcomes, see
//! [`crate::store::IngestOutcome`].

use thiserror::Error;

// ---

/// Failures surfaced by the page-fetch and live-subscription collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or the remote side returned an error.
    #[error("request failed: {0}")]
    Request(String),

    /// The response arrived but its body could not be decoded.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The live subscription ended without being cancelled by us.
    #[error("subscription closed by transport")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors returned by the core's public operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// The raw input could not be interpreted as a reading record.
    #[error("malformed reading: {0}")]
    MalformedReading(String),

    /// Non-recoverable collaborator failure.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// An operation was requested in a coordinator state that does not allow it.
    #[error("invalid coordinator state: {0}")]
    InvalidState(String),
}

impl CoreError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CoreError::MalformedReading(msg.into())
    }
}
