//! Error taxonomy for the booking backend.
//!
//! Business-operation errors (validation, not-found, authorization) are
//! synchronous and block the state transition. Channel failures are
//! recorded on the notification ledger and resolved by the retry
//! scheduler; they never reach the caller of a business operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlxError {
    /// Missing or malformed input. Reported to the caller, no state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced booking/driver/vehicle does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Role or signature check failed. Security-relevant, audited.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// A delivery channel send failed. Recorded on the ledger, retried
    /// out of band; never propagated from a business operation.
    #[error("channel delivery failed: {0}")]
    Channel(String),

    /// Persistent store unavailable or rejected the operation.
    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BlxError>;

impl BlxError {
    /// Whether this error must leave stores untouched when raised from a
    /// business operation.
    pub fn blocks_transition(&self) -> bool {
        matches!(
            self,
            BlxError::Validation(_) | BlxError::NotFound(_) | BlxError::Authorization(_)
        )
    }
}
