//! Error types for threshold key management operations

use thiserror::Error;

/// Result type alias for doublelock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during key generation, decryption and policy evaluation
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid session or policy configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Index outside the allowed range (indices start at 1)
    #[error("Invalid participant index: {0}")]
    InvalidIndex(u32),

    /// The same index appears twice in an interpolation set
    #[error("Duplicate participant index: {0}")]
    DuplicateIndex(u32),

    /// A received share failed Feldman verification
    #[error("Share verification failed: {0}")]
    VerificationFailed(String),

    /// Authentication tag did not match; no plaintext is released
    #[error("MAC check failed")]
    MacMismatch,

    /// Point is not on the curve or has malformed coordinates
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    /// Modular inversion of a non-invertible element
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// A group contributed fewer members than its inner threshold
    #[error("Group {group} did not meet its inner threshold: required {required}, got {actual}")]
    InnerThresholdNotMet {
        group: String,
        required: usize,
        actual: usize,
    },

    /// Fewer groups participated than the outer threshold
    #[error("Outer threshold not met: required {required} groups, got {actual}")]
    OuterThresholdNotMet { required: usize, actual: usize },

    /// The configured veto group did not take part
    #[error("Veto group {0} did not participate")]
    VetoGroupMissing(String),

    /// Finalized participants disagree on the aggregate key
    #[error("Consistency fault in session {session_id}: {distinct} distinct key hashes")]
    ConsistencyFault { session_id: String, distinct: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Session store error
    #[error("Store error: {0}")]
    Store(String),

    /// The store already holds this artifact
    #[error("Duplicate artifact: {0}")]
    Duplicate(String),

    /// Timeout waiting for session state
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Operation invalid in the current protocol state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Attributable to a peer; the offending contribution is excluded
    ProtocolFault,
    /// Caller error, raised before any cryptographic work where feasible
    Precondition,
    /// Divergent session state; the session must be abandoned
    Consistency,
    /// Store or network failure, left to the caller to retry
    Transport,
    /// Non-invertible element during curve arithmetic
    Arithmetic,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::VerificationFailed(_)
            | Error::MacMismatch
            | Error::InvalidPoint(_)
            | Error::InnerThresholdNotMet { .. }
            | Error::Deserialization(_) => ErrorClass::ProtocolFault,
            Error::InvalidConfig(_)
            | Error::ThresholdNotMet { .. }
            | Error::InvalidIndex(_)
            | Error::DuplicateIndex(_)
            | Error::OuterThresholdNotMet { .. }
            | Error::VetoGroupMissing(_)
            | Error::Serialization(_)
            | Error::InvalidState(_)
            | Error::Internal(_) => ErrorClass::Precondition,
            Error::ConsistencyFault { .. } => ErrorClass::Consistency,
            Error::Store(_) | Error::Duplicate(_) | Error::Timeout(_) | Error::SessionNotFound(_) => {
                ErrorClass::Transport
            }
            Error::Arithmetic(_) => ErrorClass::Arithmetic,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<session_store::StoreError> for Error {
    fn from(e: session_store::StoreError) -> Self {
        use session_store::StoreError;
        match e {
            StoreError::Duplicate(what) => Error::Duplicate(what),
            StoreError::NotFound(what) => Error::SessionNotFound(what),
            other => Error::Store(other.to_string()),
        }
    }
}
