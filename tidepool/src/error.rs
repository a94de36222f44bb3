//! Error taxonomy for the session/partition protocol.
//!
//! Every failure that crosses a component boundary is expressed as an
//! [`RsmError`]. The set of kinds is closed and maps onto the wire
//! [`Status`] carried in [`CallResponseHeaders`](crate::types::CallResponseHeaders):
//!
//! | Status | Error |
//! |---|---|
//! | `Ok` | *(none)* |
//! | `Error`, `Unknown` | [`RsmError::Unknown`] |
//! | `Canceled` | [`RsmError::Canceled`] |
//! | `NotFound` | [`RsmError::NotFound`] |
//! | `AlreadyExists` | [`RsmError::AlreadyExists`] |
//! | `Unauthorized` | [`RsmError::Unauthorized`] |
//! | `Forbidden` | [`RsmError::Forbidden`] |
//! | `Conflict` | [`RsmError::Conflict`] |
//! | `Invalid` | [`RsmError::Invalid`] |
//! | `Unavailable` | [`RsmError::Unavailable`] |
//! | `NotSupported` | [`RsmError::NotSupported`] |
//! | `Timeout` | [`RsmError::Timeout`] |
//! | `Fault` | [`RsmError::Fault`] |
//! | `Internal` | [`RsmError::Internal`] |
//!
//! `Unavailable` is the only retryable kind: it covers "not the leader",
//! missing connections and missing sessions.

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;
use crate::types::Status;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RsmError>;

/// Typed error for every operation in the access layer.
///
/// Each variant carries a human-readable message. Errors are `Clone` so a
/// single failure can be fanned out to every pending stream that depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RsmError {
    /// The failure could not be classified.
    #[error("unknown: {0}")]
    Unknown(String),

    /// The operation was canceled by the caller.
    #[error("canceled: {0}")]
    Canceled(String),

    /// The target (partition, session, key) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The caller is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The operation conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request is malformed.
    #[error("invalid: {0}")]
    Invalid(String),

    /// The partition, leader or session is not reachable right now.
    ///
    /// Retryable after re-resolving the partition leader.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The operation is not supported by the target.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The operation did not complete within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The state machine reported an unrecoverable fault.
    #[error("fault: {0}")]
    Fault(String),

    /// A local programming or schema defect (e.g. serialization).
    #[error("internal: {0}")]
    Internal(String),
}

impl RsmError {
    /// Build an [`RsmError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        RsmError::Unavailable(message.into())
    }

    /// Build an [`RsmError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        RsmError::Internal(message.into())
    }

    /// Build an [`RsmError::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        RsmError::Timeout(message.into())
    }

    /// Build an [`RsmError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        RsmError::NotFound(message.into())
    }

    /// Build an [`RsmError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        RsmError::Invalid(message.into())
    }

    /// The wire status corresponding to this error.
    pub fn status(&self) -> Status {
        match self {
            RsmError::Unknown(_) => Status::Unknown,
            RsmError::Canceled(_) => Status::Canceled,
            RsmError::NotFound(_) => Status::NotFound,
            RsmError::AlreadyExists(_) => Status::AlreadyExists,
            RsmError::Unauthorized(_) => Status::Unauthorized,
            RsmError::Forbidden(_) => Status::Forbidden,
            RsmError::Conflict(_) => Status::Conflict,
            RsmError::Invalid(_) => Status::Invalid,
            RsmError::Unavailable(_) => Status::Unavailable,
            RsmError::NotSupported(_) => Status::NotSupported,
            RsmError::Timeout(_) => Status::Timeout,
            RsmError::Fault(_) => Status::Fault,
            RsmError::Internal(_) => Status::Internal,
        }
    }

    /// The message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            RsmError::Unknown(m)
            | RsmError::Canceled(m)
            | RsmError::NotFound(m)
            | RsmError::AlreadyExists(m)
            | RsmError::Unauthorized(m)
            | RsmError::Forbidden(m)
            | RsmError::Conflict(m)
            | RsmError::Invalid(m)
            | RsmError::Unavailable(m)
            | RsmError::NotSupported(m)
            | RsmError::Timeout(m)
            | RsmError::Fault(m)
            | RsmError::Internal(m) => m,
        }
    }

    /// Whether the retry interceptor may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RsmError::Unavailable(_))
    }
}

impl From<CodecError> for RsmError {
    fn from(err: CodecError) -> Self {
        RsmError::Internal(err.to_string())
    }
}

/// Translate a response status into a typed error.
///
/// Returns `None` for [`Status::Ok`]. [`Status::Error`] has no dedicated kind
/// and maps to [`RsmError::Unknown`].
pub fn error_from_status(status: Status, message: impl Into<String>) -> Option<RsmError> {
    let message = message.into();
    let err = match status {
        Status::Ok => return None,
        Status::Error | Status::Unknown => RsmError::Unknown(message),
        Status::Canceled => RsmError::Canceled(message),
        Status::NotFound => RsmError::NotFound(message),
        Status::AlreadyExists => RsmError::AlreadyExists(message),
        Status::Unauthorized => RsmError::Unauthorized(message),
        Status::Forbidden => RsmError::Forbidden(message),
        Status::Conflict => RsmError::Conflict(message),
        Status::Invalid => RsmError::Invalid(message),
        Status::Unavailable => RsmError::Unavailable(message),
        Status::NotSupported => RsmError::NotSupported(message),
        Status::Timeout => RsmError::Timeout(message),
        Status::Fault => RsmError::Fault(message),
        Status::Internal => RsmError::Internal(message),
    };
    Some(err)
}
