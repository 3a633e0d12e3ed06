//! Protocol error types and server error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while framing or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame length {0}: length must cover the message code byte")]
    InvalidLength(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("unknown message code: {0}")]
    UnknownMessageCode(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns whether this error means the byte stream itself is broken.
    ///
    /// Framing errors leave the connection out of sync and it must not be
    /// reused. A payload that frames correctly but fails to decode does not.
    pub fn is_framing(&self) -> bool {
        !matches!(self, ProtocolError::Json(_))
    }
}

/// Error codes carried in the `errcode` field of an error response.
///
/// Servers that predate structured codes always send `0`; callers that need
/// to classify those must fall back to the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    Unspecified,
    BadRequest,
    Unauthorized,
    NotFound,
    PreconditionFailed,
    Overloaded,
    Timeout,
    Other(u32),
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::Unspecified => 0,
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::PreconditionFailed => 412,
            ErrorCode::Overloaded => 503,
            ErrorCode::Timeout => 504,
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ErrorCode::Unspecified,
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::Unauthorized,
            404 => ErrorCode::NotFound,
            412 => ErrorCode::PreconditionFailed,
            503 => ErrorCode::Overloaded,
            504 => ErrorCode::Timeout,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.as_u32()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unspecified => write!(f, "UNSPECIFIED"),
            ErrorCode::BadRequest => write!(f, "BAD_REQUEST"),
            ErrorCode::Unauthorized => write!(f, "UNAUTHORIZED"),
            ErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ErrorCode::PreconditionFailed => write!(f, "PRECONDITION_FAILED"),
            ErrorCode::Overloaded => write!(f, "OVERLOADED"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Other(code) => write!(f, "ERROR_{}", code),
        }
    }
}
