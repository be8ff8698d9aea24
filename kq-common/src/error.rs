//! # Error Types
//!
//! Purpose: One error type shared by every kq crate so callers can match on
//! failure classes instead of strings.
//!
//! ## Design Principles
//! 1. **Taxonomy First**: Variants follow the failure classes the client
//!    surfaces (decode, capacity, state, upstream) rather than call sites.
//! 2. **Connection Scoped Decoding**: Decode failures carry enough detail to
//!    log, but never the partial body.
//! 3. **Fail Fast**: Programming errors (`InvalidState`) are returned, never
//!    swallowed.

use std::fmt;

/// Result alias used across the workspace.
pub type KqResult<T> = Result<T, KqError>;

/// Errors surfaced by the kq client.
#[derive(Debug, thiserror::Error)]
pub enum KqError {
    /// Malformed frame or payload seen by a response reader.
    #[error("protocol decode error: {detail}")]
    ProtocolDecode { detail: String },

    /// Broker answered with a non-zero error code.
    #[error("broker error: {code}")]
    Broker { code: ErrorCode },

    /// Message rejected at push time for exceeding `maxMessageSize`.
    #[error("message size {size} exceeds maximum {max}")]
    CapacityExceeded { size: usize, max: usize },

    /// Operation not valid in the current state (empty pool, destroyed topic).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Producer or consumer role reported a delivery failure.
    #[error("upstream failure: {message}")]
    Upstream { message: String },

    /// Configuration could not be resolved.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Codec failure while compressing or decompressing a batch.
    #[error("compression error: {message}")]
    Compression { message: String },

    /// Network or IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KqError {
    /// Builds a decode error.
    pub fn decode<S: Into<String>>(detail: S) -> Self {
        KqError::ProtocolDecode {
            detail: detail.into(),
        }
    }

    /// Builds an invalid state error.
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        KqError::InvalidState(message.into())
    }

    /// Builds an upstream failure.
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        KqError::Upstream {
            message: message.into(),
        }
    }

    /// Builds a configuration error.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        KqError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Builds a compression error.
    pub fn compression<S: Into<String>>(message: S) -> Self {
        KqError::Compression {
            message: message.into(),
        }
    }

    /// True for failures raised while decoding a frame.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            KqError::ProtocolDecode { .. } | KqError::Broker { .. } | KqError::Compression { .. }
        )
    }

    /// True when retrying on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KqError::Io(_) | KqError::Upstream { .. } => true,
            KqError::Broker { code } => code.is_retryable(),
            _ => false,
        }
    }
}

/// Broker error codes carried in every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error.
    None,
    /// Unexpected server error.
    Unknown,
    /// Requested offset is outside the partition's log.
    OffsetOutOfRange,
    /// Message failed its checksum on the broker.
    InvalidMessage,
    /// Partition is not hosted by the broker.
    WrongPartition,
    /// Fetch size is invalid.
    InvalidFetchSize,
}

impl ErrorCode {
    /// Returns the wire value.
    pub const fn as_i16(self) -> i16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::Unknown => -1,
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::InvalidMessage => 2,
            ErrorCode::WrongPartition => 3,
            ErrorCode::InvalidFetchSize => 4,
        }
    }

    /// True when the code means success.
    pub const fn is_ok(self) -> bool {
        matches!(self, ErrorCode::None)
    }

    fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Unknown | ErrorCode::WrongPartition)
    }
}

impl From<i16> for ErrorCode {
    fn from(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::InvalidMessage,
            3 => ErrorCode::WrongPartition,
            4 => ErrorCode::InvalidFetchSize,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::None => "none",
            ErrorCode::Unknown => "unknown",
            ErrorCode::OffsetOutOfRange => "offset out of range",
            ErrorCode::InvalidMessage => "invalid message",
            ErrorCode::WrongPartition => "wrong partition",
            ErrorCode::InvalidFetchSize => "invalid fetch size",
        };
        write!(f, "{} ({})", name, self.as_i16())
    }
}
