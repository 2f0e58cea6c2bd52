//! Region span error types
//!
//! Only construction and configuration problems surface as errors. Lock
//! contention is reported through [`LockAttempt`](crate::LockAttempt) and
//! [`LockRangeResult`](crate::LockRangeResult), and misuse of the lock
//! (unlocking something that was never locked) panics.

use thiserror::Error;

/// Result type for region span operations
pub type Result<T> = std::result::Result<T, SpanError>;

/// Region span errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpanError {
    #[error("invalid span: [{start}, {end})")]
    InvalidSpan { start: String, end: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SpanError {
    /// Build an [`SpanError::InvalidSpan`] from raw keys
    pub fn invalid_span(start: &[u8], end: &[u8]) -> Self {
        SpanError::InvalidSpan {
            start: hex::encode(start),
            end: hex::encode(end),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SpanError::InvalidConfig(msg.into())
    }
}

impl From<hex::FromHexError> for SpanError {
    fn from(e: hex::FromHexError) -> Self {
        SpanError::InvalidKey(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_span_is_hex_encoded() {
        let err = SpanError::invalid_span(b"b", b"a");
        assert_eq!(err.to_string(), "invalid span: [62, 61)");
    }

    #[test]
    fn test_hex_error_conversion() {
        let err: SpanError = hex::decode("zz").unwrap_err().into();
        assert!(matches!(err, SpanError::InvalidKey(_)));
    }
}
