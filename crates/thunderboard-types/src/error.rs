//! Error types for parsing in thunderboard-types.

use thiserror::Error;

/// Errors that can occur when parsing Thunderboard values from text.
///
/// Payload decoding never produces this error: malformed channel payloads
/// decode to `None` (see [`crate::decode`]).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unknown demo name.
    #[error("Unknown demo '{0}' (expected io, environment or motion)")]
    UnknownDemo(String),

    /// Unknown capability name.
    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),

    /// A value was out of its allowed range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using thunderboard-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::UnknownDemo("lights".to_string());
        assert!(err.to_string().contains("lights"));
        assert!(err.to_string().contains("motion"));

        let err = ParseError::InvalidValue("led index 7".to_string());
        assert_eq!(err.to_string(), "Invalid value: led index 7");
    }
}
