//! Error types for the hub synchronization core.

use thiserror::Error;

/// Errors raised by the hub core. None of these are allowed to take down the host;
/// they are returned to the caller, published to failure subscribers, or logged.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("No session credential available")]
    Unauthenticated,

    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    #[error("Send failed: {0} dropped, hub not connected")]
    SendFailure(&'static str),

    #[error("Malformed {event} payload: {reason}")]
    DecodeFailure { event: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("No tokio runtime available to drive the hub connection")]
    Runtime,
}

pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failure_names_the_event() {
        let err = HubError::DecodeFailure {
            event: "UserTyping".to_string(),
            reason: "invalid length 1".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed UserTyping payload: invalid length 1");
    }
}
