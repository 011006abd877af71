//! Server error types.

use std::fmt;

use rollcall_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Wire encoding error
    Protocol(ProtocolError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Protocol(err) => write!(f, "protocol error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Config(_) => None,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn config_error_display() {
        let err = ServerError::Config("cadence must be positive".to_string());
        assert_eq!(err.to_string(), "configuration error: cadence must be positive");
        assert!(err.source().is_none());
    }

    #[test]
    fn protocol_error_keeps_source() {
        let err = ServerError::from(ProtocolError::Decode("eof".to_string()));
        assert!(err.source().is_some());
    }
}
