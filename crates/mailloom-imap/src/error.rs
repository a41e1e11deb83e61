//! Error types for the IMAP driver.

use std::time::Duration;

use thiserror::Error;

use crate::types::ResponseCode;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed response data.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Protocol violation that is not tied to a byte position.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server completed a command with NO.
    #[error("Server returned NO: {text}")]
    No {
        /// Human-readable server text.
        text: String,
        /// Response code, when the server sent one.
        code: Option<ResponseCode>,
    },

    /// Server completed a command with BAD.
    #[error("Server returned BAD: {text}")]
    Bad {
        /// Human-readable server text.
        text: String,
        /// Response code, when the server sent one.
        code: Option<ResponseCode>,
    },

    /// Server sent BYE and is closing the connection.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// The connection is gone; the request never completed.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid state for the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Returns true for malformed wire data. The connection cannot be reused.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Protocol(_))
    }

    /// Returns true when the server rejected a command with NO or BAD.
    #[must_use]
    pub const fn is_command_failure(&self) -> bool {
        matches!(self, Self::No { .. } | Self::Bad { .. } | Self::Auth(_))
    }

    /// Returns true when the transport failed and a reconnect is needed.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Timeout(_) | Self::Bye(_) | Self::ConnectionLost(_)
        )
    }

    /// Returns true when the connection must be dropped after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_protocol_error() || self.is_connection_lost()
    }

    /// Server response code attached to a command failure.
    #[must_use]
    pub const fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            Self::No { code, .. } | Self::Bad { code, .. } => code.as_ref(),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let no = Error::No {
            text: "[TRYCREATE] no such mailbox".into(),
            code: Some(ResponseCode::TryCreate),
        };
        assert!(no.is_command_failure());
        assert!(!no.is_fatal());
        assert_eq!(no.response_code(), Some(&ResponseCode::TryCreate));

        let parse = Error::Parse {
            position: 3,
            message: "bad".into(),
        };
        assert!(parse.is_protocol_error());
        assert!(parse.is_fatal());
        assert!(!parse.is_connection_lost());

        assert!(Error::Timeout(Duration::from_secs(1)).is_connection_lost());
        assert!(Error::Bye("shutting down".into()).is_connection_lost());
        assert!(Error::ConnectionLost("eof".into()).is_fatal());
    }

    #[test]
    fn display_keeps_server_text() {
        let err = Error::Bad {
            text: "Unknown command".into(),
            code: None,
        };
        assert_eq!(err.to_string(), "Server returned BAD: Unknown command");
    }
}
