//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server answered with a non-success reply. Displays as the
    /// server sent it, e.g. `550 5.1.1 user unknown`.
    #[error("{code} {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text.
        message: String,
    },

    /// The server closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Malformed reply.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message larger than the server's SIZE limit.
    #[error("message of {size} bytes exceeds the server limit of {limit}")]
    MessageTooLarge {
        /// Message size.
        size: usize,
        /// Advertised limit.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true for a 5xx reply. Repeating the transaction will not
    /// help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true for a 4xx reply.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true when the transport failed.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Tls(_) | Self::ConnectionClosed)
    }

    /// Reply code, for server rejections.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let rejected = Error::smtp_error(550, "5.1.1 user unknown");
        assert!(rejected.is_permanent());
        assert!(!rejected.is_transient());
        assert_eq!(rejected.code(), Some(550));
        assert_eq!(rejected.to_string(), "550 5.1.1 user unknown");

        let busy = Error::smtp_error(451, "try later");
        assert!(busy.is_transient());
        assert!(!busy.is_connection_error());

        assert!(Error::ConnectionClosed.is_connection_error());
        assert_eq!(Error::ConnectionClosed.code(), None);
    }
}
