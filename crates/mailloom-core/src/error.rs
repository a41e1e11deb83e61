//! Error taxonomy of the engine.
//!
//! Errors from the protocol crates are classified on conversion, so
//! callers only ever match on what happened, not on where.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed wire data. The connection was dropped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected a command (IMAP NO/BAD, SMTP 4xx after retries).
    #[error("Command failed: {0}")]
    CommandFailure(String),

    /// Network failure or timeout; the session reconnects on its own.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Local store failure. The transaction was rolled back.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The on-disk schema cannot be used by this build.
    #[error("store schema version {found} needs migration; this build supports {supported}")]
    MigrationRequired {
        /// Version found on disk.
        found: i64,
        /// Version this build writes.
        supported: i64,
    },

    /// The submission server refused the message. Not retried.
    #[error("Delivery failed: {reason}")]
    DeliveryFailure {
        /// SMTP reply code, when the server gave one.
        code: Option<u16>,
        /// Server text, e.g. `550 5.1.1 user unknown`.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// No such folder in the store.
    #[error("Unknown folder: {0}")]
    UnknownFolder(String),

    /// No such message, locally or on the server.
    #[error("Unknown message: {folder} UID {uid}")]
    UnknownMessage {
        /// Folder path.
        folder: String,
        /// UID.
        uid: u32,
    },

    /// The operation was cancelled before it finished.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// True for errors worth retrying after a delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::CommandFailure(_))
    }
}

impl From<mailloom_imap::Error> for Error {
    fn from(err: mailloom_imap::Error) -> Self {
        if err.is_protocol_error() {
            Self::Protocol(err.to_string())
        } else if err.is_connection_lost() {
            Self::ConnectionLost(err.to_string())
        } else {
            Self::CommandFailure(err.to_string())
        }
    }
}

impl From<mailloom_smtp::Error> for Error {
    fn from(err: mailloom_smtp::Error) -> Self {
        use mailloom_smtp::Error as Smtp;
        match &err {
            Smtp::SmtpError { code, .. } if err.is_permanent() => Self::DeliveryFailure {
                code: Some(*code),
                reason: err.to_string(),
            },
            Smtp::InvalidAddress(_) | Smtp::MessageTooLarge { .. } | Smtp::NotSupported(_) => {
                Self::DeliveryFailure {
                    code: None,
                    reason: err.to_string(),
                }
            }
            Smtp::Protocol(_) => Self::Protocol(err.to_string()),
            _ if err.is_connection_error() => Self::ConnectionLost(err.to_string()),
            _ => Self::CommandFailure(err.to_string()),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn imap_errors_are_classified() {
        let lost: Error = mailloom_imap::Error::Timeout(std::time::Duration::from_secs(5)).into();
        assert!(matches!(lost, Error::ConnectionLost(_)));
        assert!(lost.is_retryable());

        let no: Error = mailloom_imap::Error::No {
            text: "mailbox busy".into(),
            code: None,
        }
        .into();
        assert!(matches!(&no, Error::CommandFailure(text) if text.contains("mailbox busy")));

        let bad: Error = mailloom_imap::Error::Protocol("garbage".into()).into();
        assert!(matches!(bad, Error::Protocol(_)));
        assert!(!bad.is_retryable());
    }

    #[test]
    fn smtp_rejection_keeps_server_text() {
        let err: Error = mailloom_smtp::Error::smtp_error(550, "5.1.1 user unknown").into();
        match err {
            Error::DeliveryFailure { code, reason } => {
                assert_eq!(code, Some(550));
                assert_eq!(reason, "550 5.1.1 user unknown");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn smtp_transient_is_retryable() {
        let err: Error = mailloom_smtp::Error::smtp_error(451, "try later").into();
        assert!(err.is_retryable());
        let err: Error = mailloom_smtp::Error::ConnectionClosed.into();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }
}
