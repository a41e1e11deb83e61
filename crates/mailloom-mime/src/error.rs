//! Error types for message model operations.

/// Result type alias for message model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message model error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Invalid transfer encoding payload.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Invalid mailbox address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Multipart nesting exceeded the supported depth.
    #[error("Multipart nesting deeper than {0} levels")]
    TooDeep(usize),

    /// Missing required header when composing.
    #[error("Missing required header: {0}")]
    MissingHeader(String),
}
