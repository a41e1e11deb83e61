//! Plain and TLS transports.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::{Config, Security};
use crate::{Error, Result};

/// A TCP stream, optionally wrapped in TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_tls() { "ImapStream::Tls" } else { "ImapStream::Plain" })
    }
}

impl ImapStream {
    /// Wraps the plaintext stream in TLS (after a successful STARTTLS).
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => Ok(Self::Tls(Box::new(handshake(tcp, host).await?))),
            Self::Tls(_) => Err(Error::InvalidState("stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector trusting the Mozilla root set.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

async fn handshake(tcp: TcpStream, host: &str) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())?;
    Ok(create_tls_connector().connect(server_name, tcp).await?)
}

/// Opens the transport described by `config`.
///
/// STARTTLS connections come back plain; the client upgrades them after
/// the greeting.
pub async fn connect(config: &Config) -> Result<ImapStream> {
    let tcp = TcpStream::connect(config.address()).await?;
    tcp.set_nodelay(true)?;
    tracing::debug!(host = %config.host, port = config.port, security = ?config.security, "connected");

    match config.security {
        Security::Implicit => Ok(ImapStream::Tls(Box::new(handshake(tcp, &config.host).await?))),
        Security::StartTls | Security::None => Ok(ImapStream::Plain(tcp)),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_connect_stays_plain() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .security(Security::None)
            .port(port)
            .build();

        let stream = connect(&config).await.unwrap();
        assert!(!stream.is_tls());
        let _accepted = listener.accept().await.unwrap();
    }

    #[test]
    fn invalid_server_name_rejected() {
        assert!(ServerName::try_from("not a host name".to_string()).is_err());
    }
}
