//! Transport: plain TCP or TLS.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};

use crate::error::{Error, Result};

/// SMTP transport.
pub enum SmtpStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl SmtpStream {
    /// Returns true once TLS is active.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Runs the TLS handshake on a plain stream (after STARTTLS).
    ///
    /// # Errors
    ///
    /// Fails if TLS is already active or the handshake fails.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => handshake(tcp, hostname).await,
            Self::Tls(_) => Err(Error::Protocol("already using TLS".into())),
        }
    }
}

async fn handshake(tcp: TcpStream, hostname: &str) -> Result<SmtpStream> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("invalid hostname: {hostname}")))?;
    let tls = create_tls_connector().connect(server_name, tcp).await?;
    Ok(SmtpStream::Tls(Box::new(tls)))
}

/// Connects over plain TCP (port 25 or 587 before STARTTLS).
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    tcp.set_nodelay(true)?;
    tracing::debug!(hostname, port, "smtp connected");
    Ok(SmtpStream::Plain(tcp))
}

/// Connects with implicit TLS (port 465).
///
/// # Errors
///
/// Returns an error if the connection or handshake fails.
pub async fn connect_tls(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    tcp.set_nodelay(true)?;
    let stream = handshake(tcp, hostname).await?;
    tracing::debug!(hostname, port, "smtp connected over TLS");
    Ok(stream)
}

/// TLS connector trusting the webpki roots.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect("127.0.0.1", port).await.unwrap();
        assert!(!stream.is_tls());
    }
}
