//! How the session obtains a fresh connection.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{
    Authenticated, Client, Config, ImapStream, NotAuthenticated, Security, connect,
};
use crate::types::Capability;
use crate::Result;

/// Produces connections for the session actor.
///
/// Split in two so the session can report `Connecting` and
/// `Authenticating` separately. Tests implement this over
/// `tokio::io::duplex` streams.
pub trait Connector: Send + Sync + 'static {
    /// Transport type.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens the transport and reads the greeting (and does STARTTLS).
    fn open(&self) -> impl Future<Output = Result<Client<Self::Stream, NotAuthenticated>>> + Send;

    /// Authenticates an opened connection.
    fn authenticate(
        &self,
        client: Client<Self::Stream, NotAuthenticated>,
    ) -> impl Future<Output = Result<Client<Self::Stream, Authenticated>>> + Send;
}

/// Login credentials.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connects over TCP with the configured security and password auth.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: Config,
    credentials: Credentials,
}

impl TcpConnector {
    /// Creates a connector.
    #[must_use]
    pub const fn new(config: Config, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = ImapStream;

    async fn open(&self) -> Result<Client<ImapStream, NotAuthenticated>> {
        let stream = connect(&self.config).await?;
        let client = Client::from_stream(stream).await?;
        match self.config.security {
            Security::StartTls => client.starttls(&self.config.host).await,
            Security::Implicit | Security::None => Ok(client),
        }
    }

    async fn authenticate(
        &self,
        client: Client<ImapStream, NotAuthenticated>,
    ) -> Result<Client<ImapStream, Authenticated>> {
        let Credentials { username, password } = &self.credentials;
        let prefer_plain = client.supports_auth_plain()
            && (client.has_capability(&Capability::LoginDisabled)
                || client.has_capability(&Capability::SaslIr));
        if prefer_plain {
            client.authenticate_plain(username, password).await
        } else {
            client.login(username, password).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_password() {
        let shown = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
