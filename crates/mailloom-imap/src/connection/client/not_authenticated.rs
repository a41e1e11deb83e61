//! Implementation for the not-authenticated state.

use std::marker::PhantomData;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::connection::stream::ImapStream;
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::types::{Capability, ResponseCode, Status};
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new client from a connected stream.
    ///
    /// Reads the server greeting and any capabilities it carries.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        let greeting = framed.read_response().await?;
        let mut capabilities = Vec::new();
        match ResponseParser::parse(&greeting)? {
            Response::Untagged(
                UntaggedResponse::Ok { code, .. } | UntaggedResponse::PreAuth { code, .. },
            ) => {
                if let Some(ResponseCode::Capability(caps)) = code {
                    capabilities = caps;
                }
            }
            Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                return Err(Error::Bye(text));
            }
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }
        tracing::debug!(capabilities = capabilities.len(), "greeting received");

        Ok(Self {
            stream: framed,
            tags: TagGenerator::default(),
            capabilities,
            selected: None,
            enabled: Vec::new(),
            _state: PhantomData,
        })
    }

    /// Authenticates with LOGIN.
    ///
    /// A rejection is returned as [`Error::Auth`].
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        if self.has_capability(&Capability::LoginDisabled) {
            return Err(Error::Auth("server disabled LOGIN on this connection".to_string()));
        }
        let command = Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        self.execute(&command).await.map_err(reject_as_auth)?;
        self.after_auth().await
    }

    /// Authenticates with SASL PLAIN, using an initial response when the
    /// server supports SASL-IR.
    pub async fn authenticate_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));

        if self.has_capability(&Capability::SaslIr) {
            let command = Command::Authenticate {
                mechanism: "PLAIN".to_string(),
                initial_response: Some(token),
            };
            self.execute(&command).await.map_err(reject_as_auth)?;
        } else {
            self.authenticate_with_challenge(&token).await?;
        }
        self.after_auth().await
    }

    /// AUTHENTICATE PLAIN without SASL-IR: wait for the empty challenge,
    /// answer it, then read the completion.
    async fn authenticate_with_challenge(&mut self, token: &str) -> Result<()> {
        let tag = self.tags.next_tag();
        let command = Command::Authenticate {
            mechanism: "PLAIN".to_string(),
            initial_response: None,
        };
        for segment in command.encode(&tag, self.literal_mode()) {
            self.stream.write_all(&segment).await?;
        }

        let mut answered = false;
        loop {
            let bytes = self.stream.read_response().await?;
            match ResponseParser::parse(&bytes)? {
                Response::Continuation { .. } if !answered => {
                    self.stream.write_all(format!("{token}\r\n").as_bytes()).await?;
                    answered = true;
                }
                Response::Continuation { .. } => {
                    // A second challenge means the server wants more than
                    // PLAIN sends; cancel the exchange.
                    self.stream.write_all(b"*\r\n").await?;
                }
                Response::Untagged(untagged) => self.observe(&untagged),
                Response::Tagged {
                    tag: done,
                    status,
                    code,
                    text,
                } if done == tag => {
                    if let Some(ResponseCode::Capability(caps)) = code {
                        self.capabilities = caps;
                    }
                    return match status {
                        Status::Ok => Ok(()),
                        _ => Err(Error::Auth(text)),
                    };
                }
                Response::Tagged { tag: other, .. } => {
                    return Err(Error::Protocol(format!("completion for unknown tag {other}")));
                }
            }
        }
    }

    /// Moves to the authenticated state, fetching capabilities if the
    /// server did not volunteer them.
    async fn after_auth(self) -> Result<Client<S, Authenticated>> {
        let mut client: Client<S, Authenticated> = self.with_state();
        let announced = client
            .capabilities
            .iter()
            .any(|c| matches!(c, Capability::Imap4Rev1 | Capability::Imap4Rev2));
        if !announced {
            client.refresh_capabilities().await?;
        }
        tracing::info!("authenticated");
        Ok(client)
    }

    /// Gracefully disconnects from the server.
    pub async fn logout(mut self) -> Result<()> {
        // BYE precedes the tagged OK; either way the server closes.
        let _ = self.execute(&Command::Logout).await;
        Ok(())
    }
}

impl Client<ImapStream, NotAuthenticated> {
    /// Upgrades the connection with STARTTLS.
    ///
    /// Capabilities learned before the upgrade are discarded and fetched
    /// again over TLS.
    pub async fn starttls(mut self, host: &str) -> Result<Self> {
        if !self.has_capability(&Capability::StartTls) {
            return Err(Error::InvalidState(
                "server does not offer STARTTLS".to_string(),
            ));
        }
        self.execute(&Command::StartTls).await?;

        let stream = self.stream.into_inner()?.upgrade_to_tls(host).await?;
        let mut client = Self {
            stream: FramedStream::new(stream),
            tags: self.tags,
            capabilities: Vec::new(),
            selected: None,
            enabled: Vec::new(),
            _state: PhantomData,
        };
        client.refresh_capabilities().await?;
        tracing::debug!("upgraded to TLS");
        Ok(client)
    }
}

fn reject_as_auth(error: Error) -> Error {
    match error {
        Error::No { text, .. } | Error::Bad { text, .. } => Error::Auth(text),
        other => other,
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
    use tokio_test::io::Builder;

    mod greeting_tests {
        use super::*;

        #[tokio::test]
        async fn greeting_capabilities() {
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN] hi\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            assert!(client.has_capability(&Capability::StartTls));
            assert!(client.supports_auth_plain());
        }

        #[tokio::test]
        async fn bye_greeting_is_an_error() {
            let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
            let err = Client::from_stream(mock).await.unwrap_err();
            assert!(matches!(err, Error::Bye(text) if text == "too many connections"));
        }
    }

    mod auth_tests {
        use super::*;

        #[tokio::test]
        async fn login_success_keeps_capabilities() {
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
                .write(b"A0001 LOGIN alice \"s3cret pw\"\r\n")
                .read(b"A0001 OK [CAPABILITY IMAP4rev1 IDLE CONDSTORE] logged in\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let client = client.login("alice", "s3cret pw").await.unwrap();
            assert!(client.has_capability(&Capability::CondStore));
        }

        #[tokio::test]
        async fn login_rejected_is_auth_error() {
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1] hi\r\n")
                .write(b"A0001 LOGIN alice wrong\r\n")
                .read(b"A0001 NO [AUTHENTICATIONFAILED] invalid credentials\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let err = client.login("alice", "wrong").await.unwrap_err();
            assert!(matches!(err, Error::Auth(text) if text == "invalid credentials"));
        }

        #[tokio::test]
        async fn login_disabled_refused_locally() {
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1 LOGINDISABLED STARTTLS] hi\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            assert!(matches!(
                client.login("alice", "pw").await.unwrap_err(),
                Error::Auth(_)
            ));
        }

        #[tokio::test]
        async fn plain_with_initial_response() {
            // "\0alice\0pw"
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=PLAIN] hi\r\n")
                .write(b"A0001 AUTHENTICATE PLAIN AGFsaWNlAHB3\r\n")
                .read(b"A0001 OK done\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            client.authenticate_plain("alice", "pw").await.unwrap();
        }

        #[tokio::test]
        async fn plain_with_challenge() {
            let mock = Builder::new()
                .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] hi\r\n")
                .write(b"A0001 AUTHENTICATE PLAIN\r\n")
                .read(b"+ \r\n")
                .write(b"AGFsaWNlAHB3\r\n")
                .read(b"A0001 OK done\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            client.authenticate_plain("alice", "pw").await.unwrap();
        }

        #[tokio::test]
        async fn missing_capabilities_fetched_after_auth() {
            let mock = Builder::new()
                .read(b"* OK hi\r\n")
                .write(b"A0001 LOGIN alice pw\r\n")
                .read(b"A0001 OK\r\n")
                .write(b"A0002 CAPABILITY\r\n")
                .read(b"* CAPABILITY IMAP4rev2 IDLE\r\nA0002 OK\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let client = client.login("alice", "pw").await.unwrap();
            assert!(client.has_capability(&Capability::Idle));
        }
    }
}
