//! Type-state SMTP client.

use std::collections::HashSet;
use std::marker::PhantomData;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// Longest reply line accepted.
const MAX_LINE: usize = 4096;
/// Most lines accepted in one reply.
const MAX_REPLY_LINES: usize = 256;

/// Greeted; EHLO may or may not have been sent.
#[derive(Debug)]
pub struct Connected;

/// AUTH succeeded.
#[derive(Debug)]
pub struct Authenticated;

/// MAIL FROM accepted.
#[derive(Debug)]
pub struct MailTransaction;

/// At least one RCPT TO accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// DATA accepted; the message may be sent.
#[derive(Debug)]
pub struct Data;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Connected {}
    impl Sealed for super::Authenticated {}
}

/// States in which a mail transaction may begin.
pub trait CommandState: sealed::Sealed {}
impl CommandState for Connected {}
impl CommandState for Authenticated {}

/// SMTP client over any byte stream.
pub struct Client<S, State> {
    stream: BufReader<S>,
    server_info: ServerInfo,
    client_hostname: String,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

/// Access to what the server announced, in any state.
pub trait SmtpConnection {
    /// Greeting hostname and EHLO extensions.
    fn server_info(&self) -> &ServerInfo;
}

impl<S, State> SmtpConnection for Client<S, State> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl<S> Client<S, Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the 220 greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SmtpError`] when the server greets with anything
    /// but 220 (e.g. `554 no service`).
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            server_info: ServerInfo::default(),
            client_hostname: String::new(),
            _state: PhantomData,
        };
        let greeting = client.read_reply().await?.expect_code(ReplyCode::SERVICE_READY)?;
        client.server_info.hostname = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %client.server_info.hostname, "smtp greeting");
        Ok(client)
    }

    /// Sends EHLO and records the extensions. Servers that reject EHLO
    /// get HELO instead, with no extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are rejected.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.client_hostname = client_hostname.to_string();
        let reply = self
            .send_command(&Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }
        if !matches!(reply.code, ReplyCode::SYNTAX_ERROR | ReplyCode::NOT_IMPLEMENTED) {
            return Err(reply.into_error());
        }

        tracing::debug!("EHLO rejected, falling back to HELO");
        self.send_command(&Command::Helo {
            hostname: client_hostname.to_string(),
        })
        .await?
        .expect_success()?;
        self.server_info.extensions = HashSet::new();
        Ok(self)
    }

    /// Authenticates with the best mechanism both sides support: PLAIN,
    /// else LOGIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] when the server offers neither, and
    /// the server's rejection otherwise.
    pub async fn authenticate(self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        let mechanisms = self.server_info.auth_mechanisms();
        if mechanisms.contains(&AuthMechanism::Plain) || mechanisms.is_empty() {
            self.auth_plain(username, password).await
        } else if mechanisms.contains(&AuthMechanism::Login) {
            self.auth_login(username, password).await
        } else {
            Err(Error::NotSupported("AUTH PLAIN or LOGIN".into()))
        }
    }

    /// AUTH PLAIN with an initial response.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection (typically 535).
    pub async fn auth_plain(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        self.send_command(&Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(token),
        })
        .await?
        .expect_code(ReplyCode::AUTH_OK)?;
        tracing::debug!("smtp authenticated");
        Ok(self.with_state())
    }

    /// AUTH LOGIN: username and password each answer a 334 challenge.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection.
    pub async fn auth_login(mut self, username: &str, password: &str) -> Result<Client<S, Authenticated>> {
        self.send_command(&Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        })
        .await?
        .expect_code(ReplyCode::AUTH_CONTINUE)?;
        self.send_line(&STANDARD.encode(username))
            .await?
            .expect_code(ReplyCode::AUTH_CONTINUE)?;
        self.send_line(&STANDARD.encode(password))
            .await?
            .expect_code(ReplyCode::AUTH_OK)?;
        tracing::debug!("smtp authenticated");
        Ok(self.with_state())
    }
}

impl Client<SmtpStream, Connected> {
    /// Upgrades to TLS and repeats EHLO, as the extensions may change.
    ///
    /// # Errors
    ///
    /// Fails when STARTTLS is not offered or refused, when the server sent
    /// data ahead of the handshake, or when the handshake fails.
    pub async fn starttls(mut self, server_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        self.send_command(&Command::StartTls)
            .await?
            .expect_code(ReplyCode::SERVICE_READY)?;
        if !self.stream.buffer().is_empty() {
            return Err(Error::Protocol("data received before TLS handshake".into()));
        }

        let stream = self.stream.into_inner().upgrade_to_tls(server_hostname).await?;
        let client = Self {
            stream: BufReader::new(stream),
            server_info: ServerInfo {
                hostname: self.server_info.hostname,
                extensions: HashSet::new(),
            },
            client_hostname: String::new(),
            _state: PhantomData,
        };
        tracing::debug!("smtp upgraded to TLS");
        client.ehlo(&self.client_hostname).await
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
    State: CommandState,
{
    /// Starts a transaction.
    ///
    /// `size` is declared when the server supports SIZE and checked
    /// against its limit; `eight_bit` requests `BODY=8BITMIME` when
    /// offered. A non-ASCII sender needs SMTPUTF8.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] or [`Error::NotSupported`]
    /// before sending anything, or the server's rejection.
    pub async fn mail_from(
        mut self,
        from: Address,
        size: Option<usize>,
        eight_bit: bool,
    ) -> Result<Client<S, MailTransaction>> {
        if let (Some(size), Some(limit)) = (size, self.server_info.max_message_size())
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }
        let utf8 = !from.is_ascii();
        if utf8 && !self.server_info.supports(&Extension::SmtpUtf8) {
            return Err(Error::NotSupported("SMTPUTF8".into()));
        }
        let declares_size = self
            .server_info
            .extensions
            .iter()
            .any(|e| matches!(e, Extension::Size(_)));
        let command = Command::MailFrom {
            from,
            eight_bit: eight_bit && self.server_info.supports(&Extension::EightBitMime),
            size: size.filter(|_| declares_size),
            utf8,
        };
        self.send_command(&command).await?.expect_success()?;
        Ok(self.with_state())
    }
}

impl<S> Client<S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds the first recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection, e.g. `550 5.1.1 user unknown`.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<S, RecipientAdded>> {
        self.send_command(&Command::RcptTo { to }).await?.expect_success()?;
        Ok(self.with_state())
    }
}

impl<S> Client<S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Adds another recipient.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.send_command(&Command::RcptTo { to }).await?.expect_success()?;
        Ok(self)
    }

    /// Sends DATA.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers 354.
    pub async fn data(mut self) -> Result<Client<S, Data>> {
        self.send_command(&Command::Data)
            .await?
            .expect_code(ReplyCode::START_DATA)?;
        Ok(self.with_state())
    }
}

impl<S> Client<S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the message and the terminating `.` and waits for acceptance.
    ///
    /// Line endings are normalized to CRLF and lines starting with `.` are
    /// dot-stuffed. The server keeps any authentication for the next
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection of the message.
    pub async fn send_message(mut self, message: &[u8]) -> Result<(Client<S, Connected>, Reply)> {
        let payload = dot_stuff(message);
        tracing::debug!(bytes = payload.len(), "sending message data");
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        let reply = self.read_reply().await?.expect_success()?;
        Ok((self.with_state(), reply))
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn with_state<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_hostname: self.client_hostname,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, command: &Command) -> Result<Reply> {
        tracing::debug!(command = command.verb(), "smtp command");
        self.stream.write_all(&command.serialize()).await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    async fn send_line(&mut self, line: &str) -> Result<Reply> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
            if line.len() > MAX_LINE || lines.len() >= MAX_REPLY_LINES {
                return Err(Error::Protocol("reply too long".into()));
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.is_empty() {
                continue;
            }
            let last = is_last_reply_line(&line);
            lines.push(line);
            if last {
                break;
            }
        }
        let reply = parse_reply(&lines)?;
        tracing::debug!(code = reply.code.as_u16(), "smtp reply");
        Ok(reply)
    }

    /// Sends QUIT. Available in every state.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn quit(mut self) -> Result<()> {
        self.send_command(&Command::Quit).await?.expect_success()?;
        Ok(())
    }
}

fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    // The first line repeats the server's name.
    reply.lines.iter().skip(1).map(|line| Extension::parse(line)).collect()
}

/// Normalizes line endings to CRLF, dot-stuffs and appends the `.`
/// terminator.
#[must_use]
pub fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    if !message.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b".\r\n");
    out
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

    const GREETING: &[u8] = b"220 mx.example.org ESMTP ready\r\n";

    mod handshake_tests {
        use super::*;

        #[tokio::test]
        async fn ehlo_records_extensions() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO client.test\r\n")
                .read(b"250-mx.example.org\r\n250-SIZE 1000\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            assert_eq!(client.server_info().hostname, "mx.example.org");
            let client = client.ehlo("client.test").await.unwrap();
            let info = client.server_info();
            assert_eq!(info.max_message_size(), Some(1000));
            assert!(info.supports(&Extension::EightBitMime));
            assert_eq!(info.auth_mechanisms(), vec![AuthMechanism::Plain, AuthMechanism::Login]);
        }

        #[tokio::test]
        async fn helo_fallback() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO client.test\r\n")
                .read(b"502 command not implemented\r\n")
                .write(b"HELO client.test\r\n")
                .read(b"250 mx.example.org\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let client = client.ehlo("client.test").await.unwrap();
            assert!(client.server_info().extensions.is_empty());
        }

        #[tokio::test]
        async fn refused_greeting() {
            let mock = Builder::new().read(b"554 no service here\r\n").build();
            let err = Client::from_stream(mock).await.unwrap_err();
            assert!(err.is_permanent());
            assert_eq!(err.to_string(), "554 no service here");
        }

        #[tokio::test]
        async fn eof_is_connection_closed() {
            let mock = Builder::new().read(b"220-partial\r\n").build();
            let err = Client::from_stream(mock).await.unwrap_err();
            assert!(matches!(err, Error::ConnectionClosed));
        }
    }

    mod auth_tests {
        use super::*;

        #[tokio::test]
        async fn plain() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO c\r\n")
                .read(b"250-mx\r\n250 AUTH PLAIN\r\n")
                .write(b"AUTH PLAIN AGFsaWNlAHB3\r\n")
                .read(b"235 2.7.0 accepted\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap().ehlo("c").await.unwrap();
            client.authenticate("alice", "pw").await.unwrap();
        }

        #[tokio::test]
        async fn login_when_plain_missing() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO c\r\n")
                .read(b"250-mx\r\n250 AUTH LOGIN\r\n")
                .write(b"AUTH LOGIN\r\n")
                .read(b"334 VXNlcm5hbWU6\r\n")
                .write(b"YWxpY2U=\r\n")
                .read(b"334 UGFzc3dvcmQ6\r\n")
                .write(b"cHc=\r\n")
                .read(b"235 ok\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap().ehlo("c").await.unwrap();
            client.authenticate("alice", "pw").await.unwrap();
        }

        #[tokio::test]
        async fn rejected_credentials() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"AUTH PLAIN AGFsaWNlAHB3\r\n")
                .read(b"535 5.7.8 bad credentials\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let err = client.auth_plain("alice", "pw").await.unwrap_err();
            assert_eq!(err.code(), Some(535));
        }
    }

    mod transaction_tests {
        use super::*;

        #[tokio::test]
        async fn full_transaction() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"MAIL FROM:<a@example.org>\r\n")
                .read(b"250 ok\r\n")
                .write(b"RCPT TO:<b@example.org>\r\n")
                .read(b"250 ok\r\n")
                .write(b"RCPT TO:<c@example.org>\r\n")
                .read(b"251 will forward\r\n")
                .write(b"DATA\r\n")
                .read(b"354 go ahead\r\n")
                .write(b"Subject: x\r\n\r\n..hidden dot\r\n.\r\n")
                .read(b"250 2.0.0 queued as 1234\r\n")
                .write(b"QUIT\r\n")
                .read(b"221 bye\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let client = client
                .mail_from(Address::new("a@example.org").unwrap(), Some(10), false)
                .await
                .unwrap()
                .rcpt_to(Address::new("b@example.org").unwrap())
                .await
                .unwrap()
                .rcpt_to(Address::new("c@example.org").unwrap())
                .await
                .unwrap()
                .data()
                .await
                .unwrap();
            let (client, reply) = client.send_message(b"Subject: x\n\n.hidden dot\n").await.unwrap();
            assert_eq!(reply.text(), "2.0.0 queued as 1234");
            client.quit().await.unwrap();
        }

        #[tokio::test]
        async fn rejected_recipient_keeps_server_text() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"MAIL FROM:<a@example.org>\r\n")
                .read(b"250 ok\r\n")
                .write(b"RCPT TO:<nobody@example.org>\r\n")
                .read(b"550 5.1.1 <nobody@example.org>: user unknown\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap();
            let err = client
                .mail_from(Address::new("a@example.org").unwrap(), None, false)
                .await
                .unwrap()
                .rcpt_to(Address::new("nobody@example.org").unwrap())
                .await
                .unwrap_err();
            assert!(err.is_permanent());
            assert_eq!(err.to_string(), "550 5.1.1 <nobody@example.org>: user unknown");
        }

        #[tokio::test]
        async fn size_limit_checked_before_sending() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO c\r\n")
                .read(b"250-mx\r\n250 SIZE 100\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap().ehlo("c").await.unwrap();
            let err = client
                .mail_from(Address::new("a@example.org").unwrap(), Some(500), false)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MessageTooLarge { size: 500, limit: 100 }));
        }

        #[tokio::test]
        async fn size_and_body_declared_when_offered() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"EHLO c\r\n")
                .read(b"250-mx\r\n250-8BITMIME\r\n250 SIZE\r\n")
                .write(b"MAIL FROM:<a@example.org> BODY=8BITMIME SIZE=42\r\n")
                .read(b"250 ok\r\n")
                .build();
            let client = Client::from_stream(mock).await.unwrap().ehlo("c").await.unwrap();
            client
                .mail_from(Address::new("a@example.org").unwrap(), Some(42), true)
                .await
                .unwrap();
        }
    }

    mod dot_stuff_tests {
        use super::*;

        #[test]
        fn normalizes_and_terminates() {
            assert_eq!(dot_stuff(b"a\nb\r\n"), b"a\r\nb\r\n.\r\n");
            assert_eq!(dot_stuff(b"a"), b"a\r\n.\r\n");
            assert_eq!(dot_stuff(b""), b".\r\n");
        }

        #[test]
        fn leading_dots_doubled() {
            assert_eq!(dot_stuff(b".\n..x\ny.\n"), b"..\r\n...x\r\ny.\r\n.\r\n");
        }
    }
}
