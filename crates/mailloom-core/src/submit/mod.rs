//! Outgoing mail.
//!
//! [`Submitter`] hands composed messages to the submission server. A
//! transaction is retried from the start on transient failures (4xx
//! replies, lost connections) with bounded backoff; a 5xx reply or an
//! address the server cannot take ends it at once as
//! [`Error::DeliveryFailure`] carrying the server's text.

use std::future::Future;

use mailloom_mime::ComposedMessage;
use mailloom_smtp::{Address, Client, CommandState, Connected, SmtpStream};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{AccountConfig, Credentials, Endpoint, RetrySettings, Security};
use crate::{Error, Result};

/// Opens greeted submission connections.
pub trait SmtpConnector: Send + Sync + 'static {
    /// Transport type.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connects, reads the greeting and says EHLO (upgrading to TLS on the
    /// way when configured).
    fn connect(&self) -> impl Future<Output = mailloom_smtp::Result<Client<Self::Stream, Connected>>> + Send;
}

/// [`SmtpConnector`] over TCP.
#[derive(Debug, Clone)]
pub struct TcpSmtpConnector {
    endpoint: Endpoint,
    hello_name: String,
}

impl TcpSmtpConnector {
    /// Connector for `endpoint`, introducing itself as `hello_name`.
    #[must_use]
    pub fn new(endpoint: Endpoint, hello_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            hello_name: hello_name.into(),
        }
    }
}

impl SmtpConnector for TcpSmtpConnector {
    type Stream = SmtpStream;

    async fn connect(&self) -> mailloom_smtp::Result<Client<SmtpStream, Connected>> {
        let Endpoint { host, port, security } = &self.endpoint;
        match security {
            Security::Tls => {
                let stream = mailloom_smtp::connection::connect_tls(host, *port).await?;
                Client::from_stream(stream).await?.ehlo(&self.hello_name).await
            }
            Security::StartTls => {
                let stream = mailloom_smtp::connection::connect(host, *port).await?;
                Client::from_stream(stream)
                    .await?
                    .ehlo(&self.hello_name)
                    .await?
                    .starttls(host)
                    .await
            }
            Security::None => {
                let stream = mailloom_smtp::connection::connect(host, *port).await?;
                Client::from_stream(stream).await?.ehlo(&self.hello_name).await
            }
        }
    }
}

/// An accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Message-ID of the message.
    pub message_id: String,
    /// The server's acceptance text, often with a queue id.
    pub reply: String,
    /// Transactions it took.
    pub attempts: u32,
}

/// Sends messages for one account.
#[derive(Debug)]
pub struct Submitter<C> {
    connector: C,
    credentials: Option<Credentials>,
    retry: RetrySettings,
}

impl Submitter<TcpSmtpConnector> {
    /// Submitter for an account's SMTP server.
    #[must_use]
    pub fn for_account(account: &AccountConfig) -> Self {
        let hello = account.hello_name.clone().unwrap_or_else(|| "localhost".to_string());
        let credentials = account.submission_credentials();
        Self::new(
            TcpSmtpConnector::new(account.smtp.clone(), hello),
            (!credentials.username.is_empty()).then(|| credentials.clone()),
            account.retry,
        )
    }
}

impl<C: SmtpConnector> Submitter<C> {
    /// Creates a submitter. Without credentials no AUTH is attempted.
    #[must_use]
    pub const fn new(connector: C, credentials: Option<Credentials>, retry: RetrySettings) -> Self {
        Self {
            connector,
            credentials,
            retry,
        }
    }

    /// Sends `message` to its envelope recipients.
    ///
    /// # Errors
    ///
    /// [`Error::DeliveryFailure`] for a permanent rejection, which is
    /// never retried. Transient failures are retried and reported as the
    /// last error once attempts run out.
    pub async fn submit(&self, message: &ComposedMessage) -> Result<Submission> {
        let from = Address::new(message.sender.as_str())?;
        let recipients = message
            .recipients
            .iter()
            .map(|r| Address::new(r.as_str()))
            .collect::<mailloom_smtp::Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(Error::DeliveryFailure {
                code: None,
                reason: "message has no recipients".to_string(),
            });
        }

        let backoff = self.retry.backoff();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.transaction(&from, &recipients, message).await {
                Ok(reply) => {
                    tracing::info!(
                        message_id = %message.message_id,
                        recipients = recipients.len(),
                        attempts,
                        "message submitted"
                    );
                    return Ok(Submission {
                        message_id: message.message_id.clone(),
                        reply,
                        attempts,
                    });
                }
                Err(error) => {
                    let error = Error::from(error);
                    if !error.is_retryable() || !backoff.allows(attempts) {
                        tracing::warn!(message_id = %message.message_id, attempts, %error, "submission failed");
                        return Err(error);
                    }
                    let delay = backoff.delay(attempts - 1);
                    tracing::warn!(attempts, ?delay, %error, "submission failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One complete SMTP transaction. Returns the acceptance text.
    async fn transaction(
        &self,
        from: &Address,
        recipients: &[Address],
        message: &ComposedMessage,
    ) -> mailloom_smtp::Result<String> {
        let client = self.connector.connect().await?;
        let (client, reply) = match &self.credentials {
            Some(credentials) => {
                let client = client
                    .authenticate(&credentials.username, &credentials.password)
                    .await?;
                send(client, from, recipients, &message.bytes).await?
            }
            None => send(client, from, recipients, &message.bytes).await?,
        };
        if let Err(error) = client.quit().await {
            tracing::debug!(%error, "QUIT failed after acceptance");
        }
        Ok(reply.text())
    }
}

async fn send<S, State>(
    client: Client<S, State>,
    from: &Address,
    recipients: &[Address],
    bytes: &[u8],
) -> mailloom_smtp::Result<(Client<S, Connected>, mailloom_smtp::Reply)>
where
    S: AsyncRead + AsyncWrite + Unpin,
    State: CommandState,
{
    let (first, rest) = recipients
        .split_first()
        .ok_or_else(|| mailloom_smtp::Error::InvalidAddress("no recipients".into()))?;
    let mut client = client
        .mail_from(from.clone(), Some(bytes.len()), !bytes.is_ascii())
        .await?
        .rcpt_to(first.clone())
        .await?;
    for recipient in rest {
        client = client.rcpt_to(recipient.clone()).await?;
    }
    client.data().await?.send_message(bytes).await
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
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::io::{Builder, Mock};

    const GREETING: &[u8] = b"220 smtp.example.org ESMTP\r\n";

    /// Hands out one scripted connection per attempt; refuses once the
    /// scripts run out.
    struct Scripted {
        scripts: Mutex<VecDeque<Mock>>,
        opened: AtomicUsize,
    }

    impl Scripted {
        fn new(scripts: Vec<Mock>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                opened: AtomicUsize::new(0),
            }
        }
    }

    impl SmtpConnector for Scripted {
        type Stream = Mock;

        async fn connect(&self) -> mailloom_smtp::Result<Client<Mock, Connected>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(mock) => Client::from_stream(mock).await,
                None => Err(mailloom_smtp::Error::ConnectionClosed),
            }
        }
    }

    fn message(recipients: &[&str]) -> ComposedMessage {
        ComposedMessage {
            sender: "alice@example.org".to_string(),
            recipients: recipients.iter().map(|r| (*r).to_string()).collect(),
            message_id: "1@example.org".to_string(),
            bytes: b"Subject: hi\r\n\r\nhello\r\n".to_vec(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn accepted_script(recipient: &str) -> Mock {
        Builder::new()
            .read(GREETING)
            .write(b"MAIL FROM:<alice@example.org>\r\n")
            .read(b"250 ok\r\n")
            .write(format!("RCPT TO:<{recipient}>\r\n").as_bytes())
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nhello\r\n.\r\n")
            .read(b"250 2.0.0 queued as 77\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build()
    }

    #[tokio::test]
    async fn accepted_on_first_attempt() {
        let connector = Scripted::new(vec![accepted_script("bob@example.org")]);
        let submitter = Submitter::new(connector, None, fast_retry(3));
        let submission = submitter.submit(&message(&["bob@example.org"])).await.unwrap();
        assert_eq!(submission.attempts, 1);
        assert_eq!(submission.reply, "2.0.0 queued as 77");
        assert_eq!(submission.message_id, "1@example.org");
    }

    #[tokio::test]
    async fn rejected_recipient_is_not_retried() {
        let rejected = Builder::new()
            .read(GREETING)
            .write(b"MAIL FROM:<alice@example.org>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<nobody@example.org>\r\n")
            .read(b"550 5.1.1 <nobody@example.org>: user unknown\r\n")
            .build();
        let connector = Scripted::new(vec![rejected]);
        let submitter = Submitter::new(connector, None, fast_retry(5));

        let err = submitter.submit(&message(&["nobody@example.org"])).await.unwrap_err();
        match &err {
            Error::DeliveryFailure { code, reason } => {
                assert_eq!(*code, Some(550));
                assert!(reason.starts_with("550 "), "{reason}");
                assert!(reason.contains("user unknown"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.is_retryable());
        assert_eq!(submitter.connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let busy = Builder::new()
            .read(GREETING)
            .write(b"MAIL FROM:<alice@example.org>\r\n")
            .read(b"451 4.3.0 try again later\r\n")
            .build();
        let connector = Scripted::new(vec![busy, accepted_script("bob@example.org")]);
        let submitter = Submitter::new(connector, None, fast_retry(3));
        let submission = submitter.submit(&message(&["bob@example.org"])).await.unwrap();
        assert_eq!(submission.attempts, 2);
        assert_eq!(submitter.connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let submitter = Submitter::new(Scripted::new(Vec::new()), None, fast_retry(3));
        let err = submitter.submit(&message(&["bob@example.org"])).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(submitter.connector.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bad_addresses_fail_before_connecting() {
        let submitter = Submitter::new(Scripted::new(Vec::new()), None, fast_retry(3));
        let err = submitter.submit(&message(&["not an address"])).await.unwrap_err();
        assert!(matches!(err, Error::DeliveryFailure { code: None, .. }));
        let err = submitter.submit(&message(&[])).await.unwrap_err();
        assert!(matches!(err, Error::DeliveryFailure { code: None, .. }));
        assert_eq!(submitter.connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticates_when_configured() {
        let script = Builder::new()
            .read(GREETING)
            .write(b"AUTH PLAIN AGFsaWNlAHB3\r\n")
            .read(b"235 ok\r\n")
            .write(b"MAIL FROM:<alice@example.org>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<bob@example.org>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nhello\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let credentials = Credentials {
            username: "alice".to_string(),
            password: "pw".to_string(),
        };
        let submitter = Submitter::new(Scripted::new(vec![script]), Some(credentials), fast_retry(1));
        submitter.submit(&message(&["bob@example.org"])).await.unwrap();
    }
}
