//! The task that owns the connection.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::SessionConfig;
use super::connector::Connector;
use super::phase::{SessionEvent, SessionPhase};
use crate::command::Command;
use crate::connection::{Authenticated, Client, CommandOutcome, IdleEvent};
use crate::types::{Capability, SelectedMailbox};
use crate::{Error, Result};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Work sent from handles to the actor.
pub(crate) enum Request {
    Execute {
        command: Command,
        reply: Reply<CommandOutcome>,
    },
    Select {
        mailbox: String,
        read_only: bool,
        reply: Reply<SelectedMailbox>,
    },
    Capabilities {
        reply: Reply<Vec<Capability>>,
    },
    StartIdle {
        mailbox: String,
        reply: Reply<()>,
    },
    StopIdle {
        reply: Reply<()>,
    },
    Logout {
        reply: Reply<()>,
    },
}

impl Request {
    /// Fails a request that depends on the lost connection. Control
    /// requests are handed back.
    fn fail(self, reason: &str) -> Option<Self> {
        let error = || Error::ConnectionLost(reason.to_string());
        match self {
            Self::Execute { reply, .. } => {
                let _ = reply.send(Err(error()));
                None
            }
            Self::Select { reply, .. } => {
                let _ = reply.send(Err(error()));
                None
            }
            other => Some(other),
        }
    }
}

/// Why the actor stopped waiting on a watched mailbox.
enum Wake {
    /// A request arrived, or the channel closed.
    Request(Option<Request>),
    /// Watch again right away.
    Again,
    /// Pause before watching again.
    Backoff,
}

pub(crate) struct Actor<C: Connector> {
    connector: C,
    config: SessionConfig,
    requests: mpsc::Receiver<Request>,
    backlog: VecDeque<Request>,
    phase: watch::Sender<SessionPhase>,
    events: broadcast::Sender<SessionEvent>,
    client: Option<Client<C::Stream, Authenticated>>,
    idle_target: Option<String>,
    push_refused: bool,
    connected_before: bool,
}

impl<C: Connector> Actor<C> {
    pub(crate) fn new(
        connector: C,
        config: SessionConfig,
        requests: mpsc::Receiver<Request>,
        phase: watch::Sender<SessionPhase>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            connector,
            config,
            requests,
            backlog: VecDeque::new(),
            phase,
            events,
            client: None,
            idle_target: None,
            push_refused: false,
            connected_before: false,
        }
    }

    /// Serves requests until a logout or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        while let Some(request) = self.next_request().await {
            match request {
                Request::Execute { command, reply } => self.execute_batch(command, reply).await,
                Request::Select {
                    mailbox,
                    read_only,
                    reply,
                } => {
                    let result = self.select(&mailbox, read_only).await;
                    let _ = reply.send(result);
                }
                Request::Capabilities { reply } => {
                    let result = self.ensure_connected().await.and_then(|()| {
                        self.client
                            .as_ref()
                            .map(|client| client.capabilities().to_vec())
                            .ok_or_else(not_connected)
                    });
                    let _ = reply.send(result);
                }
                Request::StartIdle { mailbox, reply } => {
                    tracing::debug!(mailbox, "watching mailbox");
                    self.idle_target = Some(mailbox);
                    let _ = reply.send(Ok(()));
                }
                Request::StopIdle { reply } => {
                    self.idle_target = None;
                    let _ = reply.send(Ok(()));
                }
                Request::Logout { reply } => {
                    let result = self.logout().await;
                    let _ = reply.send(result);
                    return;
                }
            }
        }
        let _ = self.logout().await;
    }

    async fn next_request(&mut self) -> Option<Request> {
        loop {
            if let Some(request) = self.backlog.pop_front() {
                return Some(request);
            }
            let Some(mailbox) = self.idle_target.clone() else {
                return self.requests.recv().await;
            };
            match self.watch(&mailbox).await {
                Wake::Request(request) => return request,
                Wake::Again => {}
                Wake::Backoff => {
                    tokio::select! {
                        request = self.requests.recv() => return request,
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Runs `first` together with any queued commands that may share its
    /// pipeline.
    async fn execute_batch(&mut self, first: Command, reply: Reply<CommandOutcome>) {
        if let Err(error) = self.ensure_connected().await {
            let _ = reply.send(Err(error));
            return;
        }
        let Some(client) = self.client.as_mut() else {
            let _ = reply.send(Err(not_connected()));
            return;
        };

        let pipeline = self
            .config
            .pipeline
            .clone()
            .for_capabilities(client.capabilities());
        let mut commands = vec![first];
        let mut replies = vec![reply];
        loop {
            let next = match self.backlog.pop_front() {
                Some(request) => request,
                None => match self.requests.try_recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            match next {
                Request::Execute { command, reply } if pipeline.admits(commands.len(), &command) => {
                    commands.push(command);
                    replies.push(reply);
                }
                other => {
                    self.backlog.push_front(other);
                    break;
                }
            }
        }

        tracing::debug!(batch = commands.len(), "executing");
        let limit = self.config.command_timeout;
        match with_timeout(limit, client.execute_pipelined(&commands)).await {
            Ok(results) => {
                let mut lost = None;
                for (result, reply) in results.into_iter().zip(replies) {
                    if let Err(error) = &result
                        && error.is_fatal()
                        && lost.is_none()
                    {
                        lost = Some(error.to_string());
                    }
                    let _ = reply.send(result);
                }
                match lost {
                    Some(reason) => self.connection_lost(&reason),
                    None => self.settle_phase(),
                }
            }
            Err(error) => {
                let reason = error.to_string();
                let mut replies = replies.into_iter();
                if let Some(reply) = replies.next() {
                    let _ = reply.send(Err(error));
                }
                for reply in replies {
                    let _ = reply.send(Err(Error::ConnectionLost(reason.clone())));
                }
                self.connection_lost(&reason);
            }
        }
    }

    async fn select(&mut self, mailbox: &str, read_only: bool) -> Result<SelectedMailbox> {
        self.ensure_connected().await?;
        let Some(client) = self.client.as_mut() else {
            return Err(not_connected());
        };
        let condstore = client.has_capability(&Capability::CondStore);
        let limit = self.config.command_timeout;
        let result = if read_only {
            with_timeout(limit, client.examine(mailbox, condstore)).await
        } else {
            with_timeout(limit, client.select(mailbox, condstore)).await
        };
        match &result {
            Err(error) if error.is_fatal() => self.connection_lost(&error.to_string()),
            _ => self.settle_phase(),
        }
        result
    }

    /// Connects if needed, retrying transport failures on the backoff
    /// schedule. Rejected credentials are not retried.
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let backoff = self.config.backoff;
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let error = match self.connect_once().await {
                Ok(client) => {
                    tracing::info!(attempts, "session connected");
                    self.client = Some(client);
                    self.push_refused = false;
                    self.phase.send_replace(SessionPhase::Authenticated);
                    if self.connected_before {
                        let _ = self.events.send(SessionEvent::Reconnected);
                    }
                    self.connected_before = true;
                    return Ok(());
                }
                Err(error) => error,
            };

            self.phase.send_replace(SessionPhase::Disconnected);
            if error.is_command_failure() || matches!(error, Error::InvalidState(_)) {
                tracing::warn!(%error, "connection refused, not retrying");
                return Err(error);
            }
            if !backoff.allows(attempts) {
                tracing::warn!(attempts, %error, "giving up on connection");
                return Err(Error::ConnectionLost(format!(
                    "no connection after {attempts} attempts: {error}"
                )));
            }
            let delay = backoff.delay(attempts - 1);
            tracing::warn!(attempt = attempts, ?delay, %error, "connect failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(&mut self) -> Result<Client<C::Stream, Authenticated>> {
        self.phase.send_replace(SessionPhase::Connecting);
        let client = with_timeout(self.config.connect_timeout, self.connector.open()).await?;

        self.phase.send_replace(SessionPhase::Authenticating);
        let limit = self.config.command_timeout;
        let mut client = with_timeout(limit, self.connector.authenticate(client)).await?;

        if client.has_capability(&Capability::Enable) {
            let extension = if client.has_capability(&Capability::QResync) {
                Some("QRESYNC")
            } else if client.has_capability(&Capability::CondStore) {
                Some("CONDSTORE")
            } else {
                None
            };
            if let Some(extension) = extension {
                match with_timeout(limit, client.enable(&[extension])).await {
                    Ok(enabled) => tracing::debug!(?enabled, "extensions enabled"),
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => tracing::debug!(extension, %error, "ENABLE refused"),
                }
            }
        }
        Ok(client)
    }

    /// Drops the connection and fails everything queued behind it.
    fn connection_lost(&mut self, reason: &str) {
        tracing::warn!(reason, "connection lost");
        self.client = None;
        self.phase.send_replace(SessionPhase::Disconnected);
        let _ = self.events.send(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });

        let mut kept = VecDeque::new();
        while let Some(request) = self.backlog.pop_front() {
            kept.extend(request.fail(reason));
        }
        while let Ok(request) = self.requests.try_recv() {
            kept.extend(request.fail(reason));
        }
        self.backlog = kept;
    }

    fn settle_phase(&self) {
        let next = match &self.client {
            None => SessionPhase::Disconnected,
            Some(client) => match client.selected() {
                Some(mailbox) => SessionPhase::Selected(mailbox.to_string()),
                None => SessionPhase::Authenticated,
            },
        };
        self.phase.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Keeps `mailbox` selected and reports its changes until a request
    /// arrives.
    async fn watch(&mut self, mailbox: &str) -> Wake {
        if let Err(error) = self.ensure_connected().await {
            tracing::warn!(mailbox, %error, "cannot watch mailbox");
            return Wake::Backoff;
        }
        let reselect = self
            .client
            .as_ref()
            .is_some_and(|client| client.selected() != Some(mailbox));
        if reselect && let Err(error) = self.select(mailbox, true).await {
            tracing::warn!(mailbox, %error, "cannot open watched mailbox");
            return Wake::Backoff;
        }

        let push = !self.push_refused
            && self
                .client
                .as_ref()
                .is_some_and(|client| client.has_capability(&Capability::Idle));
        if push {
            self.push(mailbox).await
        } else {
            self.poll(mailbox).await
        }
    }

    async fn push(&mut self, mailbox: &str) -> Wake {
        let Some(client) = self.client.as_mut() else {
            return Wake::Again;
        };
        let (wake, status) = idle_session(
            client,
            &mut self.requests,
            &self.events,
            &self.phase,
            mailbox,
            &self.config,
        )
        .await;
        match status {
            Ok(()) => self.settle_phase(),
            Err(error) if error.is_fatal() => self.connection_lost(&error.to_string()),
            Err(error) => {
                tracing::info!(mailbox, %error, "IDLE refused, polling instead");
                self.push_refused = true;
                self.settle_phase();
            }
        }
        wake
    }

    async fn poll(&mut self, mailbox: &str) -> Wake {
        tokio::select! {
            request = self.requests.recv() => return Wake::Request(request),
            () = tokio::time::sleep(self.config.poll_interval) => {}
        }
        let Some(client) = self.client.as_mut() else {
            return Wake::Again;
        };
        match with_timeout(self.config.command_timeout, client.noop()).await {
            Ok(outcome) => {
                for untagged in outcome.untagged {
                    publish(&self.events, mailbox, IdleEvent::from_untagged(untagged));
                }
                Wake::Again
            }
            Err(error) if error.is_fatal() => {
                self.connection_lost(&error.to_string());
                Wake::Backoff
            }
            Err(error) => {
                tracing::warn!(mailbox, %error, "NOOP failed");
                Wake::Backoff
            }
        }
    }

    async fn logout(&mut self) -> Result<()> {
        self.idle_target = None;
        let result = match self.client.take() {
            Some(client) => with_timeout(self.config.command_timeout, client.logout()).await,
            None => Ok(()),
        };
        self.phase.send_replace(SessionPhase::Disconnected);
        tracing::info!("session closed");
        result
    }
}

/// One IDLE round: enter, forward events until something needs the
/// connection, leave. Returns the wake reason even when leaving failed so
/// a received request is never lost.
async fn idle_session<S>(
    client: &mut Client<S, Authenticated>,
    requests: &mut mpsc::Receiver<Request>,
    events: &broadcast::Sender<SessionEvent>,
    phase: &watch::Sender<SessionPhase>,
    mailbox: &str,
    config: &SessionConfig,
) -> (Wake, Result<()>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handle = match with_timeout(config.command_timeout, client.idle()).await {
        Ok(handle) => handle,
        Err(error) => return (Wake::Backoff, Err(error)),
    };
    phase.send_replace(SessionPhase::Idle(mailbox.to_string()));

    let renew_at = Instant::now() + config.idle_refresh;
    let wake = loop {
        tokio::select! {
            event = handle.wait() => match event {
                Ok(IdleEvent::Ended) => break Wake::Again,
                Ok(event) => publish(events, mailbox, event),
                Err(error) => return (Wake::Backoff, Err(error)),
            },
            request = requests.recv() => break Wake::Request(request),
            () = tokio::time::sleep_until(renew_at) => {
                tracing::debug!(mailbox, "renewing IDLE");
                break Wake::Again;
            }
        }
    };

    match with_timeout(config.command_timeout, handle.done()).await {
        Ok(leftover) => {
            for event in leftover {
                publish(events, mailbox, event);
            }
            (wake, Ok(()))
        }
        Err(error) => (wake, Err(error)),
    }
}

fn publish(events: &broadcast::Sender<SessionEvent>, mailbox: &str, event: IdleEvent) {
    let mailbox = mailbox.to_string();
    let event = match event {
        IdleEvent::Exists(count) => SessionEvent::Exists { mailbox, count },
        IdleEvent::Expunge(seq) => SessionEvent::Expunge { mailbox, seq },
        IdleEvent::Fetch {
            seq,
            uid,
            flags: Some(flags),
            modseq,
        } => SessionEvent::FlagsChanged {
            mailbox,
            seq,
            uid,
            flags,
            modseq,
        },
        IdleEvent::Vanished(uids) => SessionEvent::Vanished { mailbox, uids },
        IdleEvent::Fetch { .. } | IdleEvent::Recent(_) | IdleEvent::Ended | IdleEvent::Other => {
            return;
        }
    };
    tracing::debug!(?event, "mailbox changed");
    // No subscribers is fine.
    let _ = events.send(event);
}

/// Bounds a connection operation. Running out of time counts as a lost
/// connection.
async fn with_timeout<T>(limit: Duration, operation: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, operation)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(limit)))
}

fn not_connected() -> Error {
    Error::ConnectionLost("not connected".to_string())
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
    use crate::types::{Flag, Flags, SeqNum};

    #[tokio::test]
    async fn timeout_is_connection_loss() {
        let error = with_timeout(Duration::from_millis(5), std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
        assert!(error.is_connection_lost());
    }

    #[test]
    fn fetch_without_flags_is_not_published() {
        let (events, mut rx) = broadcast::channel(4);
        publish(
            &events,
            "INBOX",
            IdleEvent::Fetch {
                seq: SeqNum::new(1).unwrap(),
                uid: None,
                flags: None,
                modseq: Some(3),
            },
        );
        publish(&events, "INBOX", IdleEvent::Exists(7));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Exists {
                mailbox: "INBOX".to_string(),
                count: 7
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn flag_change_is_published() {
        let (events, mut rx) = broadcast::channel(4);
        let mut flags = Flags::new();
        flags.insert(Flag::Seen);
        publish(
            &events,
            "Work",
            IdleEvent::Fetch {
                seq: SeqNum::new(2).unwrap(),
                uid: None,
                flags: Some(flags),
                modseq: None,
            },
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::FlagsChanged { mailbox, .. } if mailbox == "Work"
        ));
    }

    #[test]
    fn queued_data_requests_fail_on_loss() {
        let (reply, mut response) = oneshot::channel();
        let request = Request::Execute {
            command: Command::Noop,
            reply,
        };
        assert!(request.fail("gone").is_none());
        assert!(matches!(
            response.try_recv().unwrap(),
            Err(Error::ConnectionLost(reason)) if reason == "gone"
        ));

        let (reply, _response) = oneshot::channel();
        let control = Request::StopIdle { reply };
        assert!(control.fail("gone").is_some());
    }
}
