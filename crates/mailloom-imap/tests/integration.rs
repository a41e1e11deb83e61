//! Session tests against an in-process fake server.
//!
//! Each connection the session opens is served by a scripted server task
//! over a `tokio::io::duplex` pipe, so reconnects, drops and stalls can be
//! staged per connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use mailloom_imap::session::{Backoff, Connector, SessionConfig, SessionEvent, SessionHandle};
use mailloom_imap::{
    Authenticated, Client, Error, Flag, NotAuthenticated, Result, SearchCriteria, SessionPhase,
    StoreAction, Uid, UidSet, UidValidity,
};

const WAIT: Duration = Duration::from_secs(5);

/// How one fake connection behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    DropOnSearch,
    HangOnSearch,
    RejectLogin,
    NoIdle,
}

#[derive(Clone)]
struct FakeConnector {
    opened: Arc<AtomicUsize>,
    modes: Vec<Mode>,
}

impl FakeConnector {
    fn new(modes: &[Mode]) -> Self {
        Self {
            opened: Arc::new(AtomicUsize::new(0)),
            modes: modes.to_vec(),
        }
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    async fn open(&self) -> Result<Client<DuplexStream, NotAuthenticated>> {
        let index = self.opened.fetch_add(1, Ordering::SeqCst);
        let mode = self.modes.get(index).copied().unwrap_or(Mode::Normal);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, mode));
        Client::from_stream(client).await
    }

    async fn authenticate(
        &self,
        client: Client<DuplexStream, NotAuthenticated>,
    ) -> Result<Client<DuplexStream, Authenticated>> {
        client.login("alice", "pw").await
    }
}

/// Connector whose transport never comes up.
#[derive(Clone, Default)]
struct RefusingConnector {
    attempts: Arc<AtomicUsize>,
}

impl Connector for RefusingConnector {
    type Stream = DuplexStream;

    async fn open(&self) -> Result<Client<DuplexStream, NotAuthenticated>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )))
    }

    async fn authenticate(
        &self,
        client: Client<DuplexStream, NotAuthenticated>,
    ) -> Result<Client<DuplexStream, Authenticated>> {
        client.login("alice", "pw").await
    }
}

async fn serve(stream: DuplexStream, mode: Mode) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let caps = if mode == Mode::NoIdle {
        "IMAP4rev1"
    } else {
        "IMAP4rev1 IDLE"
    };
    if write
        .write_all(format!("* OK [CAPABILITY {caps}] fake ready\r\n").as_bytes())
        .await
        .is_err()
    {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let (tag, command) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let command = command.to_ascii_uppercase();

        let reply = if command.starts_with("LOGIN") {
            if mode == Mode::RejectLogin {
                format!("{tag} NO [AUTHENTICATIONFAILED] bad password\r\n")
            } else {
                format!("{tag} OK [CAPABILITY {caps}] welcome\r\n")
            }
        } else if command.starts_with("SELECT") || command.starts_with("EXAMINE") {
            format!(
                "* 3 EXISTS\r\n* OK [UIDVALIDITY 7] ok\r\n* OK [UIDNEXT 4] ok\r\n{tag} OK [READ-WRITE] selected\r\n"
            )
        } else if command.starts_with("UID SEARCH") {
            match mode {
                Mode::DropOnSearch => return,
                Mode::HangOnSearch => std::future::pending::<String>().await,
                _ => format!("* SEARCH 1 2 3\r\n{tag} OK searched\r\n"),
            }
        } else if command.starts_with("UID STORE") {
            format!("* 2 FETCH (UID 2 FLAGS (\\Seen \\Flagged))\r\n{tag} OK stored\r\n")
        } else if command.starts_with("NOOP") {
            if mode == Mode::NoIdle {
                format!("* 5 EXISTS\r\n{tag} OK\r\n")
            } else {
                format!("{tag} OK\r\n")
            }
        } else if command == "IDLE" {
            if write
                .write_all(b"+ idling\r\n* 4 EXISTS\r\n")
                .await
                .is_err()
            {
                return;
            }
            match lines.next_line().await {
                Ok(Some(done)) if done.eq_ignore_ascii_case("DONE") => {
                    format!("{tag} OK idle done\r\n")
                }
                _ => return,
            }
        } else if command.starts_with("LOGOUT") {
            let _ = write
                .write_all(format!("* BYE bye\r\n{tag} OK\r\n").as_bytes())
                .await;
            return;
        } else {
            format!("{tag} BAD unknown command\r\n")
        };

        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn quick_config() -> SessionConfig {
    SessionConfig::default()
        .command_timeout(Duration::from_secs(2))
        .backoff(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            3,
        ))
        .poll_interval(Duration::from_millis(50))
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn select_and_search() {
    let connector = FakeConnector::new(&[]);
    let session = SessionHandle::spawn(connector.clone(), quick_config());
    assert_eq!(session.phase(), SessionPhase::Disconnected);

    let inbox = session.select("INBOX").await.unwrap();
    assert_eq!(inbox.exists, 3);
    assert_eq!(inbox.uid_validity, UidValidity::new(7));
    assert_eq!(session.phase(), SessionPhase::Selected("INBOX".to_string()));

    let found = session.uid_search(SearchCriteria::All).await.unwrap();
    assert_eq!(
        found.uids,
        vec![Uid::new(1).unwrap(), Uid::new(2).unwrap(), Uid::new(3).unwrap()]
    );
    assert_eq!(connector.opened(), 1);

    session.logout().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test]
async fn store_returns_new_flags() {
    let session = SessionHandle::spawn(FakeConnector::new(&[]), quick_config());
    session.select("INBOX").await.unwrap();

    let stored = session
        .uid_store(
            &UidSet::single(Uid::new(2).unwrap()),
            StoreAction::add(vec![Flag::Flagged]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(stored.messages.len(), 1);
    assert_eq!(stored.messages[0].uid, Uid::new(2).unwrap());
    let flags = stored.messages[0].flags.clone().unwrap();
    assert!(flags.is_flagged() && flags.is_seen());
    assert_eq!(stored.modified, None);
}

#[tokio::test]
async fn concurrent_requests_share_one_connection() {
    let connector = FakeConnector::new(&[]);
    let session = SessionHandle::spawn(connector.clone(), quick_config());
    session.select("INBOX").await.unwrap();

    let (a, b, c, d) = tokio::join!(
        session.uid_search(SearchCriteria::All),
        session.noop(),
        session.uid_search(SearchCriteria::Unseen),
        session.noop(),
    );
    assert_eq!(a.unwrap().uids.len(), 3);
    assert!(b.is_ok());
    assert_eq!(c.unwrap().uids.len(), 3);
    assert!(d.is_ok());
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn dropped_connection_fails_request_then_reconnects() {
    let connector = FakeConnector::new(&[Mode::DropOnSearch]);
    let session = SessionHandle::spawn(connector.clone(), quick_config());
    let mut events = session.subscribe();

    session.select("INBOX").await.unwrap();
    let error = session.uid_search(SearchCriteria::All).await.unwrap_err();
    assert!(error.is_connection_lost(), "{error:?}");
    assert!(matches!(next_event(&mut events).await, SessionEvent::Disconnected { .. }));
    assert_eq!(session.phase(), SessionPhase::Disconnected);

    session.select("INBOX").await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Reconnected);
    assert_eq!(session.uid_search(SearchCriteria::All).await.unwrap().uids.len(), 3);
    assert_eq!(connector.opened(), 2);
}

#[tokio::test]
async fn stalled_command_times_out_as_connection_loss() {
    let connector = FakeConnector::new(&[Mode::HangOnSearch]);
    let config = quick_config().command_timeout(Duration::from_millis(200));
    let session = SessionHandle::spawn(connector.clone(), config);

    session.select("INBOX").await.unwrap();
    let error = session.uid_search(SearchCriteria::All).await.unwrap_err();
    assert!(matches!(error, Error::Timeout(_)));
    assert!(error.is_connection_lost());

    session.select("INBOX").await.unwrap();
    assert_eq!(connector.opened(), 2);
}

#[tokio::test]
async fn connect_failures_exhaust_backoff() {
    let connector = RefusingConnector::default();
    let session = SessionHandle::spawn(connector.clone(), quick_config());

    let error = session.select("INBOX").await.unwrap_err();
    assert!(matches!(&error, Error::ConnectionLost(reason) if reason.contains("3 attempts")));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test]
async fn rejected_login_is_not_retried() {
    let connector = FakeConnector::new(&[Mode::RejectLogin]);
    let session = SessionHandle::spawn(connector.clone(), quick_config());

    let error = session.capabilities().await.unwrap_err();
    assert!(matches!(error, Error::Auth(_)));
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn idle_pushes_changes_and_yields_to_requests() {
    let connector = FakeConnector::new(&[]);
    let session = SessionHandle::spawn(connector.clone(), quick_config());
    let mut events = session.subscribe();
    let mut phase = session.watch_phase();

    session.start_idle("INBOX").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Exists {
            mailbox: "INBOX".to_string(),
            count: 4
        }
    );
    tokio::time::timeout(WAIT, phase.wait_for(|p| matches!(p, SessionPhase::Idle(_))))
        .await
        .unwrap()
        .unwrap();

    // Served between two IDLE rounds.
    let found = tokio::time::timeout(WAIT, session.uid_search(SearchCriteria::All))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.uids.len(), 3);

    session.stop_idle().await.unwrap();
    assert_eq!(connector.opened(), 1);
}

#[tokio::test]
async fn polls_when_server_lacks_idle() {
    let connector = FakeConnector::new(&[Mode::NoIdle]);
    let session = SessionHandle::spawn(connector, quick_config());
    let mut events = session.subscribe();

    session.start_idle("INBOX").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Exists {
            mailbox: "INBOX".to_string(),
            count: 5
        }
    );
    session.logout().await.unwrap();
}

#[tokio::test]
async fn handles_fail_after_logout() {
    let session = SessionHandle::spawn(FakeConnector::new(&[]), quick_config());
    session.noop().await.unwrap();
    session.logout().await.unwrap();

    let error = session.noop().await.unwrap_err();
    assert!(matches!(error, Error::ConnectionLost(_)));
}

#[tokio::test]
async fn selection_commands_are_refused_through_execute() {
    let session = SessionHandle::spawn(FakeConnector::new(&[]), quick_config());
    let error = session
        .execute(mailloom_imap::Command::Close)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::InvalidState(_)));
}
