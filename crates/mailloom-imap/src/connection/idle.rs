//! IMAP IDLE command support (RFC 2177).
//!
//! While idling the server pushes untagged updates for the selected
//! mailbox. [`IdleHandle::wait`] is cancel-safe, so it can race other
//! futures in `tokio::select!` and be dropped without losing data.

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};

use super::client::{Authenticated, Client};
use super::framed::FramedStream;
use crate::command::Command;
use crate::parser::{FetchItem, Response, ResponseParser, UntaggedResponse};
use crate::types::{Flags, SeqNum, Status, Tag, Uid, UidSet};
use crate::{Error, Result};

/// Event received during IDLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    /// New message count.
    Exists(u32),
    /// A message was expunged.
    Expunge(SeqNum),
    /// Message attributes changed.
    Fetch {
        /// Message sequence number.
        seq: SeqNum,
        /// UID, when the server includes it.
        uid: Option<Uid>,
        /// New flags, when included.
        flags: Option<Flags>,
        /// New mod-sequence, when included.
        modseq: Option<u64>,
    },
    /// UIDs expunged (QRESYNC).
    Vanished(UidSet),
    /// Recent count changed.
    Recent(u32),
    /// The server completed the IDLE on its own.
    Ended,
    /// Untagged data with no meaning for the mailbox view.
    Other,
}

impl IdleEvent {
    /// Maps unsolicited untagged data to an event.
    ///
    /// Also used for NOOP polling, so both notification paths agree.
    #[must_use]
    pub fn from_untagged(response: UntaggedResponse) -> Self {
        match response {
            UntaggedResponse::Exists(n) => Self::Exists(n),
            UntaggedResponse::Recent(n) => Self::Recent(n),
            UntaggedResponse::Expunge(seq) => Self::Expunge(seq),
            UntaggedResponse::Vanished { uids, .. } => Self::Vanished(uids),
            UntaggedResponse::Fetch { seq, items } => {
                let mut uid = None;
                let mut flags = None;
                let mut modseq = None;
                for item in items {
                    match item {
                        FetchItem::Uid(u) => uid = Some(u),
                        FetchItem::Flags(f) => flags = Some(f),
                        FetchItem::ModSeq(m) => modseq = Some(m),
                        _ => {}
                    }
                }
                Self::Fetch {
                    seq,
                    uid,
                    flags,
                    modseq,
                }
            }
            _ => Self::Other,
        }
    }
}

/// Handle for an active IDLE.
///
/// Holds the connection until [`IdleHandle::done`] is called. Dropping the
/// handle without `done` leaves the server idling; the connection must
/// then be discarded.
pub struct IdleHandle<'a, S> {
    stream: &'a mut FramedStream<S>,
    tag: Tag,
    pending: VecDeque<IdleEvent>,
    ended: bool,
}

impl<S> std::fmt::Debug for IdleHandle<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleHandle")
            .field("tag", &self.tag)
            .field("pending", &self.pending.len())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl<S> IdleHandle<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Waits for the next server event.
    ///
    /// Cancel-safe. After [`IdleEvent::Ended`] no further events arrive.
    pub async fn wait(&mut self) -> Result<IdleEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        if self.ended {
            return Ok(IdleEvent::Ended);
        }
        let bytes = self.stream.read_response().await?;
        let event = self.interpret(ResponseParser::parse(&bytes)?)?;
        tracing::debug!(?event, "idle event");
        Ok(event)
    }

    fn interpret(&mut self, response: Response) -> Result<IdleEvent> {
        match response {
            Response::Untagged(UntaggedResponse::Bye { text, .. }) => Err(Error::Bye(text)),
            Response::Untagged(untagged) => Ok(IdleEvent::from_untagged(untagged)),
            Response::Continuation { .. } => Err(Error::Protocol(
                "unexpected continuation during IDLE".to_string(),
            )),
            Response::Tagged {
                tag, status, text, ..
            } if tag == self.tag => {
                self.ended = true;
                match status {
                    Status::Ok => Ok(IdleEvent::Ended),
                    _ => Err(Error::Protocol(format!("IDLE terminated: {text}"))),
                }
            }
            Response::Tagged { tag, .. } => Err(Error::Protocol(format!(
                "unexpected tag {tag} during IDLE"
            ))),
        }
    }

    /// Leaves IDLE by sending DONE and waiting for the completion.
    ///
    /// Returns events that arrived in the meantime.
    pub async fn done(mut self) -> Result<Vec<IdleEvent>> {
        let mut events: Vec<IdleEvent> = self.pending.drain(..).collect();
        if self.ended {
            return Ok(events);
        }

        for segment in Command::Done.encode(&self.tag, crate::command::LiteralMode::default()) {
            self.stream.write_all(&segment).await?;
        }
        loop {
            let bytes = self.stream.read_response().await?;
            match self.interpret(ResponseParser::parse(&bytes)?)? {
                IdleEvent::Ended => return Ok(events),
                IdleEvent::Other => {}
                event => events.push(event),
            }
        }
    }
}

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Enters IDLE on the selected mailbox.
    ///
    /// Call [`IdleHandle::done`] before issuing other commands. Servers
    /// drop idle clients after 30 minutes, so re-issue IDLE well before.
    pub async fn idle(&mut self) -> Result<IdleHandle<'_, S>> {
        if self.selected.is_none() {
            return Err(Error::InvalidState("IDLE needs a selected mailbox".to_string()));
        }

        let tag = self.tags.next_tag();
        for segment in Command::Idle.encode(&tag, self.literal_mode()) {
            self.stream.write_all(&segment).await?;
        }

        let mut pending = VecDeque::new();
        loop {
            let bytes = self.stream.read_response().await?;
            match ResponseParser::parse(&bytes)? {
                Response::Continuation { .. } => break,
                Response::Untagged(UntaggedResponse::Bye { text, .. }) => {
                    return Err(Error::Bye(text));
                }
                Response::Untagged(untagged) => {
                    pending.push_back(IdleEvent::from_untagged(untagged));
                }
                Response::Tagged {
                    tag: done,
                    status,
                    code,
                    text,
                } if done == tag => {
                    return Err(match status {
                        Status::No => Error::No { text, code },
                        Status::Bad => Error::Bad { text, code },
                        _ => Error::Protocol("IDLE completed without continuation".to_string()),
                    });
                }
                Response::Tagged { tag: other, .. } => {
                    return Err(Error::Protocol(format!("unexpected tag {other} before IDLE")));
                }
            }
        }
        tracing::debug!(tag = %tag, mailbox = ?self.selected, "idling");

        Ok(IdleHandle {
            stream: &mut self.stream,
            tag,
            pending,
            ended: false,
        })
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
    use crate::connection::client::NotAuthenticated;
    use crate::types::Flag;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 IDLE] hi\r\n";

    #[tokio::test]
    async fn idle_requires_selection() {
        let mock = Builder::new().read(GREETING).build();
        let client = Client::<_, NotAuthenticated>::from_stream(mock).await.unwrap();
        let mut client: Client<_, Authenticated> = client.with_state();
        assert!(matches!(client.idle().await.unwrap_err(), Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn events_then_done() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"* 3 EXISTS\r\nA0001 OK\r\n")
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 4 EXISTS\r\n")
            .read(b"* 2 FETCH (UID 9 FLAGS (\\Seen) MODSEQ (77))\r\n")
            .write(b"DONE\r\n")
            .read(b"* 1 EXPUNGE\r\nA0002 OK IDLE terminated\r\n")
            .build();
        let client = Client::<_, NotAuthenticated>::from_stream(mock).await.unwrap();
        let mut client: Client<_, Authenticated> = client.with_state();
        client.select("INBOX", false).await.unwrap();

        let mut handle = client.idle().await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), IdleEvent::Exists(4));
        match handle.wait().await.unwrap() {
            IdleEvent::Fetch {
                uid, flags, modseq, ..
            } => {
                assert_eq!(uid, Uid::new(9));
                assert!(flags.unwrap().contains(&Flag::Seen));
                assert_eq!(modseq, Some(77));
            }
            other => panic!("expected fetch, got {other:?}"),
        }
        let rest = handle.done().await.unwrap();
        assert_eq!(rest, vec![IdleEvent::Expunge(SeqNum::new(1).unwrap())]);
    }

    #[tokio::test]
    async fn rejected_idle() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"A0001 OK\r\n")
            .write(b"A0002 IDLE\r\n")
            .read(b"A0002 BAD IDLE not supported\r\n")
            .build();
        let client = Client::<_, NotAuthenticated>::from_stream(mock).await.unwrap();
        let mut client: Client<_, Authenticated> = client.with_state();
        client.select("INBOX", false).await.unwrap();
        assert!(client.idle().await.unwrap_err().is_command_failure());
    }

    #[tokio::test]
    async fn interrupted_wait_loses_nothing() {
        let (stream, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"* OK [CAPABILITY IMAP4rev1 IDLE] hi\r\n")
            .await
            .unwrap();
        let client = Client::<_, NotAuthenticated>::from_stream(stream).await.unwrap();
        let mut client: Client<_, Authenticated> = client.with_state();
        client.selected = Some("INBOX".to_string());

        server.write_all(b"+ idling\r\n").await.unwrap();
        let mut handle = client.idle().await.unwrap();

        server.write_all(b"* 5 EXI").await.unwrap();
        let raced = tokio::time::timeout(Duration::from_millis(20), handle.wait()).await;
        assert!(raced.is_err());

        server.write_all(b"STS\r\n").await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), IdleEvent::Exists(5));
    }

    #[test]
    fn vanished_maps_to_event() {
        let event = IdleEvent::from_untagged(UntaggedResponse::Vanished {
            earlier: false,
            uids: UidSet::parse("3:5").unwrap(),
        });
        assert!(matches!(event, IdleEvent::Vanished(set) if set.contains(Uid::new(4).unwrap())));
    }
}
