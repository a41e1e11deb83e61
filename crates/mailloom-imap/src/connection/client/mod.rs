//! Type-state IMAP client connection.
//!
//! The type parameter tracks whether the connection is authenticated:
//!
//! - `NotAuthenticated`: after the greeting; STARTTLS, LOGIN, AUTHENTICATE
//! - `Authenticated`: everything else
//!
//! The selected mailbox is runtime state on the authenticated client. A
//! session swaps mailboxes far more often than it authenticates, and a
//! failed SELECT deselects on the server, which a compile-time state
//! cannot express without consuming the connection.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod states;

use std::marker::PhantomData;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::states::{Authenticated, NotAuthenticated};
use super::framed::FramedStream;
use crate::command::{Command, LiteralMode, TagGenerator};
use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::pipeline::InFlight;
use crate::types::{Capability, ResponseCode, Status, Tag};
use crate::{Error, Result};

/// Successful completion of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Untagged data received while the command was outstanding.
    pub untagged: Vec<UntaggedResponse>,
    /// Response code of the tagged OK.
    pub code: Option<ResponseCode>,
    /// Human-readable text of the tagged OK.
    pub text: String,
}

/// IMAP client connection with type-state.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tags: TagGenerator,
    pub(crate) capabilities: Vec<Capability>,
    pub(crate) selected: Option<String>,
    pub(crate) enabled: Vec<Capability>,
    _state: PhantomData<State>,
}

impl<S, State> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tags", &self.tags)
            .field("capabilities", &self.capabilities)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

/// A command waiting for its tagged completion.
struct Slot {
    tag: Tag,
    untagged: Vec<UntaggedResponse>,
    result: Option<Result<CommandOutcome>>,
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn with_state<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tags: self.tags,
            capabilities: self.capabilities,
            selected: self.selected,
            enabled: self.enabled,
            _state: PhantomData,
        }
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Checks if the server has a specific capability.
    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Returns true if the server supports AUTH=PLAIN.
    #[must_use]
    pub fn supports_auth_plain(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| matches!(c, Capability::Auth(m) if m.eq_ignore_ascii_case("PLAIN")))
    }

    /// How literals are sent on this connection.
    #[must_use]
    pub fn literal_mode(&self) -> LiteralMode {
        if self.has_capability(&Capability::LiteralPlus) {
            LiteralMode::NonSynchronizing
        } else {
            LiteralMode::Synchronizing
        }
    }

    /// Sends a NOOP. Untagged updates come back in the outcome.
    pub async fn noop(&mut self) -> Result<CommandOutcome> {
        self.execute(&Command::Noop).await
    }

    /// Re-reads the capability list.
    pub async fn refresh_capabilities(&mut self) -> Result<&[Capability]> {
        self.execute(&Command::Capability).await?;
        Ok(&self.capabilities)
    }

    /// Runs one command to its tagged completion.
    ///
    /// A tagged NO or BAD is returned as [`Error::No`] / [`Error::Bad`]; the
    /// connection stays usable. Any other error means the connection is
    /// gone.
    pub async fn execute(&mut self, command: &Command) -> Result<CommandOutcome> {
        let mut results = self.execute_pipelined(std::slice::from_ref(command)).await?;
        results
            .pop()
            .unwrap_or_else(|| Err(Error::Protocol("command produced no completion".to_string())))
    }

    /// Writes all commands, then reads until every one has completed.
    ///
    /// Each completion is matched to its command by tag; untagged data is
    /// attributed to the oldest outstanding command. The outer error is a
    /// transport failure. When a response cannot be parsed, the command it
    /// belonged to gets the parse error, the rest get
    /// [`Error::ConnectionLost`], and the connection must be dropped.
    pub async fn execute_pipelined(
        &mut self,
        commands: &[Command],
    ) -> Result<Vec<Result<CommandOutcome>>> {
        let mode = self.literal_mode();
        let mut in_flight = InFlight::new();
        let mut slots: Vec<Slot> = Vec::with_capacity(commands.len());

        for command in commands {
            let tag = self.tags.next_tag();
            tracing::debug!(tag = %tag, command = command.name(), "sending");
            let segments = command.encode(&tag, mode);
            in_flight.push(tag.clone());
            slots.push(Slot {
                tag: tag.clone(),
                untagged: Vec::new(),
                result: None,
            });

            for (i, segment) in segments.iter().enumerate() {
                self.stream.write_all(segment).await?;
                if i + 1 < segments.len()
                    && !self
                        .await_continuation(&tag, &mut in_flight, &mut slots)
                        .await?
                {
                    break;
                }
            }
        }

        while !in_flight.is_empty() {
            let bytes = self.stream.read_response().await?;
            let response = match ResponseParser::parse(&bytes) {
                Ok(response) => response,
                Err(e) => return Ok(Self::poison(slots, &in_flight, e)),
            };
            match response {
                Response::Continuation { .. } => {
                    let e = Error::Protocol("unexpected continuation request".to_string());
                    return Ok(Self::poison(slots, &in_flight, e));
                }
                other => self.route(other, &mut in_flight, &mut slots)?,
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.result
                    .unwrap_or_else(|| Err(Error::Protocol("command never completed".to_string())))
            })
            .collect())
    }

    /// Reads until the server asks for the rest of `tag`'s command.
    ///
    /// Returns false if the command completed instead (typically NO/BAD).
    async fn await_continuation(
        &mut self,
        tag: &Tag,
        in_flight: &mut InFlight,
        slots: &mut [Slot],
    ) -> Result<bool> {
        loop {
            let bytes = self.stream.read_response().await?;
            match ResponseParser::parse(&bytes)? {
                Response::Continuation { .. } => return Ok(true),
                response => {
                    let completed = matches!(&response, Response::Tagged { tag: t, .. } if t == tag);
                    self.route(response, in_flight, slots)?;
                    if completed {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Files an untagged or tagged response under its command.
    fn route(&mut self, response: Response, in_flight: &mut InFlight, slots: &mut [Slot]) -> Result<()> {
        match response {
            Response::Untagged(untagged) => {
                self.observe(&untagged);
                let owner = in_flight.oldest().cloned();
                match owner.and_then(|tag| slots.iter_mut().find(|s| s.tag == tag)) {
                    Some(slot) => slot.untagged.push(untagged),
                    None => tracing::debug!(?untagged, "untagged data with nothing outstanding"),
                }
                Ok(())
            }
            Response::Tagged {
                tag,
                status,
                code,
                text,
            } => {
                if in_flight.complete(&tag).is_none() {
                    return Err(Error::Protocol(format!("completion for unknown tag {tag}")));
                }
                if let Some(ResponseCode::Capability(caps)) = &code {
                    self.capabilities.clone_from(caps);
                }
                let Some(slot) = slots.iter_mut().find(|s| s.tag == tag) else {
                    return Err(Error::Protocol(format!("completion for unknown tag {tag}")));
                };
                let untagged = std::mem::take(&mut slot.untagged);
                tracing::debug!(tag = %tag, ?status, "completed");
                slot.result = Some(completion(status, code, text, untagged));
                Ok(())
            }
            Response::Continuation { .. } => {
                Err(Error::Protocol("unexpected continuation request".to_string()))
            }
        }
    }

    /// Tracks server state announced in untagged data.
    fn observe(&mut self, untagged: &UntaggedResponse) {
        match untagged {
            UntaggedResponse::Capability(caps)
            | UntaggedResponse::Ok {
                code: Some(ResponseCode::Capability(caps)),
                ..
            } => self.capabilities.clone_from(caps),
            UntaggedResponse::Ok {
                code: Some(ResponseCode::Closed),
                ..
            } => self.selected = None,
            _ => {}
        }
    }

    /// Fails every outstanding command after unparseable data.
    fn poison(slots: Vec<Slot>, in_flight: &InFlight, error: Error) -> Vec<Result<CommandOutcome>> {
        tracing::warn!(%error, outstanding = in_flight.len(), "malformed response");
        let culprit = in_flight.oldest().cloned();
        let mut error = Some(error);
        slots
            .into_iter()
            .map(|slot| match slot.result {
                Some(done) => done,
                None if Some(&slot.tag) == culprit.as_ref() => Err(error.take().unwrap_or_else(|| {
                    Error::ConnectionLost("connection dropped after protocol error".to_string())
                })),
                None => Err(Error::ConnectionLost(
                    "connection dropped after protocol error".to_string(),
                )),
            })
            .collect()
    }
}

/// Converts a tagged status into the command's result.
fn completion(
    status: Status,
    code: Option<ResponseCode>,
    text: String,
    untagged: Vec<UntaggedResponse>,
) -> Result<CommandOutcome> {
    match status {
        Status::Ok => Ok(CommandOutcome {
            untagged,
            code,
            text,
        }),
        Status::No => Err(Error::No { text, code }),
        Status::Bad => Err(Error::Bad { text, code }),
        Status::PreAuth | Status::Bye => Err(Error::Protocol(format!(
            "tagged {status:?} is not a valid completion"
        ))),
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
    use crate::types::{Mailbox, UidSet};
    use tokio_test::io::Builder;

    async fn authenticated(mock: tokio_test::io::Mock) -> Client<tokio_test::io::Mock, Authenticated> {
        Client::<_, NotAuthenticated>::from_stream(mock)
            .await
            .unwrap()
            .with_state()
    }

    const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n";

    mod execute_tests {
        use super::*;

        #[tokio::test]
        async fn collects_untagged_until_completion() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 NOOP\r\n")
                .read(b"* 4 EXISTS\r\n* 1 RECENT\r\nA0001 OK done\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let outcome = client.noop().await.unwrap();
            assert_eq!(
                outcome.untagged,
                vec![UntaggedResponse::Exists(4), UntaggedResponse::Recent(1)]
            );
            assert_eq!(outcome.text, "done");
        }

        #[tokio::test]
        async fn no_is_command_failure_and_connection_survives() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 UID EXPUNGE 5\r\n")
                .read(b"A0001 NO [CANNOT] not permitted\r\n")
                .write(b"A0002 NOOP\r\n")
                .read(b"A0002 OK\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let err = client
                .execute(&Command::UidExpunge {
                    uids: UidSet::parse("5").unwrap(),
                })
                .await
                .unwrap_err();
            assert!(err.is_command_failure());
            assert!(matches!(&err, Error::No { text, .. } if text == "not permitted"));
            client.noop().await.unwrap();
        }

        #[tokio::test]
        async fn capabilities_follow_untagged_data() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 CAPABILITY\r\n")
                .read(b"* CAPABILITY IMAP4rev1 LITERAL+ CONDSTORE\r\nA0001 OK\r\n")
                .build();
            let mut client = authenticated(mock).await;
            assert_eq!(client.literal_mode(), LiteralMode::Synchronizing);

            client.refresh_capabilities().await.unwrap();
            assert!(client.has_capability(&Capability::CondStore));
            assert_eq!(client.literal_mode(), LiteralMode::NonSynchronizing);
        }

        #[tokio::test]
        async fn synchronizing_literal_waits_for_continuation() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 STATUS {5}\r\n")
                .read(b"+ go ahead\r\n")
                .write(b"caf\xc3\xa9 (MESSAGES)\r\n")
                .read(b"A0001 OK status sent\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let outcome = client
                .execute(&Command::Status {
                    mailbox: Mailbox::new("caf\u{e9}"),
                    items: vec![crate::command::StatusAttribute::Messages],
                })
                .await
                .unwrap();
            assert_eq!(outcome.text, "status sent");
        }

        #[tokio::test]
        async fn rejected_literal_stops_sending() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 STATUS {5}\r\n")
                .read(b"A0001 BAD literal refused\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let err = client
                .execute(&Command::Status {
                    mailbox: Mailbox::new("caf\u{e9}"),
                    items: vec![],
                })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Bad { .. }));
        }

        #[tokio::test]
        async fn eof_mid_command_is_connection_lost() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 NOOP\r\n")
                .read(b"* 3 EXI")
                .build();
            let mut client = authenticated(mock).await;
            assert!(client.noop().await.unwrap_err().is_connection_lost());
        }
    }

    mod pipeline_tests {
        use super::*;

        #[tokio::test]
        async fn completions_matched_by_tag() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 NOOP\r\n")
                .write(b"A0002 UID SEARCH ALL\r\n")
                .read(b"A0001 OK noop done\r\n")
                .read(b"* SEARCH 3 7\r\nA0002 OK search done\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let results = client
                .execute_pipelined(&[
                    Command::Noop,
                    Command::UidSearch {
                        criteria: crate::command::SearchCriteria::All,
                    },
                ])
                .await
                .unwrap();
            assert_eq!(results.len(), 2);
            let noop = results[0].as_ref().unwrap();
            assert!(noop.untagged.is_empty());
            let search = results[1].as_ref().unwrap();
            assert_eq!(
                search.untagged,
                vec![UntaggedResponse::Search {
                    ids: vec![3, 7],
                    modseq: None
                }]
            );
        }

        #[tokio::test]
        async fn one_failure_does_not_poison_batch() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 NOOP\r\n")
                .write(b"A0002 NOOP\r\n")
                .read(b"A0001 NO busy\r\nA0002 OK\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let results = client
                .execute_pipelined(&[Command::Noop, Command::Noop])
                .await
                .unwrap();
            assert!(results[0].as_ref().unwrap_err().is_command_failure());
            assert!(results[1].is_ok());
        }

        #[tokio::test]
        async fn malformed_response_blames_oldest() {
            let mock = Builder::new()
                .read(GREETING)
                .write(b"A0001 NOOP\r\n")
                .write(b"A0002 NOOP\r\n")
                .read(b"* 1 FETCH (UID)\r\n")
                .build();
            let mut client = authenticated(mock).await;

            let results = client
                .execute_pipelined(&[Command::Noop, Command::Noop])
                .await
                .unwrap();
            assert!(results[0].as_ref().unwrap_err().is_protocol_error());
            assert!(results[1].as_ref().unwrap_err().is_connection_lost());
        }
    }
}
