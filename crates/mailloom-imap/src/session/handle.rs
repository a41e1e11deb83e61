//! Cloneable front end of a session.

#![allow(clippy::missing_errors_doc)]

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::SessionConfig;
use super::actor::{Actor, Reply, Request};
use super::connector::Connector;
use super::fetched::{ChangedSince, FetchedMessage, SearchResult, collect_fetches};
use super::phase::{SessionEvent, SessionPhase};
use crate::command::{Command, FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};
use crate::connection::CommandOutcome;
use crate::parser::{StatusItem, UntaggedResponse};
use crate::types::{Capability, ListResponse, Mailbox, ResponseCode, SelectedMailbox, UidSet};
use crate::{Error, Result};

/// Result of a UID STORE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreResult {
    /// FETCH echoes of the new flags (empty for `.SILENT`).
    pub messages: Vec<FetchedMessage>,
    /// UIDs left untouched because they changed since the
    /// `UNCHANGEDSINCE` guard (`MODIFIED` response code).
    pub modified: Option<UidSet>,
}

/// Handle to a running session.
///
/// Clones share the same connection. Requests are served in the order
/// they are queued; when the session is watching a mailbox it leaves IDLE
/// to serve them. After the last handle is dropped the session logs out.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    phase: watch::Receiver<SessionPhase>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Spawns the session actor on the current tokio runtime.
    ///
    /// No connection is made until the first request.
    #[must_use]
    pub fn spawn<C: Connector>(connector: C, config: SessionConfig) -> Self {
        let (requests, receiver) = mpsc::channel(config.queue_depth.max(1));
        let (phase_tx, phase) = watch::channel(SessionPhase::Disconnected);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let actor = Actor::new(connector, config, receiver, phase_tx, events.clone());
        tokio::spawn(actor.run());
        Self {
            requests,
            phase,
            events,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Receiver that observes every phase change.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Subscribes to mailbox change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| shut_down())?;
        response.await.unwrap_or_else(|_| Err(shut_down()))
    }

    /// Runs an arbitrary command.
    ///
    /// Commands that change the connection or selection state have their
    /// own methods and are refused here.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        if matches!(
            command,
            Command::Select { .. }
                | Command::Examine { .. }
                | Command::Close
                | Command::Idle
                | Command::Done
                | Command::Logout
                | Command::StartTls
                | Command::Login { .. }
                | Command::Authenticate { .. }
        ) {
            return Err(Error::InvalidState(format!(
                "{} is managed by the session",
                command.name()
            )));
        }
        self.call(|reply| Request::Execute { command, reply }).await
    }

    /// Server capabilities, connecting first if needed.
    pub async fn capabilities(&self) -> Result<Vec<Capability>> {
        self.call(|reply| Request::Capabilities { reply }).await
    }

    /// Lists mailboxes.
    pub async fn list(&self, reference: &str, pattern: &str) -> Result<Vec<ListResponse>> {
        let outcome = self
            .execute(Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(outcome
            .untagged
            .into_iter()
            .filter_map(|response| match response {
                UntaggedResponse::List(entry) => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// STATUS of a mailbox without selecting it.
    pub async fn status(&self, mailbox: &str, items: &[StatusAttribute]) -> Result<Vec<StatusItem>> {
        let outcome = self
            .execute(Command::Status {
                mailbox: Mailbox::new(mailbox),
                items: items.to_vec(),
            })
            .await?;
        Ok(outcome
            .untagged
            .into_iter()
            .find_map(|response| match response {
                UntaggedResponse::Status { items, .. } => Some(items),
                _ => None,
            })
            .unwrap_or_default())
    }

    /// Selects a mailbox read-write.
    pub async fn select(&self, mailbox: &str) -> Result<SelectedMailbox> {
        let mailbox = mailbox.to_string();
        self.call(|reply| Request::Select {
            mailbox,
            read_only: false,
            reply,
        })
        .await
    }

    /// Selects a mailbox read-only.
    pub async fn examine(&self, mailbox: &str) -> Result<SelectedMailbox> {
        let mailbox = mailbox.to_string();
        self.call(|reply| Request::Select {
            mailbox,
            read_only: true,
            reply,
        })
        .await
    }

    /// UID SEARCH in the selected mailbox.
    pub async fn uid_search(&self, criteria: SearchCriteria) -> Result<SearchResult> {
        let outcome = self.execute(Command::UidSearch { criteria }).await?;
        Ok(SearchResult::from_untagged(outcome.untagged))
    }

    /// UID FETCH in the selected mailbox. An empty set fetches nothing.
    pub async fn uid_fetch(
        &self,
        uids: &UidSet,
        items: Vec<FetchAttribute>,
    ) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let outcome = self
            .execute(Command::UidFetch {
                uids: uids.clone(),
                items: with_uid(items),
                changed_since: None,
                vanished: false,
            })
            .await?;
        Ok(collect_fetches(outcome.untagged))
    }

    /// `UID FETCH ... (CHANGEDSINCE modseq [VANISHED])`.
    ///
    /// `vanished` needs QRESYNC to be enabled.
    pub async fn uid_fetch_changed_since(
        &self,
        uids: &UidSet,
        items: Vec<FetchAttribute>,
        modseq: u64,
        vanished: bool,
    ) -> Result<ChangedSince> {
        let outcome = self
            .execute(Command::UidFetch {
                uids: uids.clone(),
                items: with_uid(items),
                changed_since: Some(modseq),
                vanished,
            })
            .await?;
        Ok(ChangedSince::from_untagged(outcome.untagged))
    }

    /// UID STORE in the selected mailbox.
    pub async fn uid_store(&self, uids: &UidSet, action: StoreAction, silent: bool) -> Result<StoreResult> {
        let outcome = self
            .execute(Command::UidStore {
                uids: uids.clone(),
                action,
                silent,
            })
            .await?;
        let modified = match outcome.code {
            Some(ResponseCode::Modified(set)) => Some(set),
            _ => None,
        };
        Ok(StoreResult {
            messages: collect_fetches(outcome.untagged),
            modified,
        })
    }

    /// UID EXPUNGE (UIDPLUS) in the selected mailbox.
    pub async fn uid_expunge(&self, uids: &UidSet) -> Result<()> {
        self.execute(Command::UidExpunge { uids: uids.clone() })
            .await
            .map(|_| ())
    }

    /// NOOP; returns whatever the server had pending.
    pub async fn noop(&self) -> Result<Vec<UntaggedResponse>> {
        Ok(self.execute(Command::Noop).await?.untagged)
    }

    /// Watches `mailbox` between requests: IDLE when the server has it,
    /// NOOP polling otherwise. Changes arrive on [`Self::subscribe`].
    ///
    /// The watched mailbox is opened read-only and stays selected while
    /// watching, so select explicitly before UID commands.
    pub async fn start_idle(&self, mailbox: &str) -> Result<()> {
        let mailbox = mailbox.to_string();
        self.call(|reply| Request::StartIdle { mailbox, reply }).await
    }

    /// Stops watching.
    pub async fn stop_idle(&self) -> Result<()> {
        self.call(|reply| Request::StopIdle { reply }).await
    }

    /// Logs out and stops the session. Other handles then fail with
    /// [`Error::ConnectionLost`].
    pub async fn logout(&self) -> Result<()> {
        self.call(|reply| Request::Logout { reply }).await
    }
}

fn with_uid(mut items: Vec<FetchAttribute>) -> Vec<FetchAttribute> {
    if !items.contains(&FetchAttribute::Uid) {
        items.insert(0, FetchAttribute::Uid);
    }
    items
}

fn shut_down() -> Error {
    Error::ConnectionLost("session has shut down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_always_requested() {
        let items = with_uid(vec![FetchAttribute::Flags]);
        assert_eq!(items[0], FetchAttribute::Uid);
        assert_eq!(with_uid(items.clone()), items);
    }
}
