//! Implementation for the authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::Authenticated;
use crate::command::{Command, StatusAttribute};
use crate::parser::{StatusItem, UntaggedResponse};
use crate::types::{Capability, ListResponse, Mailbox, SelectedMailbox};
use crate::Result;

impl<S> Client<S, Authenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Name of the selected mailbox, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Returns true once QRESYNC has been enabled on this connection.
    #[must_use]
    pub fn qresync_enabled(&self) -> bool {
        self.enabled.contains(&Capability::QResync)
    }

    /// Sends ENABLE and returns the extensions the server turned on.
    pub async fn enable(&mut self, extensions: &[&str]) -> Result<Vec<Capability>> {
        let outcome = self
            .execute(&Command::Enable {
                capabilities: extensions.iter().map(|s| (*s).to_string()).collect(),
            })
            .await?;

        let mut turned_on = Vec::new();
        for response in outcome.untagged {
            if let UntaggedResponse::Enabled(caps) = response {
                turned_on.extend(caps);
            }
        }
        // QRESYNC implies CONDSTORE (RFC 7162 section 3.2.3).
        if turned_on.contains(&Capability::QResync) && !turned_on.contains(&Capability::CondStore)
        {
            turned_on.push(Capability::CondStore);
        }
        tracing::debug!(enabled = ?turned_on, "extensions enabled");
        self.enabled.extend(turned_on.iter().cloned());
        Ok(turned_on)
    }

    /// Lists mailboxes matching a pattern.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListResponse>> {
        let outcome = self
            .execute(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;

        Ok(outcome
            .untagged
            .into_iter()
            .filter_map(|r| match r {
                UntaggedResponse::List(item) => Some(item),
                _ => None,
            })
            .collect())
    }

    /// Requests STATUS items for a mailbox without selecting it.
    pub async fn status(
        &mut self,
        mailbox: &str,
        items: &[StatusAttribute],
    ) -> Result<Vec<StatusItem>> {
        let outcome = self
            .execute(&Command::Status {
                mailbox: Mailbox::new(mailbox),
                items: items.to_vec(),
            })
            .await?;

        Ok(outcome
            .untagged
            .into_iter()
            .find_map(|r| match r {
                UntaggedResponse::Status { items, .. } => Some(items),
                _ => None,
            })
            .unwrap_or_default())
    }

    /// Selects a mailbox for read-write access.
    ///
    /// `condstore` adds the CONDSTORE parameter so the server reports
    /// mod-sequences even if ENABLE was not used.
    pub async fn select(&mut self, mailbox: &str, condstore: bool) -> Result<SelectedMailbox> {
        self.open_mailbox(mailbox, condstore, false).await
    }

    /// Selects a mailbox read-only.
    pub async fn examine(&mut self, mailbox: &str, condstore: bool) -> Result<SelectedMailbox> {
        self.open_mailbox(mailbox, condstore, true).await
    }

    async fn open_mailbox(
        &mut self,
        mailbox: &str,
        condstore: bool,
        read_only: bool,
    ) -> Result<SelectedMailbox> {
        let name = Mailbox::new(mailbox);
        let command = if read_only {
            Command::Examine {
                mailbox: name,
                condstore,
            }
        } else {
            Command::Select {
                mailbox: name,
                condstore,
            }
        };

        // A failed SELECT leaves no mailbox selected.
        self.selected = None;
        let outcome = self.execute(&command).await?;

        let mut state =
            SelectedMailbox::from_responses(mailbox, &outcome.untagged, outcome.code.as_ref());
        state.read_only |= read_only;
        state.qresync = self.qresync_enabled();
        self.selected = Some(mailbox.to_string());
        tracing::debug!(
            mailbox,
            exists = state.exists,
            uid_validity = ?state.uid_validity,
            highest_modseq = ?state.highest_modseq,
            "mailbox selected"
        );
        Ok(state)
    }

    /// Gracefully disconnects from the server.
    pub async fn logout(mut self) -> Result<()> {
        let _ = self.execute(&Command::Logout).await;
        Ok(())
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
    use crate::types::{Uid, UidValidity};
    use crate::Error;
    use tokio_test::io::{Builder, Mock};

    async fn client(mock: Mock) -> Client<Mock, Authenticated> {
        Client::<_, NotAuthenticated>::from_stream(mock)
            .await
            .unwrap()
            .with_state()
    }

    const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 ENABLE QRESYNC CONDSTORE] hi\r\n";

    #[tokio::test]
    async fn select_reports_mailbox_state() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 SELECT INBOX (CONDSTORE)\r\n")
            .read(b"* 172 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n")
            .read(b"* OK [UIDNEXT 4392] Predicted next UID\r\n")
            .read(b"* OK [HIGHESTMODSEQ 715194045007] Highest\r\n")
            .read(b"* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n")
            .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
            .build();
        let mut client = client(mock).await;

        let state = client.select("INBOX", true).await.unwrap();
        assert_eq!(state.exists, 172);
        assert_eq!(state.uid_validity, UidValidity::new(3_857_529_045));
        assert_eq!(state.uid_next, Uid::new(4392));
        assert_eq!(state.highest_modseq, Some(715_194_045_007));
        assert!(state.supports_condstore());
        assert!(!state.read_only);
        assert_eq!(client.selected(), Some("INBOX"));
    }

    #[tokio::test]
    async fn failed_select_deselects() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 EXAMINE INBOX\r\n")
            .read(b"* 1 EXISTS\r\nA0001 OK [READ-ONLY] done\r\n")
            .write(b"A0002 SELECT Missing\r\n")
            .read(b"A0002 NO [NONEXISTENT] no such mailbox\r\n")
            .build();
        let mut client = client(mock).await;

        let state = client.examine("INBOX", false).await.unwrap();
        assert!(state.read_only);
        let err = client.select("Missing", false).await.unwrap_err();
        assert!(matches!(err, Error::No { .. }));
        assert_eq!(client.selected(), None);
    }

    #[tokio::test]
    async fn enable_qresync_implies_condstore() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 ENABLE QRESYNC\r\n")
            .read(b"* ENABLED QRESYNC\r\nA0001 OK\r\n")
            .build();
        let mut client = client(mock).await;

        let enabled = client.enable(&["QRESYNC"]).await.unwrap();
        assert!(enabled.contains(&Capability::CondStore));
        assert!(client.qresync_enabled());
    }

    #[tokio::test]
    async fn list_collects_entries() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n")
            .read(b"* LIST (\\HasNoChildren \\Sent) \"/\" Sent\r\n")
            .read(b"A0001 OK LIST done\r\n")
            .build();
        let mut client = client(mock).await;

        let entries = client.list("", "*").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].mailbox.as_str(), "Sent");
    }

    #[tokio::test]
    async fn status_items() {
        let mock = Builder::new()
            .read(GREETING)
            .write(b"A0001 STATUS Archive (MESSAGES UIDNEXT)\r\n")
            .read(b"* STATUS Archive (MESSAGES 12 UIDNEXT 40)\r\nA0001 OK\r\n")
            .build();
        let mut client = client(mock).await;

        let items = client
            .status("Archive", &[StatusAttribute::Messages, StatusAttribute::UidNext])
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }
}
