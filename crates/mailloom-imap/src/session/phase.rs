//! Observable session state and push notifications.

use crate::types::{Flags, SeqNum, Uid, UidSet};

/// Where the session's connection currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening the transport and reading the greeting.
    Connecting,
    /// Logging in.
    Authenticating,
    /// Authenticated, no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected(String),
    /// Idling on a mailbox.
    Idle(String),
}

impl SessionPhase {
    /// Returns true when commands can be sent without reconnecting.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Selected(_) | Self::Idle(_))
    }

    /// The selected mailbox, if any.
    #[must_use]
    pub fn mailbox(&self) -> Option<&str> {
        match self {
            Self::Selected(name) | Self::Idle(name) => Some(name),
            _ => None,
        }
    }
}

/// Event broadcast to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The mailbox now holds `count` messages.
    Exists {
        /// Mailbox name.
        mailbox: String,
        /// New message count.
        count: u32,
    },
    /// A message was expunged.
    Expunge {
        /// Mailbox name.
        mailbox: String,
        /// Sequence number of the removed message.
        seq: SeqNum,
    },
    /// A message's flags changed.
    FlagsChanged {
        /// Mailbox name.
        mailbox: String,
        /// Sequence number.
        seq: SeqNum,
        /// UID, when the server sent it.
        uid: Option<Uid>,
        /// The new flag set.
        flags: Flags,
        /// New mod-sequence, when the server sent it.
        modseq: Option<u64>,
    },
    /// Messages were expunged (QRESYNC).
    Vanished {
        /// Mailbox name.
        mailbox: String,
        /// Removed UIDs.
        uids: UidSet,
    },
    /// The connection was re-established.
    Reconnected,
    /// The connection was lost.
    Disconnected {
        /// What went wrong.
        reason: String,
    },
}

impl SessionEvent {
    /// Mailbox the event refers to.
    #[must_use]
    pub fn mailbox(&self) -> Option<&str> {
        match self {
            Self::Exists { mailbox, .. }
            | Self::Expunge { mailbox, .. }
            | Self::FlagsChanged { mailbox, .. }
            | Self::Vanished { mailbox, .. } => Some(mailbox),
            Self::Reconnected | Self::Disconnected { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_accessors() {
        assert!(!SessionPhase::Connecting.is_connected());
        assert!(SessionPhase::Idle("INBOX".into()).is_connected());
        assert_eq!(SessionPhase::Selected("Sent".into()).mailbox(), Some("Sent"));
        assert_eq!(SessionPhase::Authenticated.mailbox(), None);
    }

    #[test]
    fn event_mailbox() {
        let event = SessionEvent::Exists {
            mailbox: "INBOX".into(),
            count: 3,
        };
        assert_eq!(event.mailbox(), Some("INBOX"));
        assert_eq!(SessionEvent::Reconnected.mailbox(), None);
    }
}
