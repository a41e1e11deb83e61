//! Mailbox names, LIST data and the state reported by SELECT.

use super::{Flag, Flags, ResponseCode, Uid, UidValidity};
use crate::parser::UntaggedResponse;

/// Mailbox name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox(pub String);

impl Mailbox {
    /// Creates a new mailbox name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the mailbox name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// INBOX is matched case-insensitively.
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.0.eq_ignore_ascii_case("INBOX")
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a folder in the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialUse {
    /// The inbox.
    Inbox,
    /// Sent mail.
    Sent,
    /// Drafts.
    Drafts,
    /// Trash.
    Trash,
    /// Archive.
    Archive,
    /// Junk / spam.
    Junk,
}

impl SpecialUse {
    /// Lowercase name used in configuration and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Archive => "archive",
            Self::Junk => "junk",
        }
    }

    /// Inverse of [`SpecialUse::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(Self::Inbox),
            "sent" => Some(Self::Sent),
            "drafts" => Some(Self::Drafts),
            "trash" => Some(Self::Trash),
            "archive" => Some(Self::Archive),
            "junk" => Some(Self::Junk),
            _ => None,
        }
    }
}

/// LIST response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    /// Mailbox attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Mailbox name.
    pub mailbox: Mailbox,
}

impl ListResponse {
    /// False for `\NoSelect` and `\NonExistent` entries.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| matches!(a, MailboxAttribute::NoSelect | MailboxAttribute::NonExistent))
    }

    /// Role from SPECIAL-USE attributes, falling back to the INBOX name.
    #[must_use]
    pub fn special_use(&self) -> Option<SpecialUse> {
        if self.mailbox.is_inbox() {
            return Some(SpecialUse::Inbox);
        }
        self.attributes.iter().find_map(|a| match a {
            MailboxAttribute::Sent => Some(SpecialUse::Sent),
            MailboxAttribute::Drafts => Some(SpecialUse::Drafts),
            MailboxAttribute::Trash => Some(SpecialUse::Trash),
            MailboxAttribute::Archive => Some(SpecialUse::Archive),
            MailboxAttribute::Junk => Some(SpecialUse::Junk),
            _ => None,
        })
    }
}

/// Mailbox attributes from LIST response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxAttribute {
    /// Mailbox cannot be selected.
    NoSelect,
    /// Listed only because a child exists.
    NonExistent,
    /// Mailbox has no children.
    HasNoChildren,
    /// Mailbox has children.
    HasChildren,
    /// Mailbox is the archive folder.
    Archive,
    /// Mailbox is the drafts folder.
    Drafts,
    /// Mailbox is the junk/spam folder.
    Junk,
    /// Mailbox is the sent folder.
    Sent,
    /// Mailbox is the trash folder.
    Trash,
    /// Mailbox is subscribed.
    Subscribed,
    /// Unknown attribute.
    Unknown(String),
}

impl MailboxAttribute {
    /// Parses a mailbox attribute string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NONEXISTENT" => Self::NonExistent,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\ARCHIVE" => Self::Archive,
            "\\DRAFTS" => Self::Drafts,
            "\\JUNK" | "\\SPAM" => Self::Junk,
            "\\SENT" => Self::Sent,
            "\\TRASH" => Self::Trash,
            "\\SUBSCRIBED" => Self::Subscribed,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

/// State of a mailbox as reported by SELECT or EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedMailbox {
    /// Mailbox name.
    pub name: String,
    /// Number of messages.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// UIDVALIDITY, if reported.
    pub uid_validity: Option<UidValidity>,
    /// Predicted next UID.
    pub uid_next: Option<Uid>,
    /// Highest mod-sequence, reported when CONDSTORE is active.
    pub highest_modseq: Option<u64>,
    /// Server reported `NOMODSEQ` for this mailbox.
    pub no_modseq: bool,
    /// QRESYNC is enabled on the session, so `VANISHED` is available.
    pub qresync: bool,
    /// Flags defined for this mailbox.
    pub flags: Flags,
    /// Flags that can be permanently stored.
    pub permanent_flags: Flags,
    /// Selected read-only.
    pub read_only: bool,
}

impl SelectedMailbox {
    /// Starts an empty state for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builds the state from the untagged data and tagged code of a SELECT.
    #[must_use]
    pub fn from_responses(
        name: impl Into<String>,
        untagged: &[UntaggedResponse],
        tagged_code: Option<&ResponseCode>,
    ) -> Self {
        let mut state = Self::new(name);
        for response in untagged {
            state.apply(response);
        }
        if let Some(code) = tagged_code {
            state.apply_code(code);
        }
        state
    }

    /// Folds one untagged response into the state.
    pub fn apply(&mut self, response: &UntaggedResponse) {
        match response {
            UntaggedResponse::Exists(n) => self.exists = *n,
            UntaggedResponse::Recent(n) => self.recent = *n,
            UntaggedResponse::Flags(flags) => self.flags = flags.clone(),
            UntaggedResponse::Ok {
                code: Some(code), ..
            } => self.apply_code(code),
            _ => {}
        }
    }

    /// Folds one response code into the state.
    pub fn apply_code(&mut self, code: &ResponseCode) {
        match code {
            ResponseCode::UidValidity(v) => self.uid_validity = Some(*v),
            ResponseCode::UidNext(u) => self.uid_next = Some(*u),
            ResponseCode::HighestModSeq(m) => self.highest_modseq = Some(*m),
            ResponseCode::NoModSeq => self.no_modseq = true,
            ResponseCode::PermanentFlags(flags) => {
                self.permanent_flags = flags.iter().cloned().collect::<Flags>();
            }
            ResponseCode::ReadOnly => self.read_only = true,
            ResponseCode::ReadWrite => self.read_only = false,
            _ => {}
        }
    }

    /// Mod-sequences are usable for this mailbox.
    #[must_use]
    pub const fn supports_condstore(&self) -> bool {
        self.highest_modseq.is_some() && !self.no_modseq
    }

    /// `\Deleted` can be stored permanently.
    #[must_use]
    pub fn can_delete(&self) -> bool {
        self.permanent_flags.contains(&Flag::Deleted)
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

    mod list_tests {
        use super::*;

        fn entry(name: &str, attrs: &[&str]) -> ListResponse {
            ListResponse {
                attributes: attrs.iter().map(|a| MailboxAttribute::parse(a)).collect(),
                delimiter: Some('/'),
                mailbox: Mailbox::new(name),
            }
        }

        #[test]
        fn special_use_from_attributes() {
            assert_eq!(entry("Sent Items", &["\\Sent"]).special_use(), Some(SpecialUse::Sent));
            assert_eq!(entry("Spam", &["\\Spam"]).special_use(), Some(SpecialUse::Junk));
            assert_eq!(entry("inbox", &[]).special_use(), Some(SpecialUse::Inbox));
            assert_eq!(entry("Work", &["\\HasNoChildren"]).special_use(), None);
        }

        #[test]
        fn noselect_is_not_selectable() {
            assert!(!entry("[Gmail]", &["\\Noselect"]).is_selectable());
            assert!(entry("INBOX", &[]).is_selectable());
        }

        #[test]
        fn special_use_names_round_trip() {
            for role in [SpecialUse::Inbox, SpecialUse::Trash, SpecialUse::Junk] {
                assert_eq!(SpecialUse::parse(role.as_str()), Some(role));
            }
            assert_eq!(SpecialUse::parse("other"), None);
        }
    }

    mod selected_tests {
        use super::*;

        #[test]
        fn folds_select_responses() {
            let untagged = vec![
                UntaggedResponse::Exists(172),
                UntaggedResponse::Recent(1),
                UntaggedResponse::Ok {
                    code: Some(ResponseCode::UidValidity(UidValidity::new(3857529045).unwrap())),
                    text: "UIDs valid".into(),
                },
                UntaggedResponse::Ok {
                    code: Some(ResponseCode::HighestModSeq(715194045007)),
                    text: String::new(),
                },
                UntaggedResponse::Ok {
                    code: Some(ResponseCode::PermanentFlags(vec![Flag::Deleted, Flag::Seen])),
                    text: String::new(),
                },
            ];
            let state =
                SelectedMailbox::from_responses("INBOX", &untagged, Some(&ResponseCode::ReadWrite));

            assert_eq!(state.exists, 172);
            assert_eq!(state.uid_validity.unwrap().get(), 3857529045);
            assert_eq!(state.highest_modseq, Some(715194045007));
            assert!(state.supports_condstore());
            assert!(state.can_delete());
            assert!(!state.read_only);
        }

        #[test]
        fn nomodseq_disables_condstore() {
            let untagged = vec![UntaggedResponse::Ok {
                code: Some(ResponseCode::NoModSeq),
                text: String::new(),
            }];
            let state = SelectedMailbox::from_responses("Archive", &untagged, None);
            assert!(!state.supports_condstore());
        }
    }
}
