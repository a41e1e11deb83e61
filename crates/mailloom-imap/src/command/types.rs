//! Command-related type definitions.

use crate::types::{Flag, UidSet};

/// STATUS attributes to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAttribute {
    /// Number of messages.
    Messages,
    /// Number of recent messages.
    Recent,
    /// Next UID.
    UidNext,
    /// UIDVALIDITY.
    UidValidity,
    /// Number of unseen messages.
    Unseen,
    /// Highest mod-sequence.
    HighestModSeq,
}

impl StatusAttribute {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
            Self::HighestModSeq => "HIGHESTMODSEQ",
        }
    }
}

/// Individual FETCH attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message flags.
    Flags,
    /// Internal date.
    InternalDate,
    /// RFC822 size.
    Rfc822Size,
    /// Envelope structure.
    Envelope,
    /// Body structure.
    BodyStructure,
    /// UID.
    Uid,
    /// MODSEQ.
    ModSeq,
    /// Body section.
    Body {
        /// Section specifier, e.g. `HEADER.FIELDS (SUBJECT)`.
        section: Option<String>,
        /// Peek (don't set \Seen).
        peek: bool,
    },
}

impl FetchAttribute {
    /// `BODY.PEEK[]`, the whole message without touching `\Seen`.
    #[must_use]
    pub const fn full_body() -> Self {
        Self::Body {
            section: None,
            peek: true,
        }
    }

    /// `BODY.PEEK[HEADER.FIELDS (...)]` for the named headers.
    #[must_use]
    pub fn header_fields(names: &[&str]) -> Self {
        Self::Body {
            section: Some(format!("HEADER.FIELDS ({})", names.join(" "))),
            peek: true,
        }
    }
}

/// Flag operation of a STORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// `FLAGS`: replace.
    Set,
    /// `+FLAGS`: add.
    Add,
    /// `-FLAGS`: remove.
    Remove,
}

/// STORE action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAction {
    /// What to do with the flags.
    pub operation: StoreOperation,
    /// The flags.
    pub flags: Vec<Flag>,
    /// `UNCHANGEDSINCE` guard (CONDSTORE).
    pub unchanged_since: Option<u64>,
}

impl StoreAction {
    /// Replaces the flags.
    #[must_use]
    pub const fn set(flags: Vec<Flag>) -> Self {
        Self {
            operation: StoreOperation::Set,
            flags,
            unchanged_since: None,
        }
    }

    /// Adds flags.
    #[must_use]
    pub const fn add(flags: Vec<Flag>) -> Self {
        Self {
            operation: StoreOperation::Add,
            flags,
            unchanged_since: None,
        }
    }

    /// Removes flags.
    #[must_use]
    pub const fn remove(flags: Vec<Flag>) -> Self {
        Self {
            operation: StoreOperation::Remove,
            flags,
            unchanged_since: None,
        }
    }

    /// Only applies to messages whose mod-sequence is at most `modseq`.
    #[must_use]
    pub const fn unchanged_since(mut self, modseq: u64) -> Self {
        self.unchanged_since = Some(modseq);
        self
    }
}

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// All messages.
    All,
    /// UID set.
    Uid(UidSet),
    /// Internal date on or after the given `d-MMM-yyyy` date.
    Since(String),
    /// Messages with \Seen flag.
    Seen,
    /// Messages without \Seen flag.
    Unseen,
    /// Messages with \Deleted flag.
    Deleted,
    /// Messages without \Deleted flag.
    Undeleted,
    /// Messages with \Flagged flag.
    Flagged,
    /// Mod-sequence at least the value (CONDSTORE).
    ModSeq(u64),
    /// NOT of criteria.
    Not(Box<Self>),
    /// AND of criteria.
    And(Vec<Self>),
}
