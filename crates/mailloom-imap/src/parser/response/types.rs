//! Response data types.

use crate::types::{Capability, Flags, ListResponse, Mailbox, ResponseCode, SeqNum, Uid, UidSet, UidValidity};

/// One item of a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// Message flags.
    Flags(Flags),
    /// Internal date, verbatim.
    InternalDate(String),
    /// RFC822 size.
    Rfc822Size(u32),
    /// Envelope.
    Envelope(Box<Envelope>),
    /// UID.
    Uid(Uid),
    /// `BODY[section]<origin>` data.
    Body {
        /// Section specifier, `None` for the whole message.
        section: Option<String>,
        /// Origin offset of a partial fetch.
        origin: Option<u32>,
        /// Body data, `None` for NIL.
        data: Option<Vec<u8>>,
    },
    /// MODSEQ (CONDSTORE).
    ModSeq(u64),
}

/// ENVELOPE structure, fields as the server sent them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header.
    pub date: Option<String>,
    /// Subject header, possibly RFC 2047 encoded.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses.
    pub sender: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

/// Address from an ENVELOPE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Source route (obsolete).
    pub adl: Option<String>,
    /// Mailbox name (local part).
    pub mailbox: Option<String>,
    /// Host name (domain part).
    pub host: Option<String>,
}

impl Address {
    /// Returns `local@domain`, if both parts are present.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => Some(format!("{m}@{h}")),
            _ => None,
        }
    }
}

/// STATUS response item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusItem {
    /// Number of messages.
    Messages(u32),
    /// Number of recent messages.
    Recent(u32),
    /// Next UID.
    UidNext(Uid),
    /// UIDVALIDITY value.
    UidValidity(UidValidity),
    /// Number of unseen messages.
    Unseen(u32),
    /// Highest mod-sequence.
    HighestModSeq(u64),
}

/// Untagged response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// OK response with optional code.
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// NO response.
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BAD response.
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// PREAUTH greeting.
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BYE response.
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// CAPABILITY data.
    Capability(Vec<Capability>),
    /// ENABLED data.
    Enabled(Vec<Capability>),
    /// LIST data.
    List(ListResponse),
    /// FLAGS data.
    Flags(Flags),
    /// SEARCH result, with the highest mod-sequence when the query used one.
    Search {
        /// Matching numbers (UIDs for UID SEARCH).
        ids: Vec<u32>,
        /// `(MODSEQ n)` suffix.
        modseq: Option<u64>,
    },
    /// STATUS data.
    Status {
        /// Mailbox name.
        mailbox: Mailbox,
        /// Reported items.
        items: Vec<StatusItem>,
    },
    /// EXISTS (message count).
    Exists(u32),
    /// RECENT count.
    Recent(u32),
    /// EXPUNGE of one sequence number.
    Expunge(SeqNum),
    /// FETCH data.
    Fetch {
        /// Message sequence number.
        seq: SeqNum,
        /// Fetched items.
        items: Vec<FetchItem>,
    },
    /// VANISHED UIDs (QRESYNC).
    Vanished {
        /// Reported as part of a resynchronization, not a live expunge.
        earlier: bool,
        /// The removed UIDs.
        uids: UidSet,
    },
    /// Data the engine does not interpret (NAMESPACE, ID, ESEARCH, ...).
    Other {
        /// The response keyword.
        keyword: String,
    },
}

