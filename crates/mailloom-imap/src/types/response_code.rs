//! Response codes.

use super::{Capability, Flag, SeqNum, Uid, UidSet, UidValidity};

/// Bracketed response code carried by status responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: Human-readable message that MUST be shown to user.
    Alert,
    /// CAPABILITY list.
    Capability(Vec<Capability>),
    /// PARSE: the server could not parse a message.
    Parse,
    /// PERMANENTFLAGS: Flags that can be changed permanently.
    PermanentFlags(Vec<Flag>),
    /// READ-ONLY: Mailbox selected as read-only.
    ReadOnly,
    /// READ-WRITE: Mailbox selected as read-write.
    ReadWrite,
    /// TRYCREATE: Mailbox doesn't exist, but can be created.
    TryCreate,
    /// UIDNEXT: Next UID to be assigned.
    UidNext(Uid),
    /// UIDVALIDITY: Unique identifier validity value.
    UidValidity(UidValidity),
    /// UNSEEN: First unseen message sequence number.
    Unseen(SeqNum),
    /// HIGHESTMODSEQ (CONDSTORE).
    HighestModSeq(u64),
    /// NOMODSEQ: the mailbox does not keep mod-sequences.
    NoModSeq,
    /// MODIFIED: UIDs a conditional STORE did not touch.
    Modified(UidSet),
    /// CLOSED: the previous mailbox was deselected.
    Closed,
    /// Unknown response code.
    Unknown(String),
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

    #[test]
    fn codes_compare_by_payload() {
        let a = ResponseCode::UidNext(Uid::new(4392).unwrap());
        assert_eq!(a, ResponseCode::UidNext(Uid::new(4392).unwrap()));
        assert_ne!(a, ResponseCode::UidNext(Uid::new(4393).unwrap()));
        assert_ne!(ResponseCode::ReadOnly, ResponseCode::ReadWrite);
    }

    #[test]
    fn modified_keeps_uid_set() {
        let code = ResponseCode::Modified(UidSet::parse("7,9").unwrap());
        if let ResponseCode::Modified(set) = code {
            assert!(set.contains(Uid::new(9).unwrap()));
        } else {
            panic!("expected MODIFIED");
        }
    }
}
