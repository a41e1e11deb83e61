//! Core IMAP types.
//!
//! Identifiers, flag sets, UID sets, capabilities, mailbox data and
//! response codes, following RFC 9051 (`IMAP4rev2`) and RFC 3501
//! (`IMAP4rev1`) plus CONDSTORE/QRESYNC (RFC 7162).

#![allow(clippy::missing_const_for_fn)]

mod capability;
mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod sequence;

pub use capability::{Capability, Status};
pub use flags::{Flag, Flags};
pub use identifiers::{SeqNum, Tag, Uid, UidValidity};
pub use mailbox::{ListResponse, Mailbox, MailboxAttribute, SelectedMailbox, SpecialUse};
pub use response_code::ResponseCode;
pub use sequence::{UidBound, UidRange, UidSet};
