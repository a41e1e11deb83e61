//! IMAP command builder.
//!
//! Commands are encoded into wire segments; see [`LiteralMode`] for how
//! literals split a command.

mod serialize;
mod tag_generator;
mod types;

use crate::types::{Mailbox, Tag, UidSet};

pub use serialize::LiteralMode;
pub use tag_generator::TagGenerator;
pub use types::{FetchAttribute, SearchCriteria, StatusAttribute, StoreAction, StoreOperation};

use serialize::CommandWriter;

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Any state
    /// CAPABILITY command.
    Capability,
    /// NOOP command.
    Noop,
    /// LOGOUT command.
    Logout,

    // Not authenticated
    /// STARTTLS command.
    StartTls,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// SASL mechanism.
        mechanism: String,
        /// Base64 initial response (SASL-IR).
        initial_response: Option<String>,
    },

    // Authenticated
    /// ENABLE command.
    Enable {
        /// Capabilities to enable.
        capabilities: Vec<String>,
    },
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: Mailbox,
        /// Enable CONDSTORE.
        condstore: bool,
    },
    /// EXAMINE command (read-only SELECT).
    Examine {
        /// Mailbox to examine.
        mailbox: Mailbox,
        /// Enable CONDSTORE.
        condstore: bool,
    },
    /// LIST command.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// STATUS command.
    Status {
        /// Mailbox name.
        mailbox: Mailbox,
        /// Status items to request.
        items: Vec<StatusAttribute>,
    },

    // Selected
    /// UID SEARCH command.
    UidSearch {
        /// Search criteria.
        criteria: SearchCriteria,
    },
    /// UID FETCH command.
    UidFetch {
        /// UIDs to fetch.
        uids: UidSet,
        /// Items to fetch.
        items: Vec<FetchAttribute>,
        /// `CHANGEDSINCE` modifier (CONDSTORE).
        changed_since: Option<u64>,
        /// `VANISHED` modifier (QRESYNC); needs `changed_since`.
        vanished: bool,
    },
    /// UID STORE command.
    UidStore {
        /// UIDs to change.
        uids: UidSet,
        /// Flag change.
        action: StoreAction,
        /// Suppress the FETCH echo.
        silent: bool,
    },
    /// UID EXPUNGE command (UIDPLUS).
    UidExpunge {
        /// UIDs to expunge.
        uids: UidSet,
    },
    /// EXPUNGE command.
    Expunge,
    /// CLOSE command.
    Close,
    /// IDLE command.
    Idle,
    /// DONE (ends IDLE, untagged).
    Done,
}

impl Command {
    /// Encodes the command with the given tag.
    ///
    /// Returns one segment per synchronizing literal plus one; with
    /// [`LiteralMode::NonSynchronizing`] there is always one segment.
    #[must_use]
    pub fn encode(&self, tag: &Tag, mode: LiteralMode) -> Vec<Vec<u8>> {
        let mut w = CommandWriter::new(mode);

        if !matches!(self, Self::Done) {
            w.raw(tag.as_str().as_bytes());
            w.push(b' ');
        }

        match self {
            Self::Capability => w.raw(b"CAPABILITY"),
            Self::Noop => w.raw(b"NOOP"),
            Self::Logout => w.raw(b"LOGOUT"),
            Self::StartTls => w.raw(b"STARTTLS"),
            Self::Login { username, password } => {
                w.raw(b"LOGIN ");
                w.astring(username);
                w.push(b' ');
                w.astring(password);
            }
            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                w.raw(b"AUTHENTICATE ");
                w.raw(mechanism.as_bytes());
                if let Some(resp) = initial_response {
                    w.push(b' ');
                    w.raw(if resp.is_empty() { &b"="[..] } else { resp.as_bytes() });
                }
            }
            Self::Enable { capabilities } => {
                w.raw(b"ENABLE");
                for cap in capabilities {
                    w.push(b' ');
                    w.raw(cap.as_bytes());
                }
            }
            Self::Select { mailbox, condstore } | Self::Examine { mailbox, condstore } => {
                w.raw(if matches!(self, Self::Select { .. }) {
                    &b"SELECT "[..]
                } else {
                    &b"EXAMINE "[..]
                });
                w.astring(mailbox.as_str());
                if *condstore {
                    w.raw(b" (CONDSTORE)");
                }
            }
            Self::List { reference, pattern } => {
                w.raw(b"LIST ");
                w.string(reference);
                w.push(b' ');
                w.string(pattern);
            }
            Self::Status { mailbox, items } => {
                w.raw(b"STATUS ");
                w.astring(mailbox.as_str());
                w.raw(b" (");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.push(b' ');
                    }
                    w.raw(item.as_str().as_bytes());
                }
                w.push(b')');
            }
            Self::UidSearch { criteria } => {
                w.raw(b"UID SEARCH ");
                w.search_criteria(criteria);
            }
            Self::UidFetch {
                uids,
                items,
                changed_since,
                vanished,
            } => {
                w.raw(b"UID FETCH ");
                w.raw(uids.to_string().as_bytes());
                w.push(b' ');
                w.fetch_attributes(items);
                if let Some(modseq) = changed_since {
                    w.raw(format!(" (CHANGEDSINCE {modseq}").as_bytes());
                    if *vanished {
                        w.raw(b" VANISHED");
                    }
                    w.push(b')');
                }
            }
            Self::UidStore {
                uids,
                action,
                silent,
            } => {
                w.raw(b"UID STORE ");
                w.raw(uids.to_string().as_bytes());
                w.push(b' ');
                w.store_action(action, *silent);
            }
            Self::UidExpunge { uids } => {
                w.raw(b"UID EXPUNGE ");
                w.raw(uids.to_string().as_bytes());
            }
            Self::Expunge => w.raw(b"EXPUNGE"),
            Self::Close => w.raw(b"CLOSE"),
            Self::Idle => w.raw(b"IDLE"),
            Self::Done => w.raw(b"DONE"),
        }

        w.finish()
    }

    /// Short name for logs. Never includes arguments, so credentials
    /// stay out of traces.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Enable { .. } => "ENABLE",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::List { .. } => "LIST",
            Self::Status { .. } => "STATUS",
            Self::UidSearch { .. } => "UID SEARCH",
            Self::UidFetch { .. } => "UID FETCH",
            Self::UidStore { .. } => "UID STORE",
            Self::UidExpunge { .. } => "UID EXPUNGE",
            Self::Expunge => "EXPUNGE",
            Self::Close => "CLOSE",
            Self::Idle => "IDLE",
            Self::Done => "DONE",
        }
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
    use crate::types::{Flag, Uid};

    fn wire(cmd: &Command) -> Vec<u8> {
        let segments = cmd.encode(&Tag::new("A001"), LiteralMode::Synchronizing);
        assert_eq!(segments.len(), 1, "unexpected literal in {cmd:?}");
        segments.into_iter().next().unwrap()
    }

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    mod session_command_tests {
        use super::*;

        #[test]
        fn capability() {
            assert_eq!(wire(&Command::Capability), b"A001 CAPABILITY\r\n");
        }

        #[test]
        fn login_plain_and_quoted() {
            let cmd = Command::Login {
                username: "user".to_string(),
                password: "pass".to_string(),
            };
            assert_eq!(wire(&cmd), b"A001 LOGIN user pass\r\n");

            let cmd = Command::Login {
                username: "user@example.com".to_string(),
                password: "pass word".to_string(),
            };
            assert_eq!(wire(&cmd), b"A001 LOGIN user@example.com \"pass word\"\r\n");
        }

        #[test]
        fn login_with_eight_bit_password_uses_literal() {
            let cmd = Command::Login {
                username: "u".to_string(),
                password: "pässword".to_string(),
            };
            let segments = cmd.encode(&Tag::new("A001"), LiteralMode::Synchronizing);
            assert_eq!(segments[0], b"A001 LOGIN u {9}\r\n");
            assert_eq!(segments[1], "pässword\r\n".as_bytes());
        }

        #[test]
        fn authenticate_plain_with_initial_response() {
            let cmd = Command::Authenticate {
                mechanism: "PLAIN".to_string(),
                initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
            };
            assert_eq!(wire(&cmd), b"A001 AUTHENTICATE PLAIN AHVzZXIAcGFzcw==\r\n");
        }

        #[test]
        fn enable() {
            let cmd = Command::Enable {
                capabilities: vec!["QRESYNC".to_string()],
            };
            assert_eq!(wire(&cmd), b"A001 ENABLE QRESYNC\r\n");
        }

        #[test]
        fn done_has_no_tag() {
            assert_eq!(wire(&Command::Done), b"DONE\r\n");
        }

        #[test]
        fn names_hide_arguments() {
            let cmd = Command::Login {
                username: "u".to_string(),
                password: "secret".to_string(),
            };
            assert_eq!(cmd.name(), "LOGIN");
        }
    }

    mod mailbox_command_tests {
        use super::*;

        #[test]
        fn select_and_examine() {
            let cmd = Command::Select {
                mailbox: Mailbox::new("INBOX"),
                condstore: false,
            };
            assert_eq!(wire(&cmd), b"A001 SELECT INBOX\r\n");

            let cmd = Command::Examine {
                mailbox: Mailbox::new("Sent Items"),
                condstore: true,
            };
            assert_eq!(wire(&cmd), b"A001 EXAMINE \"Sent Items\" (CONDSTORE)\r\n");
        }

        #[test]
        fn list_quotes_wildcards() {
            let cmd = Command::List {
                reference: String::new(),
                pattern: "*".to_string(),
            };
            assert_eq!(wire(&cmd), b"A001 LIST \"\" \"*\"\r\n");
        }

        #[test]
        fn status() {
            let cmd = Command::Status {
                mailbox: Mailbox::new("INBOX"),
                items: vec![StatusAttribute::Messages, StatusAttribute::HighestModSeq],
            };
            assert_eq!(wire(&cmd), b"A001 STATUS INBOX (MESSAGES HIGHESTMODSEQ)\r\n");
        }
    }

    mod message_command_tests {
        use super::*;

        #[test]
        fn uid_fetch_headers() {
            let cmd = Command::UidFetch {
                uids: UidSet::range(uid(1), uid(10)),
                items: vec![
                    FetchAttribute::Uid,
                    FetchAttribute::Flags,
                    FetchAttribute::header_fields(&["SUBJECT", "MESSAGE-ID"]),
                ],
                changed_since: None,
                vanished: false,
            };
            assert_eq!(
                wire(&cmd),
                b"A001 UID FETCH 1:10 (UID FLAGS BODY.PEEK[HEADER.FIELDS (SUBJECT MESSAGE-ID)])\r\n"
            );
        }

        #[test]
        fn uid_fetch_changed_since_vanished() {
            let cmd = Command::UidFetch {
                uids: UidSet::all(),
                items: vec![FetchAttribute::Flags],
                changed_since: Some(12345),
                vanished: true,
            };
            assert_eq!(
                wire(&cmd),
                b"A001 UID FETCH 1:* (FLAGS) (CHANGEDSINCE 12345 VANISHED)\r\n"
            );
        }

        #[test]
        fn uid_store_silent_and_conditional() {
            let cmd = Command::UidStore {
                uids: UidSet::single(uid(7)),
                action: StoreAction::add(vec![Flag::Seen]),
                silent: true,
            };
            assert_eq!(wire(&cmd), b"A001 UID STORE 7 +FLAGS.SILENT (\\Seen)\r\n");

            let cmd = Command::UidStore {
                uids: UidSet::single(uid(7)),
                action: StoreAction::set(vec![Flag::Flagged, Flag::Seen]).unchanged_since(99),
                silent: false,
            };
            assert_eq!(
                wire(&cmd),
                b"A001 UID STORE 7 (UNCHANGEDSINCE 99) FLAGS (\\Flagged \\Seen)\r\n"
            );
        }

        #[test]
        fn uid_search_combined() {
            let cmd = Command::UidSearch {
                criteria: SearchCriteria::And(vec![
                    SearchCriteria::Since("1-Feb-1994".to_string()),
                    SearchCriteria::Not(Box::new(SearchCriteria::Deleted)),
                ]),
            };
            assert_eq!(wire(&cmd), b"A001 UID SEARCH SINCE 1-Feb-1994 NOT DELETED\r\n");
        }

        #[test]
        fn uid_expunge() {
            let cmd = Command::UidExpunge {
                uids: UidSet::range(uid(100), uid(200)),
            };
            assert_eq!(wire(&cmd), b"A001 UID EXPUNGE 100:200\r\n");
        }
    }
}
