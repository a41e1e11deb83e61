//! IMAP response parser.
//!
//! Parses server responses according to RFC 9051 grammar, plus the
//! CONDSTORE/QRESYNC additions from RFC 7162.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::option_if_let_else)]

mod fetch;
mod helpers;
mod types;

pub use types::{Address, Envelope, FetchItem, StatusItem, UntaggedResponse};

use crate::parser::lexer::{Lexer, Token};
use crate::types::{ResponseCode, SeqNum, Status, Tag};
use crate::{Error, Result};

use helpers::{
    parse_capability_data, parse_list_response, parse_response_code, parse_search_response,
    parse_status_response, parse_vanished,
};

pub(crate) use helpers::parse_flag_list;

/// A parsed IMAP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged response (command completion).
    Tagged {
        /// The command tag.
        tag: Tag,
        /// Response status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged response (server data).
    Untagged(UntaggedResponse),
    /// Continuation request.
    Continuation {
        /// Optional text/data.
        text: Option<String>,
    },
}

/// Response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response, literals included.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);

        match lexer.next_token()? {
            Token::Asterisk => Self::parse_untagged(&mut lexer),
            Token::Plus => Ok(Self::parse_continuation(&mut lexer)),
            Token::Atom(tag) => Self::parse_tagged(&mut lexer, tag),
            token => Err(Error::Parse {
                position: 0,
                message: format!("Expected *, +, or tag, got {token:?}"),
            }),
        }
    }

    fn parse_tagged(lexer: &mut Lexer<'_>, tag_str: &str) -> Result<Response> {
        lexer.expect_space()?;
        let status = Self::parse_status(lexer)?;
        let (code, text) = Self::parse_resp_text(lexer)?;

        Ok(Response::Tagged {
            tag: Tag::new(tag_str),
            status,
            code,
            text,
        })
    }

    fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        lexer.expect_space()?;

        let untagged = match lexer.next_token()? {
            Token::Atom(s) => Self::parse_keyword_data(lexer, s)?,
            Token::Number(n) => Self::parse_message_data(lexer, n)?,
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in untagged response: {token:?}"),
                });
            }
        };

        Ok(Response::Untagged(untagged))
    }

    fn parse_keyword_data(lexer: &mut Lexer<'_>, keyword: &str) -> Result<UntaggedResponse> {
        let upper = keyword.to_uppercase();
        let response = match upper.as_str() {
            "OK" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Ok { code, text }
            }
            "NO" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::No { code, text }
            }
            "BAD" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Bad { code, text }
            }
            "PREAUTH" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::PreAuth { code, text }
            }
            "BYE" => {
                let (code, text) = Self::parse_resp_text(lexer)?;
                UntaggedResponse::Bye { code, text }
            }
            "CAPABILITY" => UntaggedResponse::Capability(parse_capability_data(lexer)?),
            "ENABLED" => UntaggedResponse::Enabled(parse_capability_data(lexer)?),
            "FLAGS" => {
                lexer.expect_space()?;
                UntaggedResponse::Flags(parse_flag_list(lexer)?)
            }
            "LIST" => {
                lexer.expect_space()?;
                UntaggedResponse::List(parse_list_response(lexer)?)
            }
            "SEARCH" => {
                let (ids, modseq) = parse_search_response(lexer)?;
                UntaggedResponse::Search { ids, modseq }
            }
            "STATUS" => {
                lexer.expect_space()?;
                let (mailbox, items) = parse_status_response(lexer)?;
                UntaggedResponse::Status { mailbox, items }
            }
            "VANISHED" => {
                let (earlier, uids) = parse_vanished(lexer)?;
                UntaggedResponse::Vanished { earlier, uids }
            }
            _ => UntaggedResponse::Other { keyword: upper },
        };
        Ok(response)
    }

    fn parse_message_data(lexer: &mut Lexer<'_>, n: u64) -> Result<UntaggedResponse> {
        let n = u32::try_from(n).map_err(|_| Error::Parse {
            position: lexer.position(),
            message: format!("Message number out of range: {n}"),
        })?;
        lexer.expect_space()?;
        let keyword = lexer.read_atom_string()?;
        let upper = keyword.to_uppercase();

        let position = lexer.position();
        let seq = || {
            SeqNum::new(n).ok_or_else(|| Error::Parse {
                position,
                message: "Invalid sequence number 0".to_string(),
            })
        };

        match upper.as_str() {
            "EXISTS" => Ok(UntaggedResponse::Exists(n)),
            "RECENT" => Ok(UntaggedResponse::Recent(n)),
            "EXPUNGE" => Ok(UntaggedResponse::Expunge(seq()?)),
            "FETCH" => {
                let seq = seq()?;
                lexer.expect_space()?;
                let items = fetch::parse_fetch_response(lexer)?;
                Ok(UntaggedResponse::Fetch { seq, items })
            }
            _ => Ok(UntaggedResponse::Other { keyword: upper }),
        }
    }

    fn parse_continuation(lexer: &mut Lexer<'_>) -> Response {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }
        let text = lexer.read_text_until_crlf();

        Response::Continuation {
            text: if text.is_empty() { None } else { Some(text) },
        }
    }

    fn parse_status(lexer: &mut Lexer<'_>) -> Result<Status> {
        let s = lexer.read_atom_string()?;
        match s.to_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "NO" => Ok(Status::No),
            "BAD" => Ok(Status::Bad),
            "PREAUTH" => Ok(Status::PreAuth),
            "BYE" => Ok(Status::Bye),
            _ => Err(Error::Parse {
                position: lexer.position(),
                message: format!("Invalid status: {s}"),
            }),
        }
    }

    /// Parses `[SP] ["[" code "]" SP] text`. The space before the text is
    /// optional because some servers send `A1 OK\r\n`.
    fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        let code = if lexer.peek() == Some(b'[') {
            Some(parse_response_code(lexer)?)
        } else {
            None
        };

        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        Ok((code, lexer.read_text_until_crlf()))
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
    use crate::types::{Capability, Flag, MailboxAttribute, ResponseCode, Uid};

    use super::*;

    fn untagged(input: &[u8]) -> UntaggedResponse {
        match ResponseParser::parse(input).unwrap() {
            Response::Untagged(u) => u,
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn greeting() {
            match untagged(b"* OK IMAP4rev2 server ready\r\n") {
                UntaggedResponse::Ok { code, text } => {
                    assert!(code.is_none());
                    assert_eq!(text, "IMAP4rev2 server ready");
                }
                other => panic!("expected OK, got {other:?}"),
            }
        }

        #[test]
        fn tagged_ok() {
            match ResponseParser::parse(b"A0001 OK LOGIN completed\r\n").unwrap() {
                Response::Tagged {
                    tag,
                    status,
                    code,
                    text,
                } => {
                    assert_eq!(tag.as_str(), "A0001");
                    assert_eq!(status, Status::Ok);
                    assert!(code.is_none());
                    assert_eq!(text, "LOGIN completed");
                }
                other => panic!("expected tagged, got {other:?}"),
            }
        }

        #[test]
        fn tagged_without_text() {
            match ResponseParser::parse(b"A0002 OK\r\n").unwrap() {
                Response::Tagged { status, text, .. } => {
                    assert_eq!(status, Status::Ok);
                    assert_eq!(text, "");
                }
                other => panic!("expected tagged, got {other:?}"),
            }
        }

        #[test]
        fn tagged_no_with_code() {
            match ResponseParser::parse(b"A0003 NO [TRYCREATE] No such mailbox\r\n").unwrap() {
                Response::Tagged { status, code, .. } => {
                    assert_eq!(status, Status::No);
                    assert_eq!(code, Some(ResponseCode::TryCreate));
                }
                other => panic!("expected tagged, got {other:?}"),
            }
        }

        #[test]
        fn continuation() {
            assert_eq!(
                ResponseParser::parse(b"+ Ready for literal\r\n").unwrap(),
                Response::Continuation {
                    text: Some("Ready for literal".to_string())
                }
            );
            assert_eq!(
                ResponseParser::parse(b"+\r\n").unwrap(),
                Response::Continuation { text: None }
            );
        }

        #[test]
        fn bye() {
            assert!(matches!(
                untagged(b"* BYE Autologout; idle for too long\r\n"),
                UntaggedResponse::Bye { .. }
            ));
        }
    }

    mod code_tests {
        use super::*;

        fn code_of(input: &[u8]) -> ResponseCode {
            match untagged(input) {
                UntaggedResponse::Ok { code: Some(c), .. } => c,
                other => panic!("expected OK with code, got {other:?}"),
            }
        }

        #[test]
        fn uidvalidity() {
            assert!(matches!(
                code_of(b"* OK [UIDVALIDITY 1234567890] UIDs valid\r\n"),
                ResponseCode::UidValidity(v) if v.get() == 1_234_567_890
            ));
        }

        #[test]
        fn highestmodseq_u64() {
            assert_eq!(
                code_of(b"* OK [HIGHESTMODSEQ 90060115205545359] Highest\r\n"),
                ResponseCode::HighestModSeq(90060115205545359)
            );
        }

        #[test]
        fn permanentflags_with_wildcard() {
            match code_of(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n") {
                ResponseCode::PermanentFlags(flags) => {
                    assert!(flags.contains(&Flag::Seen));
                    assert!(flags.contains(&Flag::Keyword("\\*".to_string())));
                }
                other => panic!("expected PERMANENTFLAGS, got {other:?}"),
            }
        }

        #[test]
        fn capability_code() {
            match code_of(b"* OK [CAPABILITY IMAP4rev1 IDLE CONDSTORE] ready\r\n") {
                ResponseCode::Capability(caps) => {
                    assert!(caps.contains(&Capability::Idle));
                    assert!(caps.contains(&Capability::CondStore));
                }
                other => panic!("expected CAPABILITY, got {other:?}"),
            }
        }

        #[test]
        fn closed_and_unknown() {
            assert_eq!(
                code_of(b"* OK [CLOSED] Previous mailbox closed\r\n"),
                ResponseCode::Closed
            );
            assert_eq!(
                code_of(b"* OK [X-WHATEVER 1 2 3] hi\r\n"),
                ResponseCode::Unknown("X-WHATEVER".to_string())
            );
        }

        #[test]
        fn modified_set() {
            match ResponseParser::parse(b"A0005 OK [MODIFIED 7,9] Conditional STORE failed\r\n")
                .unwrap()
            {
                Response::Tagged {
                    code: Some(ResponseCode::Modified(set)),
                    ..
                } => assert!(set.contains(Uid::new(7).unwrap())),
                other => panic!("expected MODIFIED, got {other:?}"),
            }
        }
    }

    mod data_tests {
        use super::*;

        #[test]
        fn capability() {
            match untagged(b"* CAPABILITY IMAP4rev1 IDLE NAMESPACE\r\n") {
                UntaggedResponse::Capability(caps) => {
                    assert!(caps.contains(&Capability::Imap4Rev1));
                    assert!(caps.contains(&Capability::Idle));
                }
                other => panic!("expected CAPABILITY, got {other:?}"),
            }
        }

        #[test]
        fn enabled() {
            assert_eq!(
                untagged(b"* ENABLED QRESYNC\r\n"),
                UntaggedResponse::Enabled(vec![Capability::QResync])
            );
        }

        #[test]
        fn exists_and_expunge() {
            assert_eq!(untagged(b"* 23 EXISTS\r\n"), UntaggedResponse::Exists(23));
            assert!(matches!(
                untagged(b"* 4 EXPUNGE\r\n"),
                UntaggedResponse::Expunge(seq) if seq.get() == 4
            ));
        }

        #[test]
        fn flags() {
            match untagged(b"* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n") {
                UntaggedResponse::Flags(flags) => {
                    assert!(flags.contains(&Flag::Seen));
                    assert!(flags.contains(&Flag::Answered));
                    assert!(flags.is_flagged());
                }
                other => panic!("expected FLAGS, got {other:?}"),
            }
        }

        #[test]
        fn list() {
            match untagged(b"* LIST (\\HasChildren) \"/\" \"INBOX\"\r\n") {
                UntaggedResponse::List(list) => {
                    assert!(list.attributes.contains(&MailboxAttribute::HasChildren));
                    assert_eq!(list.delimiter, Some('/'));
                    assert_eq!(list.mailbox.as_str(), "INBOX");
                }
                other => panic!("expected LIST, got {other:?}"),
            }
        }

        #[test]
        fn search_plain_and_modseq() {
            assert_eq!(
                untagged(b"* SEARCH 1 2 3 5 8 13\r\n"),
                UntaggedResponse::Search {
                    ids: vec![1, 2, 3, 5, 8, 13],
                    modseq: None
                }
            );
            assert_eq!(
                untagged(b"* SEARCH 2 5 (MODSEQ 917162500)\r\n"),
                UntaggedResponse::Search {
                    ids: vec![2, 5],
                    modseq: Some(917162500)
                }
            );
            assert_eq!(
                untagged(b"* SEARCH\r\n"),
                UntaggedResponse::Search {
                    ids: vec![],
                    modseq: None
                }
            );
        }

        #[test]
        fn status() {
            match untagged(b"* STATUS blurdybloop (MESSAGES 231 UIDNEXT 44292 HIGHESTMODSEQ 7011231777)\r\n") {
                UntaggedResponse::Status { mailbox, items } => {
                    assert_eq!(mailbox.as_str(), "blurdybloop");
                    assert!(items.contains(&StatusItem::Messages(231)));
                    assert!(items.contains(&StatusItem::HighestModSeq(7011231777)));
                }
                other => panic!("expected STATUS, got {other:?}"),
            }
        }

        #[test]
        fn fetch() {
            match untagged(b"* 1 FETCH (FLAGS (\\Seen) UID 12345)\r\n") {
                UntaggedResponse::Fetch { seq, items } => {
                    assert_eq!(seq.get(), 1);
                    assert!(items.iter().any(|i| matches!(i, FetchItem::Uid(uid) if uid.get() == 12345)));
                    assert!(items.iter().any(|i| matches!(i, FetchItem::Flags(f) if f.is_seen())));
                }
                other => panic!("expected FETCH, got {other:?}"),
            }
        }

        #[test]
        fn vanished() {
            match untagged(b"* VANISHED (EARLIER) 300:310,405,411\r\n") {
                UntaggedResponse::Vanished { earlier, uids } => {
                    assert!(earlier);
                    assert!(uids.contains(Uid::new(305).unwrap()));
                    assert!(uids.contains(Uid::new(411).unwrap()));
                    assert!(!uids.contains(Uid::new(311).unwrap()));
                }
                other => panic!("expected VANISHED, got {other:?}"),
            }
            match untagged(b"* VANISHED 41\r\n") {
                UntaggedResponse::Vanished { earlier, uids } => {
                    assert!(!earlier);
                    assert_eq!(uids.expand(), vec![Uid::new(41).unwrap()]);
                }
                other => panic!("expected VANISHED, got {other:?}"),
            }
        }

        #[test]
        fn unknown_data_is_tolerated() {
            assert_eq!(
                untagged(b"* NAMESPACE ((\"\" \"/\")) NIL NIL\r\n"),
                UntaggedResponse::Other {
                    keyword: "NAMESPACE".to_string()
                }
            );
            assert_eq!(
                untagged(b"* 3 X-ODD data\r\n"),
                UntaggedResponse::Other {
                    keyword: "X-ODD".to_string()
                }
            );
        }

        #[test]
        fn garbage_is_a_parse_error() {
            assert!(ResponseParser::parse(b"(((\r\n").is_err());
            assert!(ResponseParser::parse(b"* 1 FETCH (UID\r\n").is_err());
        }
    }
}
