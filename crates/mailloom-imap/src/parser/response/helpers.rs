//! Parser helper functions.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{
    Capability, Flag, Flags, ListResponse, Mailbox, MailboxAttribute, ResponseCode, SeqNum, Uid,
    UidSet, UidValidity,
};
use crate::{Error, Result};

use super::types::StatusItem;

fn parse_error(lexer: &Lexer<'_>, message: impl Into<String>) -> Error {
    Error::Parse {
        position: lexer.position(),
        message: message.into(),
    }
}

fn read_nonzero<T>(lexer: &mut Lexer<'_>, make: fn(u32) -> Option<T>, what: &str) -> Result<T> {
    let n = lexer.read_number()?;
    make(n).ok_or_else(|| parse_error(lexer, format!("Invalid {what} 0")))
}

/// Parses a response code.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let upper = atom.to_uppercase();

    let code = match upper.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "CLOSED" => ResponseCode::Closed,
        "UIDNEXT" => {
            lexer.expect_space()?;
            ResponseCode::UidNext(read_nonzero(lexer, Uid::new, "UID")?)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            ResponseCode::UidValidity(read_nonzero(lexer, UidValidity::new, "UIDVALIDITY")?)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            ResponseCode::Unseen(read_nonzero(lexer, SeqNum::new, "sequence number")?)
        }
        "HIGHESTMODSEQ" => {
            lexer.expect_space()?;
            ResponseCode::HighestModSeq(lexer.read_u64()?)
        }
        "MODIFIED" => {
            lexer.expect_space()?;
            ResponseCode::Modified(parse_uid_set(lexer)?)
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capability_data(lexer)?),
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            let flags = parse_flag_list(lexer)?;
            ResponseCode::PermanentFlags(flags.into_iter().collect())
        }
        _ => ResponseCode::Unknown(atom.to_string()),
    };

    // Unknown codes and trailing arguments are skipped.
    while lexer.peek() != Some(b']') && !lexer.is_eof() {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses capability data (also used for ENABLED).
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Atom(s) = lexer.next_token()? {
            caps.push(Capability::parse(s));
        }
    }

    Ok(caps)
}

/// Parses a flag list.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    lexer.expect(Token::LParen)?;

    let mut flags = Flags::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => flags.insert(Flag::parse(s)),
            Token::Space => {}
            token => {
                return Err(parse_error(
                    lexer,
                    format!("Unexpected token in flag list: {token:?}"),
                ));
            }
        }
    }

    Ok(flags)
}

/// Parses a UID set such as `1:3,7`.
pub fn parse_uid_set(lexer: &mut Lexer<'_>) -> Result<UidSet> {
    let text = match lexer.next_token()? {
        Token::Number(n) => n.to_string(),
        Token::Atom(s) => s.to_string(),
        token => return Err(parse_error(lexer, format!("Expected UID set, got {token:?}"))),
    };
    UidSet::parse(&text).ok_or_else(|| parse_error(lexer, format!("Invalid UID set: {text}")))
}

/// Parses a LIST response.
pub fn parse_list_response(lexer: &mut Lexer<'_>) -> Result<ListResponse> {
    lexer.expect(Token::LParen)?;
    let mut attributes = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => attributes.push(MailboxAttribute::parse(s)),
            Token::Space => {}
            token => {
                return Err(parse_error(
                    lexer,
                    format!("Unexpected token in LIST attributes: {token:?}"),
                ));
            }
        }
    }

    lexer.expect_space()?;

    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => return Err(parse_error(lexer, format!("Expected delimiter, got {token:?}"))),
    };

    lexer.expect_space()?;
    let mailbox_name = lexer.read_astring()?;

    // LIST-EXTENDED data is not interpreted.
    Ok(ListResponse {
        attributes,
        delimiter,
        mailbox: Mailbox::new(mailbox_name),
    })
}

/// Parses a SEARCH response, including the CONDSTORE `(MODSEQ n)` suffix.
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<(Vec<u32>, Option<u64>)> {
    let mut ids = Vec::new();
    let mut modseq = None;

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token()? {
            Token::Number(n) => {
                if let Ok(id) = u32::try_from(n)
                    && id > 0
                {
                    ids.push(id);
                }
            }
            Token::LParen => {
                let keyword = lexer.read_atom_string()?;
                if !keyword.eq_ignore_ascii_case("MODSEQ") {
                    return Err(parse_error(lexer, format!("Unexpected SEARCH data: {keyword}")));
                }
                lexer.expect_space()?;
                modseq = Some(lexer.read_u64()?);
                lexer.expect(Token::RParen)?;
            }
            Token::Crlf => break,
            token => return Err(parse_error(lexer, format!("Unexpected SEARCH token: {token:?}"))),
        }
    }

    Ok((ids, modseq))
}

/// Parses a STATUS response.
pub fn parse_status_response(lexer: &mut Lexer<'_>) -> Result<(Mailbox, Vec<StatusItem>)> {
    let mailbox_name = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(name) => {
                lexer.expect_space()?;
                let value = lexer.read_u64()?;
                let small = u32::try_from(value).ok();

                let item = match name.to_uppercase().as_str() {
                    "MESSAGES" => small.map(StatusItem::Messages),
                    "RECENT" => small.map(StatusItem::Recent),
                    "UIDNEXT" => small.and_then(Uid::new).map(StatusItem::UidNext),
                    "UIDVALIDITY" => small.and_then(UidValidity::new).map(StatusItem::UidValidity),
                    "UNSEEN" => small.map(StatusItem::Unseen),
                    "HIGHESTMODSEQ" => Some(StatusItem::HighestModSeq(value)),
                    _ => None,
                };
                items.extend(item);
            }
            Token::Eof => return Err(parse_error(lexer, "Unterminated STATUS list")),
            _ => {}
        }
    }

    Ok((Mailbox::new(mailbox_name), items))
}

/// Parses a VANISHED response body: optional `(EARLIER)` then a UID set.
pub fn parse_vanished(lexer: &mut Lexer<'_>) -> Result<(bool, UidSet)> {
    lexer.expect_space()?;
    let mut earlier = false;
    if lexer.peek() == Some(b'(') {
        lexer.expect(Token::LParen)?;
        let tag = lexer.read_atom_string()?;
        earlier = tag.eq_ignore_ascii_case("EARLIER");
        lexer.expect(Token::RParen)?;
        lexer.expect_space()?;
    }
    let uids = parse_uid_set(lexer)?;
    Ok((earlier, uids))
}
