//! FETCH response parsing.

use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;
use crate::{Error, Result};

use super::parse_flag_list;
use super::types::{Address, Envelope, FetchItem};

/// Parses a FETCH response.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(name) => {
                let upper = name.to_uppercase();
                match upper.as_str() {
                    "FLAGS" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Flags(parse_flag_list(lexer)?));
                    }
                    "UID" => {
                        lexer.expect_space()?;
                        let n = lexer.read_number()?;
                        let uid = Uid::new(n).ok_or_else(|| Error::Parse {
                            position: lexer.position(),
                            message: format!("invalid UID value: {n} (UID cannot be 0)"),
                        })?;
                        items.push(FetchItem::Uid(uid));
                    }
                    "RFC822.SIZE" => {
                        lexer.expect_space()?;
                        items.push(FetchItem::Rfc822Size(lexer.read_number()?));
                    }
                    "INTERNALDATE" => {
                        lexer.expect_space()?;
                        if let Token::QuotedString(date) = lexer.next_token()? {
                            items.push(FetchItem::InternalDate(date));
                        }
                    }
                    "ENVELOPE" => {
                        lexer.expect_space()?;
                        let envelope = parse_envelope(lexer)?;
                        items.push(FetchItem::Envelope(Box::new(envelope)));
                    }
                    "BODY" | "BINARY" | "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => {
                        // Without a section, BODY is the non-extensible
                        // BODYSTRUCTURE form.
                        if upper == "BODY" && lexer.peek() != Some(b'[') {
                            lexer.expect_space()?;
                            lexer.skip_value()?;
                            continue;
                        }
                        let (section, origin) = parse_body_section_and_origin(lexer)?;
                        let section = match upper.as_str() {
                            "RFC822.HEADER" => Some("HEADER".to_string()),
                            "RFC822.TEXT" => Some("TEXT".to_string()),
                            _ => section,
                        };

                        lexer.expect_space()?;
                        let data = match lexer.next_token()? {
                            Token::Literal(d) => Some(d),
                            Token::QuotedString(s) => Some(s.into_bytes()),
                            _ => None,
                        };

                        items.push(FetchItem::Body {
                            section,
                            origin,
                            data,
                        });
                    }
                    "MODSEQ" => {
                        lexer.expect_space()?;
                        lexer.expect(Token::LParen)?;
                        let n = lexer.read_u64()?;
                        lexer.expect(Token::RParen)?;
                        items.push(FetchItem::ModSeq(n));
                    }
                    _ => {
                        // BODYSTRUCTURE, EMAILID, X-GM-* and friends.
                        lexer.expect_space()?;
                        lexer.skip_value()?;
                    }
                }
            }
            token => {
                return Err(Error::Parse {
                    position: lexer.position(),
                    message: format!("Unexpected token in FETCH: {token:?}"),
                });
            }
        }
    }

    Ok(items)
}

/// Parses optional `[section]` and `<origin>` after BODY.
fn parse_body_section_and_origin(lexer: &mut Lexer<'_>) -> Result<(Option<String>, Option<u32>)> {
    let mut section = None;
    let mut origin = None;

    if lexer.peek() == Some(b'[') {
        lexer.advance();

        let mut buf = Vec::new();
        loop {
            match lexer.advance() {
                Some(b']') => break,
                Some(b) => buf.push(b),
                None => {
                    return Err(Error::Parse {
                        position: lexer.position(),
                        message: "Unterminated section".to_string(),
                    });
                }
            }
        }

        if !buf.is_empty() {
            section = Some(String::from_utf8_lossy(&buf).into_owned());
        }
    }

    if lexer.peek() == Some(b'<') {
        lexer.advance();

        let mut digits = String::new();
        while let Some(b) = lexer.peek()
            && b.is_ascii_digit()
        {
            digits.push(char::from(b));
            lexer.advance();
        }
        if lexer.advance() != Some(b'>') {
            return Err(Error::Parse {
                position: lexer.position(),
                message: "Expected > after origin".to_string(),
            });
        }
        origin = digits.parse().ok();
    }

    Ok((section, origin))
}

/// Parses an envelope structure.
pub fn parse_envelope(lexer: &mut Lexer<'_>) -> Result<Envelope> {
    lexer.expect(Token::LParen)?;

    let date = lexer.read_nstring()?;
    lexer.expect_space()?;
    let subject = lexer.read_nstring()?;
    lexer.expect_space()?;
    let from = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let sender = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let reply_to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let cc = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let bcc = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let in_reply_to = lexer.read_nstring()?;
    lexer.expect_space()?;
    let message_id = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(Envelope {
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    })
}

/// Parses an address list.
pub fn parse_address_list(lexer: &mut Lexer<'_>) -> Result<Vec<Address>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut addresses = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.advance();
                        break;
                    }
                    Some(b'(') => addresses.push(parse_address(lexer)?),
                    Some(b' ') => {
                        lexer.advance();
                    }
                    _ => {
                        return Err(Error::Parse {
                            position: lexer.position(),
                            message: "Malformed address list".to_string(),
                        });
                    }
                }
            }
            Ok(addresses)
        }
        token => Err(Error::Parse {
            position: lexer.position(),
            message: format!("Expected address list, got {token:?}"),
        }),
    }
}

fn parse_address(lexer: &mut Lexer<'_>) -> Result<Address> {
    lexer.expect(Token::LParen)?;

    let name = lexer.read_nstring()?;
    lexer.expect_space()?;
    let adl = lexer.read_nstring()?;
    lexer.expect_space()?;
    let mailbox = lexer.read_nstring()?;
    lexer.expect_space()?;
    let host = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(Address {
        name,
        adl,
        mailbox,
        host,
    })
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

    fn parse(data: &[u8]) -> Vec<FetchItem> {
        parse_fetch_response(&mut Lexer::new(data)).unwrap()
    }

    #[test]
    fn uid_and_flags() {
        let items = parse(b"(UID 123 FLAGS (\\Seen))");
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], FetchItem::Uid(uid) if uid.get() == 123));
        assert!(matches!(&items[1], FetchItem::Flags(f) if f.is_seen()));
    }

    #[test]
    fn uid_zero_rejected() {
        let result = parse_fetch_response(&mut Lexer::new(b"(UID 0)"));
        assert!(result.unwrap_err().to_string().contains("UID"));
    }

    #[test]
    fn modseq_beyond_u32() {
        let items = parse(b"(MODSEQ (90060115205545359) UID 4)");
        assert_eq!(items[0], FetchItem::ModSeq(90060115205545359));
    }

    #[test]
    fn header_fields_section_with_literal() {
        let items =
            parse(b"(UID 7 BODY[HEADER.FIELDS (SUBJECT MESSAGE-ID)] {15}\r\nSubject: hi\r\n\r\n)");
        match &items[1] {
            FetchItem::Body {
                section,
                origin,
                data,
            } => {
                assert_eq!(section.as_deref(), Some("HEADER.FIELDS (SUBJECT MESSAGE-ID)"));
                assert_eq!(*origin, None);
                assert_eq!(data.as_deref(), Some(&b"Subject: hi\r\n\r\n"[..]));
            }
            other => panic!("expected body, got {other:?}"),
        }
    }

    #[test]
    fn partial_body_origin() {
        let items = parse(b"(BODY[TEXT]<100> \"abc\")");
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: Some("TEXT".to_string()),
                origin: Some(100),
                data: Some(b"abc".to_vec()),
            }
        );
    }

    #[test]
    fn bodystructure_is_skipped() {
        let items = parse(
            b"(BODYSTRUCTURE ((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"utf-8\") NIL NIL \"7BIT\" 12 1) \"MIXED\") UID 9)",
        );
        assert_eq!(items, vec![FetchItem::Uid(Uid::new(9).unwrap())]);
    }

    #[test]
    fn unknown_items_are_skipped() {
        let items = parse(b"(X-GM-LABELS (\\Inbox \"Work\") RFC822.SIZE 44)");
        assert_eq!(items, vec![FetchItem::Rfc822Size(44)]);
    }

    #[test]
    fn envelope_with_addresses() {
        let data = b"(\"Mon, 7 Feb 1994 21:52:25 -0800\" \"subject\" ((\"Fred\" NIL \"fred\" \"example.org\")) NIL NIL NIL NIL NIL \"<a@x>\" \"<b@x>\")";
        let envelope = parse_envelope(&mut Lexer::new(data)).unwrap();

        assert_eq!(envelope.subject.as_deref(), Some("subject"));
        assert_eq!(envelope.from[0].email().as_deref(), Some("fred@example.org"));
        assert_eq!(envelope.in_reply_to.as_deref(), Some("<a@x>"));
        assert_eq!(envelope.message_id.as_deref(), Some("<b@x>"));
    }
}
