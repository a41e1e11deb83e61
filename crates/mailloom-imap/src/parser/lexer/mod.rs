//! IMAP lexer for tokenizing server responses.
//!
//! Breaks one complete response (as delivered by the framed reader,
//! literals included) into tokens following the RFC 9051 grammar.
//! Strings are decoded lossily: servers regularly send 8-bit data in
//! places the grammar says is ASCII, and one bad byte must not take the
//! connection down.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod token;

pub use token::Token;

use crate::{Error, Result};

/// IMAP lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Peeks at the byte at offset from current position.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skips n bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match byte {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match byte {
            b'\r' if self.peek_at(1) == Some(b'\n') => {
                self.skip(2);
                Ok(Token::Crlf)
            }
            b'\r' => Err(self.error("Expected LF after CR")),
            b'"' => self.read_quoted_string(),
            b'{' => self.read_literal(),
            b'~' if self.peek_at(1) == Some(b'{') => {
                self.advance();
                self.read_literal()
            }
            b'0'..=b'9' => self.read_number_or_atom(),
            _ if is_atom_char(byte) => self.read_atom(),
            _ => Err(self.error(&format!("Unexpected character: {byte:#04x}"))),
        }
    }

    fn read_quoted_string(&mut self) -> Result<Token<'a>> {
        self.advance();

        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                // Only `"` and `\` may be escaped; other escapes are kept as
                // the escaped byte.
                Some(b'\\') => match self.advance() {
                    Some(c) => bytes.push(c),
                    None => return Err(self.error("Unexpected EOF in quoted string")),
                },
                Some(b'\r' | b'\n') => return Err(self.error("Line break in quoted string")),
                Some(c) => bytes.push(c),
                None => return Err(self.error("Unexpected EOF in quoted string")),
            }
        }

        Ok(Token::QuotedString(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    }

    fn read_literal(&mut self) -> Result<Token<'a>> {
        self.advance();

        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        let digits = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid literal size"))?;
        let size: usize = digits
            .parse()
            .map_err(|_| self.error("Invalid literal size number"))?;

        // Non-synchronizing marker is only legal in client data but some
        // servers echo it.
        if self.peek() == Some(b'+') {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("Expected } after literal size"));
        }
        if self.advance() != Some(b'\r') || self.advance() != Some(b'\n') {
            return Err(self.error("Expected CRLF after literal size"));
        }

        let end = self
            .pos
            .checked_add(size)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| self.error("Incomplete literal data"))?;
        let data = self.input[self.pos..end].to_vec();
        self.pos = end;

        Ok(Token::Literal(data))
    }

    fn read_number_or_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        let s = self.atom_text(start)?;

        if s.bytes().all(|b| b.is_ascii_digit()) {
            let n: u64 = s.parse().map_err(|_| self.error("Number too large"))?;
            Ok(Token::Number(n))
        } else {
            Ok(Token::Atom(s))
        }
    }

    fn read_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;

        // `\*` in PERMANENTFLAGS is a flag, not an atom followed by `*`.
        if self.peek() == Some(b'\\') && self.peek_at(1) == Some(b'*') {
            self.skip(2);
            return Ok(Token::Atom(self.atom_text(start)?));
        }

        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        let s = self.atom_text(start)?;

        if s.eq_ignore_ascii_case("NIL") {
            Ok(Token::Nil)
        } else {
            Ok(Token::Atom(s))
        }
    }

    fn atom_text(&self, start: usize) -> Result<&'a str> {
        std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid UTF-8 in atom"))
    }

    /// Creates a parse error at the current position.
    fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Expects and consumes a specific token kind.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {expected:?}, got {token:?}")))
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads an astring (atom, number, quoted string or literal).
    pub fn read_astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::QuotedString(s) => Ok(s),
            Token::Literal(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            // A mailbox literally called NIL.
            Token::Nil => Ok("NIL".to_string()),
            token => Err(self.error(&format!("Expected astring, got {token:?}"))),
        }
    }

    /// Reads an nstring (NIL or string).
    pub fn read_nstring(&mut self) -> Result<Option<String>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::QuotedString(s) => Ok(Some(s)),
            Token::Literal(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            token => Err(self.error(&format!("Expected nstring, got {token:?}"))),
        }
    }

    /// Reads a 64-bit number.
    pub fn read_u64(&mut self) -> Result<u64> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {token:?}"))),
        }
    }

    /// Reads a 32-bit number.
    pub fn read_number(&mut self) -> Result<u32> {
        let n = self.read_u64()?;
        u32::try_from(n).map_err(|_| self.error(&format!("Number out of range: {n}")))
    }

    /// Reads an atom.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("Expected atom, got {token:?}"))),
        }
    }

    /// Skips optional spaces.
    pub fn skip_spaces(&mut self) {
        while self.peek() == Some(b' ') {
            self.advance();
        }
    }

    /// Skips one value of any shape: atom, string, literal, or a
    /// parenthesized list with arbitrary nesting. Brackets inside atoms
    /// such as `BODY[1.MIME]` are consumed with the atom.
    pub fn skip_value(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => {
                    return if depth == 0 {
                        Ok(())
                    } else {
                        Err(self.error("Unbalanced parentheses"))
                    };
                }
                Some(b'\r') if depth == 0 => return Ok(()),
                Some(b' ' | b')') if depth == 0 => return Ok(()),
                Some(b'(') => {
                    self.advance();
                    depth += 1;
                }
                Some(b')') => {
                    self.advance();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(b'[') => {
                    while self.peek().is_some_and(|b| b != b']') {
                        self.advance();
                    }
                    self.advance();
                }
                Some(b'"' | b'{' | b'~') => {
                    self.next_token()?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// Reads the rest of the line as text and consumes the CRLF.
    pub fn read_text_until_crlf(&mut self) -> String {
        let remaining = self.remaining();
        let end = remaining
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(remaining.len());

        self.skip(end);
        if self.peek() == Some(b'\r') {
            self.skip(2);
        }

        String::from_utf8_lossy(&remaining[..end]).into_owned()
    }
}

/// Returns true if the byte is a valid atom character.
///
/// `\` is accepted so flags like `\Seen` lex as one token, even though
/// RFC 9051 lists it among the quoted-specials.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    // atom-specials: ( ) { SP CTL % * " ]
    // `[` is legal in atoms but lexes separately so `BODY[...]` and
    // response codes split at the bracket.
    matches!(b,
        0x21 |
        0x23..=0x24 |
        0x26..=0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C |
        0x7E
    )
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

    fn tokens(input: &[u8]) -> Vec<Token<'_>> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::Eof {
                break;
            }
            out.push(token);
        }
        out
    }

    mod token_tests {
        use super::*;

        #[test]
        fn tagged_line() {
            assert_eq!(
                tokens(b"A0001 OK done\r\n"),
                vec![
                    Token::Atom("A0001"),
                    Token::Space,
                    Token::Atom("OK"),
                    Token::Space,
                    Token::Atom("done"),
                    Token::Crlf,
                ]
            );
        }

        #[test]
        fn modseq_exceeds_u32() {
            assert_eq!(
                tokens(b"(MODSEQ (90060115205545359))"),
                vec![
                    Token::LParen,
                    Token::Atom("MODSEQ"),
                    Token::Space,
                    Token::LParen,
                    Token::Number(90060115205545359),
                    Token::RParen,
                    Token::RParen,
                ]
            );
        }

        #[test]
        fn flags_including_wildcard() {
            assert_eq!(
                tokens(b"(\\Seen \\*)"),
                vec![
                    Token::LParen,
                    Token::Atom("\\Seen"),
                    Token::Space,
                    Token::Atom("\\*"),
                    Token::RParen,
                ]
            );
        }

        #[test]
        fn nil_in_any_case() {
            assert_eq!(tokens(b"nil"), vec![Token::Nil]);
            assert_eq!(tokens(b"NILS"), vec![Token::Atom("NILS")]);
        }

        #[test]
        fn quoted_with_escapes_and_latin1() {
            let mut lexer = Lexer::new(b"\"say \\\"hi\\\" caf\xe9\"");
            match lexer.next_token().unwrap() {
                Token::QuotedString(s) => {
                    assert!(s.starts_with("say \"hi\" caf"));
                    assert!(s.ends_with('\u{FFFD}'));
                }
                other => panic!("expected string, got {other:?}"),
            }
        }

        #[test]
        fn literal_and_binary_literal() {
            assert_eq!(tokens(b"{5}\r\nhello"), vec![Token::Literal(b"hello".to_vec())]);
            assert_eq!(tokens(b"~{2}\r\n\x00\x01"), vec![Token::Literal(vec![0, 1])]);
        }

        #[test]
        fn truncated_literal_is_an_error() {
            let mut lexer = Lexer::new(b"{10}\r\nshort");
            assert!(lexer.next_token().is_err());
        }

        #[test]
        fn bare_cr_is_an_error() {
            let mut lexer = Lexer::new(b"\rX");
            assert!(lexer.next_token().is_err());
        }
    }

    mod helper_tests {
        use super::*;

        #[test]
        fn read_number_rejects_large_values() {
            let mut lexer = Lexer::new(b"4294967296");
            assert!(lexer.read_number().is_err());
            let mut lexer = Lexer::new(b"4294967296");
            assert_eq!(lexer.read_u64().unwrap(), 4294967296);
        }

        #[test]
        fn skip_value_nested_list() {
            let mut lexer = Lexer::new(b"((\"TEXT\" \"PLAIN\" (\"a\" \")\") NIL)) {3}\r\nabc UID 4");
            lexer.skip_value().unwrap();
            assert_eq!(lexer.remaining(), b" {3}\r\nabc UID 4");
            lexer.skip_spaces();
            lexer.skip_value().unwrap();
            assert_eq!(lexer.remaining(), b" UID 4");
        }

        #[test]
        fn skip_value_atom_with_section() {
            let mut lexer = Lexer::new(b"X-THING[1 2] NEXT");
            lexer.skip_value().unwrap();
            assert_eq!(lexer.remaining(), b" NEXT");
        }

        #[test]
        fn text_until_crlf() {
            let mut lexer = Lexer::new(b"some text here\r\nrest");
            assert_eq!(lexer.read_text_until_crlf(), "some text here");
            assert_eq!(lexer.remaining(), b"rest");
        }

        #[test]
        fn atom_char_table() {
            for b in [b'A', b'z', b'0', b':', b'\\', b'.', b'$', b'<'] {
                assert!(is_atom_char(b), "{}", b as char);
            }
            for b in [b' ', b'(', b')', b'{', b'"', b'%', b'*', b'[', b']', 0x7f, b'\r'] {
                assert!(!is_atom_char(b), "{b:#x}");
            }
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
                let mut lexer = Lexer::new(&input);
                for _ in 0..512 {
                    match lexer.next_token() {
                        Ok(Token::Eof) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }

            #[test]
            fn numbers_round_trip(n in any::<u64>()) {
                let text = n.to_string();
                let mut lexer = Lexer::new(text.as_bytes());
                prop_assert_eq!(lexer.next_token().unwrap(), Token::Number(n));
            }

            #[test]
            fn quoted_strings_round_trip(s in "[ -~]{0,40}") {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                let wire = format!("\"{escaped}\"");
                let mut lexer = Lexer::new(wire.as_bytes());
                prop_assert_eq!(lexer.next_token().unwrap(), Token::QuotedString(s));
            }
        }
    }
}
