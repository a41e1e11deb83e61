//! IMAP token types.

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Atom (unquoted string without special characters).
    Atom(&'a str),
    /// Quoted string, unescaped.
    QuotedString(String),
    /// Literal payload of a `{n}` or `~{n}` string.
    Literal(Vec<u8>),
    /// Number. Mod-sequences need the full 63 bits.
    Number(u64),
    /// Opening parenthesis.
    LParen,
    /// Closing parenthesis.
    RParen,
    /// Opening bracket.
    LBracket,
    /// Closing bracket.
    RBracket,
    /// Space character.
    Space,
    /// Asterisk (untagged response prefix).
    Asterisk,
    /// Plus (continuation response prefix).
    Plus,
    /// NIL.
    Nil,
    /// CRLF line ending.
    Crlf,
    /// End of input.
    Eof,
}
