//! Transfer and header encodings.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 encoded words and the
//! handful of charsets mail clients meet in practice.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length for Base64 and Quoted-Printable bodies.
const MAX_LINE_LENGTH: usize = 76;

/// Maximum raw bytes carried by one RFC 2047 encoded word.
const ENCODED_WORD_CHUNK: usize = 45;

/// Encodes data as Base64 on a single line.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 wrapped at 76 columns with CRLF line breaks.
#[must_use]
pub fn encode_base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2 + 2);
    for chunk in encoded.as_bytes().chunks(MAX_LINE_LENGTH) {
        // Base64 output is pure ASCII, so each chunk is valid UTF-8.
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes text using Quoted-Printable (RFC 2045).
///
/// Line breaks in the input are kept as hard CRLF breaks; long lines get
/// soft breaks; whitespace before a line break is escaped.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 8);

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        let bytes = line.as_bytes();
        let mut line_length = 0;

        for (pos, &byte) in bytes.iter().enumerate() {
            let is_last = pos + 1 == bytes.len();
            let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
                || ((byte == b' ' || byte == b'\t') && !is_last);
            let width = if literal { 1 } else { 3 };

            if line_length + width > MAX_LINE_LENGTH - 1 {
                result.push_str("=\r\n");
                line_length = 0;
            }

            if literal {
                result.push(byte as char);
            } else {
                let _ = write!(result, "={byte:02X}");
            }
            line_length += width;
        }
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Malformed escapes are passed through unchanged, as most readers do.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        match data.get(i + 1..) {
            Some([b'\r', b'\n', ..]) => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some([hi, lo, ..]) => match (hex_value(*hi), hex_value(*lo)) {
                (Some(hi), Some(lo)) => {
                    result.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    result.push(b'=');
                    i += 1;
                }
            },
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes bytes in the given charset into a `String`.
///
/// UTF-8, US-ASCII and the ISO-8859-1 family are handled; unknown
/// charsets fall back to lossy UTF-8.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: &str) -> String {
    match charset.trim().to_ascii_lowercase().as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1" | "windows-1252" | "cp1252" => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Encodes a header value as RFC 2047 encoded words when it is not plain
/// ASCII. ASCII input is returned unchanged.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) && !text.contains("=?") {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", encode_base64(chunk.as_bytes())));
    }
    words.join(" ")
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between adjacent encoded words is dropped; text that only
/// looks like an encoded word is left as is.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_encoded_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        if let Some((decoded, consumed)) = decode_encoded_word(candidate) {
            if !(after_encoded_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_encoded_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_encoded_word = false;
        }
    }

    out.push_str(rest);
    out
}

/// Decodes one `=?charset?enc?payload?=` word at the start of `input`,
/// returning the text and the number of bytes consumed.
fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let body = input.strip_prefix("=?")?;
    let (charset, after_charset) = body.split_once('?')?;
    let (encoding, after_encoding) = after_charset.split_once('?')?;
    let end = after_encoding.find("?=")?;
    let payload = &after_encoding[..end];

    if payload.contains(char::is_whitespace) || charset.is_empty() {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => decode_base64(payload).ok()?,
        "Q" | "q" => decode_q(payload),
        _ => return None,
    };

    // Strip an RFC 2231 language suffix such as `utf-8*en`.
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = 2 + charset_len(body) + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(&bytes, charset), consumed))
}

fn charset_len(body: &str) -> usize {
    body.find('?').unwrap_or(body.len())
}

fn decode_q(payload: &str) -> Vec<u8> {
    let spaced: Vec<u8> = payload
        .bytes()
        .map(|b| if b == b'_' { b' ' } else { b })
        .collect();
    decode_quoted_printable(&spaced)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64("SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_lines_wrap() {
        let data = vec![b'x'; 200];
        let encoded = encode_base64_lines(&data);
        for line in encoded.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= 76);
        }
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_quoted_printable_encode() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");

        let encoded = encode_quoted_printable("Héllo, Wørld!");
        assert!(encoded.contains("=C3=A9"));
    }

    #[test]
    fn test_quoted_printable_keeps_line_breaks() {
        let encoded = encode_quoted_printable("one \ntwo");
        assert_eq!(encoded, "one=20\r\ntwo");
    }

    #[test]
    fn test_quoted_printable_soft_breaks_long_lines() {
        let text = "a".repeat(200);
        let encoded = encode_quoted_printable(&text);
        assert!(encoded.split("\r\n").all(|line| line.len() <= 76));
        assert_eq!(decode_quoted_printable(encoded.as_bytes()), text.as_bytes());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"100=%"), b"100=%");
    }

    #[test]
    fn test_decode_charset_latin1() {
        assert_eq!(decode_charset(&[0x63, 0x61, 0x66, 0xE9], "ISO-8859-1"), "café");
        assert_eq!(decode_charset("naïve".as_bytes(), "utf-8"), "naïve");
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello"), "Hello");

        let encoded = encode_rfc2047("Héllo");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
        assert_eq!(decode_rfc2047(&encoded), "Héllo");
    }

    #[test]
    fn test_rfc2047_encode_splits_long_values() {
        let subject = "Ünïcödé ".repeat(10);
        let encoded = encode_rfc2047(&subject);
        assert!(encoded.split(' ').all(|word| word.len() <= 75));
        assert_eq!(decode_rfc2047(&encoded), subject);
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello"), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo_there?="), "Héllo there");
    }

    #[test]
    fn test_rfc2047_adjacent_words_drop_whitespace() {
        let decoded = decode_rfc2047("Re: =?utf-8?Q?caf=C3=A9?= =?utf-8?Q?_au_lait?= now");
        assert_eq!(decoded, "Re: café au lait now");
    }

    #[test]
    fn test_rfc2047_malformed_is_literal() {
        assert_eq!(decode_rfc2047("=?broken"), "=?broken");
        assert_eq!(decode_rfc2047("a =?x?Z?abc?= b"), "a =?x?Z?abc?= b");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn quoted_printable_single_line(text in "[^\r\n]{0,300}") {
                let encoded = encode_quoted_printable(&text);
                prop_assert!(encoded.split("\r\n").all(|line| line.len() <= 76));
                prop_assert_eq!(decode_quoted_printable(encoded.as_bytes()), text.as_bytes());
            }

            #[test]
            fn rfc2047_decode_never_panics(text in "\\PC{0,80}") {
                let _ = decode_rfc2047(&text);
            }

            #[test]
            fn rfc2047_encoded_words_decode(text in "\\PC{1,120}") {
                prop_assert_eq!(decode_rfc2047(&encode_rfc2047(&text)), text);
            }
        }
    }
}
