//! Command serialization helpers.
//!
//! Output is a list of segments. A segment ends after each synchronizing
//! literal header (`{n}\r\n`); the sender must wait for a `+`
//! continuation before writing the next one.

use super::types::{FetchAttribute, SearchCriteria, StoreAction, StoreOperation};

/// How literals are announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiteralMode {
    /// `{n}`: wait for the server's continuation.
    #[default]
    Synchronizing,
    /// `{n+}` (LITERAL+): send immediately.
    NonSynchronizing,
}

/// Accumulates command bytes, splitting at synchronizing literals.
#[derive(Debug)]
pub struct CommandWriter {
    mode: LiteralMode,
    segments: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl CommandWriter {
    pub const fn new(mode: LiteralMode) -> Self {
        Self {
            mode,
            segments: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.current.extend_from_slice(bytes);
    }

    pub fn push(&mut self, b: u8) {
        self.current.push(b);
    }

    /// Writes an astring: atom when possible, quoted when the content is
    /// quotable, a literal otherwise.
    pub fn astring(&mut self, s: &str) {
        if !s.is_empty() && s.bytes().all(is_astring_char) {
            self.raw(s.as_bytes());
        } else if s.bytes().all(is_quotable) {
            self.quoted(s);
        } else {
            self.literal(s.as_bytes());
        }
    }

    /// Writes a string that is never sent as an atom.
    pub fn string(&mut self, s: &str) {
        if s.bytes().all(is_quotable) {
            self.quoted(s);
        } else {
            self.literal(s.as_bytes());
        }
    }

    fn quoted(&mut self, s: &str) {
        self.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                self.push(b'\\');
            }
            self.push(b);
        }
        self.push(b'"');
    }

    fn literal(&mut self, data: &[u8]) {
        match self.mode {
            LiteralMode::Synchronizing => {
                self.raw(format!("{{{}}}\r\n", data.len()).as_bytes());
                self.segments.push(std::mem::take(&mut self.current));
            }
            LiteralMode::NonSynchronizing => {
                self.raw(format!("{{{}+}}\r\n", data.len()).as_bytes());
            }
        }
        self.raw(data);
    }

    /// Terminates the command with CRLF and returns its segments.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.raw(b"\r\n");
        self.segments.push(self.current);
        self.segments
    }

    pub fn fetch_attributes(&mut self, attrs: &[FetchAttribute]) {
        self.push(b'(');
        for (i, attr) in attrs.iter().enumerate() {
            if i > 0 {
                self.push(b' ');
            }
            self.fetch_attribute(attr);
        }
        self.push(b')');
    }

    fn fetch_attribute(&mut self, attr: &FetchAttribute) {
        match attr {
            FetchAttribute::Flags => self.raw(b"FLAGS"),
            FetchAttribute::InternalDate => self.raw(b"INTERNALDATE"),
            FetchAttribute::Rfc822Size => self.raw(b"RFC822.SIZE"),
            FetchAttribute::Envelope => self.raw(b"ENVELOPE"),
            FetchAttribute::BodyStructure => self.raw(b"BODYSTRUCTURE"),
            FetchAttribute::Uid => self.raw(b"UID"),
            FetchAttribute::ModSeq => self.raw(b"MODSEQ"),
            FetchAttribute::Body { section, peek } => {
                self.raw(if *peek { &b"BODY.PEEK["[..] } else { &b"BODY["[..] });
                if let Some(s) = section {
                    self.raw(s.as_bytes());
                }
                self.push(b']');
            }
        }
    }

    pub fn store_action(&mut self, action: &StoreAction, silent: bool) {
        if let Some(modseq) = action.unchanged_since {
            self.raw(format!("(UNCHANGEDSINCE {modseq}) ").as_bytes());
        }
        self.raw(match action.operation {
            StoreOperation::Set => &b"FLAGS"[..],
            StoreOperation::Add => &b"+FLAGS"[..],
            StoreOperation::Remove => &b"-FLAGS"[..],
        });
        if silent {
            self.raw(b".SILENT");
        }
        self.raw(b" (");
        for (i, flag) in action.flags.iter().enumerate() {
            if i > 0 {
                self.push(b' ');
            }
            self.raw(flag.as_str().as_bytes());
        }
        self.push(b')');
    }

    pub fn search_criteria(&mut self, criteria: &SearchCriteria) {
        match criteria {
            SearchCriteria::All => self.raw(b"ALL"),
            SearchCriteria::Seen => self.raw(b"SEEN"),
            SearchCriteria::Unseen => self.raw(b"UNSEEN"),
            SearchCriteria::Deleted => self.raw(b"DELETED"),
            SearchCriteria::Undeleted => self.raw(b"UNDELETED"),
            SearchCriteria::Flagged => self.raw(b"FLAGGED"),
            SearchCriteria::Uid(set) => {
                self.raw(b"UID ");
                self.raw(set.to_string().as_bytes());
            }
            SearchCriteria::Since(date) => {
                self.raw(b"SINCE ");
                self.raw(date.as_bytes());
            }
            SearchCriteria::ModSeq(modseq) => {
                self.raw(format!("MODSEQ {modseq}").as_bytes());
            }
            SearchCriteria::Not(inner) => {
                self.raw(b"NOT ");
                self.search_criteria(inner);
            }
            SearchCriteria::And(all) => {
                if all.is_empty() {
                    self.raw(b"ALL");
                }
                for (i, c) in all.iter().enumerate() {
                    if i > 0 {
                        self.push(b' ');
                    }
                    self.search_criteria(c);
                }
            }
        }
    }
}

/// ASTRING-CHAR: ATOM-CHAR or `]`.
const fn is_astring_char(b: u8) -> bool {
    b > 0x20
        && b < 0x7F
        && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\')
}

/// Bytes a quoted string may carry.
const fn is_quotable(b: u8) -> bool {
    b >= 0x20 && b < 0x7F
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

    fn one(f: impl FnOnce(&mut CommandWriter)) -> Vec<Vec<u8>> {
        let mut w = CommandWriter::new(LiteralMode::Synchronizing);
        f(&mut w);
        w.finish()
    }

    #[test]
    fn astring_forms() {
        assert_eq!(one(|w| w.astring("INBOX")), vec![b"INBOX\r\n".to_vec()]);
        assert_eq!(one(|w| w.astring("")), vec![b"\"\"\r\n".to_vec()]);
        assert_eq!(
            one(|w| w.astring("a \"b\"")),
            vec![b"\"a \\\"b\\\"\"\r\n".to_vec()]
        );
    }

    #[test]
    fn eight_bit_goes_literal() {
        let segments = one(|w| w.astring("caf\u{e9}"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], b"{5}\r\n".to_vec());
        assert_eq!(segments[1], b"caf\xc3\xa9\r\n".to_vec());
    }

    #[test]
    fn literal_plus_stays_in_one_segment() {
        let mut w = CommandWriter::new(LiteralMode::NonSynchronizing);
        w.astring("p\r\nw");
        assert_eq!(w.finish(), vec![b"{4+}\r\np\r\nw\r\n".to_vec()]);
    }
}
