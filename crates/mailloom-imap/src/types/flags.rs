//! Message flags.

use std::collections::BTreeSet;

/// A system flag or a keyword.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    /// `\Seen`
    Seen,
    /// `\Answered`
    Answered,
    /// `\Flagged`
    Flagged,
    /// `\Deleted`
    Deleted,
    /// `\Draft`
    Draft,
    /// `\Recent`. Session-scoped, never persisted.
    Recent,
    /// Any other flag or keyword, kept verbatim.
    Keyword(String),
}

impl Flag {
    /// Parses a flag. System flags match case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if !s.starts_with('\\') {
            return Self::Keyword(s.to_string());
        }
        match s[1..].to_ascii_lowercase().as_str() {
            "seen" => Self::Seen,
            "answered" => Self::Answered,
            "flagged" => Self::Flagged,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "recent" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Wire form of the flag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered flag set.
///
/// Two sets with the same members compare equal regardless of the order
/// the server listed them in, which keeps flag diffs idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    flags: BTreeSet<Flag>,
}

impl Flags {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: BTreeSet::new(),
        }
    }

    /// Parses a space-separated flag list such as `\Seen \Flagged $Label`.
    #[must_use]
    pub fn parse_list(s: &str) -> Self {
        s.split_whitespace().map(Flag::parse).collect()
    }

    /// Adds a flag.
    pub fn insert(&mut self, flag: Flag) {
        self.flags.insert(flag);
    }

    /// Removes a flag.
    pub fn remove(&mut self, flag: &Flag) {
        self.flags.remove(flag);
    }

    /// Returns true if the flag is present.
    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    /// `\Seen` is set.
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.contains(&Flag::Seen)
    }

    /// `\Flagged` is set.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.contains(&Flag::Flagged)
    }

    /// `\Deleted` is set.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.contains(&Flag::Deleted)
    }

    /// The set without session-only flags, suitable for caching.
    #[must_use]
    pub fn persistent(&self) -> Self {
        self.flags
            .iter()
            .filter(|f| **f != Flag::Recent)
            .cloned()
            .collect()
    }

    /// Iterates in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }

    /// Number of flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Space-separated canonical form, the inverse of [`Flags::parse_list`].
impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, flag) in self.flags.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(flag.as_str())?;
        }
        Ok(())
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Flags {
    type Item = Flag;
    type IntoIter = std::collections::btree_set::IntoIter<Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.into_iter()
    }
}

impl<'a> IntoIterator for &'a Flags {
    type Item = &'a Flag;
    type IntoIter = std::collections::btree_set::Iter<'a, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.flags.iter()
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

    mod flag_tests {
        use super::*;

        #[test]
        fn system_flags_ignore_case() {
            assert_eq!(Flag::parse("\\SEEN"), Flag::Seen);
            assert_eq!(Flag::parse("\\flagged"), Flag::Flagged);
            assert_eq!(Flag::Deleted.as_str(), "\\Deleted");
        }

        #[test]
        fn keywords_are_verbatim() {
            assert_eq!(Flag::parse("$Forwarded"), Flag::Keyword("$Forwarded".into()));
            assert_eq!(Flag::parse("\\Custom"), Flag::Keyword("\\Custom".into()));
        }
    }

    mod flags_tests {
        use super::*;

        #[test]
        fn order_does_not_matter() {
            let a = Flags::parse_list("\\Flagged \\Seen");
            let b = Flags::parse_list("\\Seen \\Flagged \\Seen");
            assert_eq!(a, b);
            assert_eq!(a.len(), 2);
        }

        #[test]
        fn display_round_trips() {
            let flags = Flags::parse_list("$Work \\Answered \\Seen");
            let text = flags.to_string();
            assert_eq!(Flags::parse_list(&text), flags);
            assert!(Flags::new().to_string().is_empty());
        }

        #[test]
        fn persistent_drops_recent() {
            let flags = Flags::parse_list("\\Recent \\Seen");
            let kept = flags.persistent();
            assert!(kept.is_seen());
            assert!(!kept.contains(&Flag::Recent));
        }

        #[test]
        fn insert_and_remove() {
            let mut flags = Flags::new();
            flags.insert(Flag::Deleted);
            assert!(flags.is_deleted());
            flags.remove(&Flag::Deleted);
            assert!(flags.is_empty());
        }
    }
}
