//! Tags, sequence numbers, UIDs and UIDVALIDITY.

use std::num::NonZeroU32;

/// Command tag correlating a command with its tagged completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub String);

impl Tag {
    /// Creates a new tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message sequence number. Ephemeral: shifts when messages are expunged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(pub NonZeroU32);

impl SeqNum {
    /// Returns `None` for 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a message within one UIDVALIDITY epoch of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    /// Returns `None` for 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UIDVALIDITY of a mailbox. A change invalidates every cached UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidValidity(pub NonZeroU32);

impl UidValidity {
    /// Returns `None` for 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for UidValidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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

    mod tag_tests {
        use super::*;

        #[test]
        fn display_and_equality() {
            let tag = Tag::new("A0007");
            assert_eq!(tag.to_string(), "A0007");
            assert_eq!(tag, Tag::new(String::from("A0007")));
            assert_ne!(tag, Tag::new("A0008"));
        }
    }

    mod number_tests {
        use super::*;

        #[test]
        fn zero_is_rejected() {
            assert!(SeqNum::new(0).is_none());
            assert!(Uid::new(0).is_none());
            assert!(UidValidity::new(0).is_none());
        }

        #[test]
        fn uid_ordering_and_display() {
            let low = Uid::new(9).unwrap();
            let high = Uid::new(10).unwrap();
            assert!(low < high);
            assert_eq!(high.to_string(), "10");
            assert_eq!(Uid::new(u32::MAX).unwrap().get(), u32::MAX);
        }

        #[test]
        fn validity_compares_by_value() {
            assert_eq!(UidValidity::new(1700000000), UidValidity::new(1700000000));
            assert_ne!(UidValidity::new(1), UidValidity::new(2));
        }
    }
}
