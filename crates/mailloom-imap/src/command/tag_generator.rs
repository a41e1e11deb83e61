//! IMAP command tag generator.
//!
//! Tags are used to match commands with their responses.

use crate::types::Tag;

/// Tag generator for IMAP commands.
///
/// Generates sequential tags in the format "A0001", "A0002", etc. The
/// counter wraps; a tag only has to be unique among outstanding commands.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> Tag {
        self.counter = self.counter.wrapping_add(1);
        Tag::new(format!("{}{:04}", self.prefix, self.counter))
    }

    /// Returns how many tags have been handed out (mod 2^32).
    #[must_use]
    pub const fn issued(&self) -> u32 {
        self.counter
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
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

    #[test]
    fn sequential_tags() {
        let mut generator = TagGenerator::default();
        assert_eq!(generator.next_tag().as_str(), "A0001");
        assert_eq!(generator.next_tag().as_str(), "A0002");
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn custom_prefix_and_padding() {
        let mut generator = TagGenerator::new('X');
        for _ in 0..99 {
            let _ = generator.next_tag();
        }
        assert_eq!(generator.next_tag().as_str(), "X0100");
    }

    #[test]
    fn unique_over_many() {
        let mut generator = TagGenerator::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10000 {
            assert!(seen.insert(generator.next_tag()), "duplicate tag generated");
        }
    }

    #[test]
    fn wraps_instead_of_panicking() {
        let mut generator = TagGenerator {
            counter: u32::MAX,
            prefix: 'A',
        };
        assert_eq!(generator.next_tag().as_str(), "A0000");
    }
}
