//! UID sets as used by UID commands and `VANISHED` responses.

use std::fmt;

use super::Uid;

/// Upper end of a UID range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidBound {
    /// A concrete UID.
    Value(Uid),
    /// `*`: the largest UID in the mailbox.
    Largest,
}

/// One inclusive range in a [`UidSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidRange {
    /// First UID.
    pub start: Uid,
    /// Last UID.
    pub end: UidBound,
}

impl UidRange {
    fn contains(&self, uid: Uid) -> bool {
        match self.end {
            UidBound::Value(end) => self.start <= uid && uid <= end,
            UidBound::Largest => self.start <= uid,
        }
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            UidBound::Value(end) if end == self.start => write!(f, "{}", self.start),
            UidBound::Value(end) => write!(f, "{}:{end}", self.start),
            UidBound::Largest => write!(f, "{}:*", self.start),
        }
    }
}

/// A set of UIDs in compact range form, e.g. `1:4,7,10:*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidSet {
    ranges: Vec<UidRange>,
}

impl UidSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// `1:*`, every message in the mailbox.
    #[must_use]
    pub fn all() -> Self {
        Self::from_start(Uid(std::num::NonZeroU32::MIN))
    }

    /// A single UID.
    #[must_use]
    pub fn single(uid: Uid) -> Self {
        Self::range(uid, uid)
    }

    /// An inclusive range. The bounds are swapped if given in reverse.
    #[must_use]
    pub fn range(start: Uid, end: Uid) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            ranges: vec![UidRange {
                start,
                end: UidBound::Value(end),
            }],
        }
    }

    /// `start:*`.
    #[must_use]
    pub fn from_start(start: Uid) -> Self {
        Self {
            ranges: vec![UidRange {
                start,
                end: UidBound::Largest,
            }],
        }
    }

    /// Builds the smallest range form of a list of UIDs. Order and
    /// duplicates in the input do not matter.
    pub fn from_uids(uids: impl IntoIterator<Item = Uid>) -> Self {
        let mut sorted: Vec<u32> = uids.into_iter().map(Uid::get).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<UidRange> = Vec::new();
        for n in sorted {
            let Some(uid) = Uid::new(n) else { continue };
            if let Some(UidRange {
                end: UidBound::Value(end),
                ..
            }) = ranges.last_mut()
                && end.get().checked_add(1) == Some(n)
            {
                *end = uid;
                continue;
            }
            ranges.push(UidRange {
                start: uid,
                end: UidBound::Value(uid),
            });
        }
        Self { ranges }
    }

    /// Parses the wire form (`1:3,5,9:*`). Returns `None` on malformed input.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut ranges = Vec::new();
        for part in s.split(',') {
            let (first, last) = match part.split_once(':') {
                Some((a, b)) => (a, Some(b)),
                None => (part, None),
            };
            let start = parse_bound(first)?;
            let end = match last {
                Some(b) => parse_bound(b)?,
                None => start,
            };
            let range = match (start, end) {
                (UidBound::Value(a), UidBound::Value(b)) => UidRange {
                    start: a.min(b),
                    end: UidBound::Value(a.max(b)),
                },
                (UidBound::Value(a), UidBound::Largest) | (UidBound::Largest, UidBound::Value(a)) => {
                    UidRange {
                        start: a,
                        end: UidBound::Largest,
                    }
                }
                (UidBound::Largest, UidBound::Largest) => return None,
            };
            ranges.push(range);
        }
        Some(Self { ranges })
    }

    /// Returns true if the set contains no ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The ranges in wire order.
    #[must_use]
    pub fn ranges(&self) -> &[UidRange] {
        &self.ranges
    }

    /// Returns true if `uid` is in the set.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.ranges.iter().any(|r| r.contains(uid))
    }

    /// Expands every bounded range into individual UIDs, ascending and
    /// deduplicated. Open-ended ranges contribute only their start.
    #[must_use]
    pub fn expand(&self) -> Vec<Uid> {
        let mut out: Vec<Uid> = Vec::new();
        for range in &self.ranges {
            match range.end {
                UidBound::Value(end) => {
                    out.extend((range.start.get()..=end.get()).filter_map(Uid::new));
                }
                UidBound::Largest => out.push(range.start),
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn parse_bound(s: &str) -> Option<UidBound> {
    if s == "*" {
        return Some(UidBound::Largest);
    }
    s.parse::<u32>().ok().and_then(Uid::new).map(UidBound::Value)
}

impl fmt::Display for UidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl FromIterator<Uid> for UidSet {
    fn from_iter<I: IntoIterator<Item = Uid>>(iter: I) -> Self {
        Self::from_uids(iter)
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

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    mod build_tests {
        use super::*;

        #[test]
        fn compresses_runs() {
            let set = UidSet::from_uids([7, 1, 2, 3, 3, 10, 9].map(uid));
            assert_eq!(set.to_string(), "1:3,7,9:10");
        }

        #[test]
        fn all_and_open_range() {
            assert_eq!(UidSet::all().to_string(), "1:*");
            assert_eq!(UidSet::from_start(uid(42)).to_string(), "42:*");
        }

        #[test]
        fn reversed_range_is_normalized() {
            assert_eq!(UidSet::range(uid(9), uid(4)).to_string(), "4:9");
        }

        #[test]
        fn empty_input() {
            let set = UidSet::from_uids(std::iter::empty());
            assert!(set.is_empty());
            assert_eq!(set.to_string(), "");
        }

        #[test]
        fn max_uid_does_not_overflow() {
            let set = UidSet::from_uids([u32::MAX - 1, u32::MAX].map(uid));
            assert_eq!(set.to_string(), format!("{}:{}", u32::MAX - 1, u32::MAX));
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn parses_vanished_payload() {
            let set = UidSet::parse("41,43:45,50:*").unwrap();
            assert!(set.contains(uid(41)));
            assert!(!set.contains(uid(42)));
            assert!(set.contains(uid(44)));
            assert!(set.contains(uid(9000)));
            assert_eq!(set.expand(), vec![uid(41), uid(43), uid(44), uid(45), uid(50)]);
        }

        #[test]
        fn star_first_is_accepted() {
            assert_eq!(UidSet::parse("*:5").unwrap().to_string(), "5:*");
        }

        #[test]
        fn rejects_garbage() {
            assert!(UidSet::parse("").is_none());
            assert!(UidSet::parse("1:x").is_none());
            assert!(UidSet::parse("0").is_none());
            assert!(UidSet::parse("*:*").is_none());
        }
    }
}
