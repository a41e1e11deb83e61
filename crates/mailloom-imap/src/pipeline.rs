//! Command pipelining policy.
//!
//! IMAP allows sending multiple commands before receiving responses
//! (RFC 9051 Section 5.5). The session batches queued requests when the
//! server and the commands allow it:
//!
//! - commands must not depend on each other's results
//! - commands that change the selected state (SELECT, IDLE, LOGOUT, ...)
//!   are barriers and always go alone
//! - commands with literals need LITERAL+ to be batched, since a
//!   synchronizing literal stalls the batch on a continuation

#![allow(clippy::missing_const_for_fn)]

use std::collections::VecDeque;

use crate::command::Command;
use crate::types::{Capability, Tag};

/// Default maximum pipeline depth.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Maximum allowed pipeline depth.
pub const MAX_PIPELINE_DEPTH: usize = 32;

/// Configuration for command pipelining.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of commands in one batch.
    pub max_depth: usize,
    /// Whether to pipeline at all.
    pub enabled: bool,
    /// Whether literals may be pipelined (set from LITERAL+).
    pub allow_literals: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            enabled: true,
            allow_literals: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a new pipeline configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum pipeline depth.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.clamp(1, MAX_PIPELINE_DEPTH);
        self
    }

    /// Enables or disables pipelining.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adjusts the configuration to what the server advertised.
    ///
    /// Every `IMAP4rev1`/`IMAP4rev2` server must accept pipelined commands;
    /// anything else is served one command at a time.
    #[must_use]
    pub fn for_capabilities(mut self, caps: &[Capability]) -> Self {
        let rev = caps
            .iter()
            .any(|c| matches!(c, Capability::Imap4Rev1 | Capability::Imap4Rev2));
        self.enabled &= rev;
        self.allow_literals = caps.contains(&Capability::LiteralPlus);
        self
    }

    /// Returns `true` if `next` may join a batch that already holds
    /// `batch_len` commands.
    #[must_use]
    pub fn admits(&self, batch_len: usize, next: &Command) -> bool {
        if batch_len == 0 {
            return true;
        }
        self.enabled
            && batch_len < self.max_depth
            && next.is_pipelineable()
            && (self.allow_literals || !next.has_literal())
    }
}

/// Classification of commands for pipelining safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineSafety {
    /// No state changes, no dependencies.
    Safe,
    /// Touches messages but not the session state; safe among UID
    /// commands.
    Caution,
    /// Changes session state or needs the connection to itself.
    Unsafe,
}

impl Command {
    /// Returns whether this command can be safely pipelined.
    #[must_use]
    pub fn pipeline_safety(&self) -> PipelineSafety {
        match self {
            Self::Noop | Self::Capability | Self::List { .. } | Self::Status { .. } => {
                PipelineSafety::Safe
            }

            Self::UidFetch { .. } | Self::UidSearch { .. } | Self::UidStore { .. } => {
                PipelineSafety::Caution
            }

            Self::Login { .. }
            | Self::Authenticate { .. }
            | Self::StartTls
            | Self::Logout
            | Self::Enable { .. }
            | Self::Select { .. }
            | Self::Examine { .. }
            | Self::Close
            | Self::Expunge
            | Self::UidExpunge { .. }
            | Self::Idle
            | Self::Done => PipelineSafety::Unsafe,
        }
    }

    /// Returns `true` if this command can be pipelined.
    #[must_use]
    pub fn is_pipelineable(&self) -> bool {
        !matches!(self.pipeline_safety(), PipelineSafety::Unsafe)
    }

    /// Returns `true` if encoding this command needs a literal.
    #[must_use]
    pub fn has_literal(&self) -> bool {
        self.encode(&Tag::new("X"), crate::command::LiteralMode::Synchronizing)
            .len()
            > 1
    }
}

/// Tags written but not yet completed, oldest first.
///
/// Untagged data is attributed to the oldest outstanding command, which
/// is correct for the command kinds the policy lets into one batch.
#[derive(Debug, Default)]
pub struct InFlight {
    tags: VecDeque<Tag>,
}

impl InFlight {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a written command.
    pub fn push(&mut self, tag: Tag) {
        self.tags.push_back(tag);
    }

    /// Marks a command as completed and returns its position in the queue.
    pub fn complete(&mut self, tag: &Tag) -> Option<usize> {
        let pos = self.tags.iter().position(|t| t == tag)?;
        if pos != 0 {
            tracing::warn!(
                tag = %tag,
                expected = ?self.tags.front(),
                "completion arrived out of order"
            );
        }
        self.tags.remove(pos);
        Some(pos)
    }

    /// Returns the oldest outstanding tag.
    #[must_use]
    pub fn oldest(&self) -> Option<&Tag> {
        self.tags.front()
    }

    /// Number of outstanding commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
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
    use crate::command::{FetchAttribute, SearchCriteria};
    use crate::types::{Mailbox, UidSet};

    fn fetch() -> Command {
        Command::UidFetch {
            uids: UidSet::all(),
            items: vec![FetchAttribute::Flags],
            changed_since: None,
            vanished: false,
        }
    }

    fn select() -> Command {
        Command::Select {
            mailbox: Mailbox::new("INBOX"),
            condstore: false,
        }
    }

    #[test]
    fn config_builder_clamps_depth() {
        assert_eq!(PipelineConfig::new().max_depth(100).max_depth, MAX_PIPELINE_DEPTH);
        assert_eq!(PipelineConfig::new().max_depth(0).max_depth, 1);
    }

    #[test]
    fn capabilities_gate_pipelining() {
        let none = PipelineConfig::new().for_capabilities(&[]);
        assert!(!none.admits(1, &Command::Noop));

        let rev1 = PipelineConfig::new().for_capabilities(&[Capability::Imap4Rev1]);
        assert!(rev1.admits(1, &Command::Noop));
        assert!(!rev1.allow_literals);

        let plus = PipelineConfig::new()
            .for_capabilities(&[Capability::Imap4Rev2, Capability::LiteralPlus]);
        assert!(plus.allow_literals);
    }

    #[test]
    fn barriers_never_join() {
        let config = PipelineConfig::new();
        assert!(config.admits(0, &select()));
        assert!(!config.admits(1, &select()));
        assert!(!config.admits(1, &Command::Idle));
        assert!(config.admits(1, &fetch()));
    }

    #[test]
    fn literal_needs_literal_plus() {
        let config = PipelineConfig::new();
        let cmd = Command::Status {
            mailbox: Mailbox::new("Entw\u{fc}rfe"),
            items: vec![],
        };
        assert!(cmd.has_literal());
        assert!(!config.admits(1, &cmd));
        assert!(PipelineConfig { allow_literals: true, ..config }.admits(1, &cmd));
    }

    #[test]
    fn safety_classes() {
        assert_eq!(Command::Noop.pipeline_safety(), PipelineSafety::Safe);
        assert_eq!(fetch().pipeline_safety(), PipelineSafety::Caution);
        assert_eq!(select().pipeline_safety(), PipelineSafety::Unsafe);
        assert_eq!(
            Command::UidSearch {
                criteria: SearchCriteria::All
            }
            .pipeline_safety(),
            PipelineSafety::Caution
        );
    }

    #[test]
    fn in_flight_tracks_oldest() {
        let mut in_flight = InFlight::new();
        in_flight.push(Tag::new("A0001"));
        in_flight.push(Tag::new("A0002"));
        assert_eq!(in_flight.oldest(), Some(&Tag::new("A0001")));
        assert_eq!(in_flight.complete(&Tag::new("A0001")), Some(0));
        assert_eq!(in_flight.complete(&Tag::new("A0001")), None);
        assert_eq!(in_flight.len(), 1);
    }
}
