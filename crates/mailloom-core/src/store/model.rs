//! Store data models.

use mailloom_imap::{Flags, SpecialUse};
use mailloom_mime::Envelope;

/// Row id of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(pub i64);

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cached remote mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Row id.
    pub id: FolderId,
    /// Remote mailbox path.
    pub path: String,
    /// UIDVALIDITY the cached records belong to; `None` before the first sync.
    pub uid_validity: Option<u32>,
    /// Highest UID seen.
    pub highest_uid: u32,
    /// Role of the folder.
    pub special_use: Option<SpecialUse>,
}

/// Identity of a cached message: UIDs are only unique within a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    /// Folder.
    pub folder: FolderId,
    /// UID within the folder's current UIDVALIDITY.
    pub uid: u32,
}

impl MessageKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(folder: FolderId, uid: u32) -> Self {
        Self { folder, uid }
    }
}

/// Cached metadata of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Identity.
    pub key: MessageKey,
    /// Mod-sequence, when the server tracks them.
    pub modseq: Option<u64>,
    /// Flags.
    pub flags: Flags,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// Header summary.
    pub envelope: Envelope,
}

/// A message to insert; the folder is given by the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// UID.
    pub uid: u32,
    /// Mod-sequence.
    pub modseq: Option<u64>,
    /// Flags.
    pub flags: Flags,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// Header summary.
    pub envelope: Envelope,
}

/// New flags for a cached message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagUpdate {
    /// UID.
    pub uid: u32,
    /// Complete new flag set.
    pub flags: Flags,
    /// Mod-sequence of the change.
    pub modseq: Option<u64>,
}

/// Changes to one folder, applied atomically together with a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatch {
    /// Messages new to the cache. Already cached UIDs only get their flags
    /// refreshed.
    pub inserts: Vec<NewMessage>,
    /// Flag changes.
    pub flag_updates: Vec<FlagUpdate>,
    /// UIDs expunged remotely.
    pub removals: Vec<u32>,
}

impl SyncBatch {
    /// True when the batch changes nothing but the checkpoint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.flag_updates.is_empty() && self.removals.is_empty()
    }
}

/// How far a folder has been reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Epoch the cursor belongs to.
    pub uid_validity: u32,
    /// Highest UID applied.
    pub highest_uid: u32,
    /// Server HIGHESTMODSEQ fully applied.
    pub highest_modseq: Option<u64>,
}

/// What a committed batch actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    /// Link fields of the records that did not exist before.
    pub inserted: Vec<LinkFields>,
    /// Records that existed and were removed.
    pub removed: Vec<MessageKey>,
    /// Records whose flags changed.
    pub updated: usize,
}

impl AppliedBatch {
    /// True when no record changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && self.updated == 0
    }
}

/// The envelope fields conversations are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFields {
    /// Record identity.
    pub key: MessageKey,
    /// Own `Message-ID`.
    pub message_id: Option<String>,
    /// `References` then `In-Reply-To`, deduplicated.
    pub parents: Vec<String>,
    /// Raw subject.
    pub subject: Option<String>,
    /// Unix timestamp of the `Date` header.
    pub date: Option<i64>,
}

impl LinkFields {
    /// Extracts the link fields of an envelope.
    #[must_use]
    pub fn from_envelope(key: MessageKey, envelope: &Envelope) -> Self {
        Self {
            key,
            message_id: envelope.message_id.clone(),
            parents: envelope.parent_ids().into_iter().map(str::to_string).collect(),
            subject: envelope.subject.clone(),
            date: envelope.date.map(|d| d.timestamp()),
        }
    }
}

/// A full-text match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Matching record.
    pub key: MessageKey,
    /// BM25 score; lower is more relevant.
    pub rank: f64,
}
