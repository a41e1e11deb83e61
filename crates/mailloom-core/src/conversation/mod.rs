//! Conversation grouping.
//!
//! [`ConversationIndex`] is the union-find link index. [`Conversations`]
//! owns one per account behind a lock, so readers only ever see whole
//! batches, and notifies [`ConversationFeed`]s after each batch.

mod index;
mod subject;

use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, watch};

pub use index::{ConversationDelta, ConversationId, ConversationIndex, ConversationSummary};
pub use subject::normalize_subject;

use crate::store::{FolderId, LinkFields, MessageKey};

/// Shared, live conversation state of one account.
#[derive(Debug)]
pub struct Conversations {
    index: RwLock<ConversationIndex>,
    generation: watch::Sender<u64>,
}

impl Conversations {
    /// Indexes the given records.
    #[must_use]
    pub fn new(records: Vec<LinkFields>) -> Self {
        let index = ConversationIndex::from_records(records);
        tracing::debug!(
            records = index.record_count(),
            conversations = index.conversation_count(),
            "conversation index built"
        );
        Self {
            index: RwLock::new(index),
            generation: watch::Sender::new(0),
        }
    }

    /// Applies a committed batch and wakes subscribers.
    pub async fn apply(&self, delta: ConversationDelta) {
        if delta.is_empty() {
            return;
        }
        self.index.write().await.apply(delta);
        self.generation.send_modify(|g| *g += 1);
    }

    /// Conversations with a member in `folder`, newest first.
    pub async fn in_folder(&self, folder: FolderId) -> Vec<ConversationSummary> {
        self.index.read().await.conversations_in_folder(folder)
    }

    /// Conversation of a record.
    pub async fn conversation_of(&self, key: MessageKey) -> Option<ConversationId> {
        self.index.read().await.conversation_of(key)
    }

    /// Members of the conversation containing `key`, including `key`.
    pub async fn thread_of(&self, key: MessageKey) -> Vec<MessageKey> {
        let index = self.index.read().await;
        index
            .conversation_of(key)
            .map(|id| index.members(id))
            .unwrap_or_default()
    }

    /// Live listing of one folder.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, folder: FolderId) -> ConversationFeed {
        ConversationFeed {
            folder,
            conversations: Arc::downgrade(self),
            changes: self.generation.subscribe(),
        }
    }
}

/// Folder listing that follows committed batches.
#[derive(Debug)]
pub struct ConversationFeed {
    folder: FolderId,
    conversations: Weak<Conversations>,
    changes: watch::Receiver<u64>,
}

impl ConversationFeed {
    /// The folder being listed.
    #[must_use]
    pub const fn folder(&self) -> FolderId {
        self.folder
    }

    /// Current listing; empty once the account is closed.
    pub async fn current(&mut self) -> Vec<ConversationSummary> {
        self.changes.mark_unchanged();
        match self.conversations.upgrade() {
            Some(conversations) => conversations.in_folder(self.folder).await,
            None => Vec::new(),
        }
    }

    /// Waits for the next batch and returns the new listing. Returns `None`
    /// once the account is closed.
    pub async fn next(&mut self) -> Option<Vec<ConversationSummary>> {
        self.changes.changed().await.ok()?;
        let conversations = self.conversations.upgrade()?;
        Some(conversations.in_folder(self.folder).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fields(uid: u32, id: &str, parents: &[&str]) -> LinkFields {
        LinkFields {
            key: MessageKey::new(FolderId(1), uid),
            message_id: Some(id.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            subject: Some(format!("subject {uid}")),
            date: Some(i64::from(uid)),
        }
    }

    #[tokio::test]
    async fn feed_follows_batches() {
        let conversations = Arc::new(Conversations::new(vec![fields(1, "a@x", &[])]));
        let mut feed = conversations.subscribe(FolderId(1));
        assert_eq!(feed.current().await.len(), 1);

        conversations
            .apply(ConversationDelta {
                inserted: vec![fields(2, "b@x", &["a@x"]), fields(3, "c@x", &[])],
                removed: Vec::new(),
            })
            .await;
        let listing = feed.next().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].members, vec![MessageKey::new(FolderId(1), 3)]);

        let thread = conversations.thread_of(MessageKey::new(FolderId(1), 2)).await;
        assert_eq!(thread.len(), 2);
    }

    #[tokio::test]
    async fn empty_delta_does_not_wake() {
        let conversations = Arc::new(Conversations::new(Vec::new()));
        let mut feed = conversations.subscribe(FolderId(1));
        conversations.apply(ConversationDelta::default()).await;
        assert!(!feed.changes.has_changed().unwrap());
        assert!(feed.current().await.is_empty());
    }

    #[tokio::test]
    async fn feed_ends_when_dropped() {
        let conversations = Arc::new(Conversations::new(Vec::new()));
        let mut feed = conversations.subscribe(FolderId(1));
        drop(conversations);
        assert!(feed.next().await.is_none());
        assert!(feed.current().await.is_empty());
    }
}
