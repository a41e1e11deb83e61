//! Incremental link index.
//!
//! Every record and every link key (`id:<message-id>`, `subj:<normalized
//! subject>`) is a node of a union-find forest; a conversation is a tree of
//! that forest. Inserting a record unions its node with the nodes of its
//! keys.
//!
//! A record carries the subject key only while none of its parents is an
//! indexed record. Arrivals and removals that flip this for an indexed
//! record rebuild that record's component, so membership depends on the
//! set of indexed records and not on the order they arrived in. Removal
//! never splits on its own otherwise: a component is rebuilt only when the
//! removed record was the last holder of one of its keys. A record inserted
//! again with new fields always rebuilds its component.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::normalize_subject;
use crate::store::{AppliedBatch, FolderId, LinkFields, MessageKey};

/// Garbage nodes tolerated before the forest is compacted.
const COMPACT_SLACK: usize = 1024;

const SUBJECT_PREFIX: &str = "subj:";

/// Identifier of a conversation. Only stable until the next applied batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(usize);

/// Record changes of one committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationDelta {
    /// Records that were added.
    pub inserted: Vec<LinkFields>,
    /// Records that were removed.
    pub removed: Vec<MessageKey>,
}

impl From<AppliedBatch> for ConversationDelta {
    fn from(applied: AppliedBatch) -> Self {
        Self {
            inserted: applied.inserted,
            removed: applied.removed,
        }
    }
}

impl ConversationDelta {
    /// True when nothing changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// A conversation as listed for a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation.
    pub id: ConversationId,
    /// Every member, in all folders.
    pub members: Vec<MessageKey>,
    /// Date of the newest member.
    pub latest_date: Option<i64>,
    /// Subject of the oldest member.
    pub subject: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    node: usize,
    keys: Vec<String>,
    fields: LinkFields,
}

impl Entry {
    fn has_subject_key(&self) -> bool {
        self.keys.iter().any(|k| k.starts_with(SUBJECT_PREFIX))
    }
}

/// Per-account conversation membership.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    parent: Vec<usize>,
    rank: Vec<u8>,
    records: HashMap<MessageKey, Entry>,
    key_nodes: HashMap<String, usize>,
    key_refs: HashMap<String, usize>,
    /// Records carrying each message-id as their own.
    owners: HashMap<String, BTreeSet<MessageKey>>,
    /// Records citing each message-id as a parent.
    citers: HashMap<String, BTreeSet<MessageKey>>,
    /// Root node to the records of its tree.
    members: HashMap<usize, BTreeSet<MessageKey>>,
}

impl ConversationIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from every cached record.
    #[must_use]
    pub fn from_records(records: Vec<LinkFields>) -> Self {
        let mut index = Self::new();
        index.link_all(records);
        index
    }

    /// Discards everything and indexes `records` from scratch.
    pub fn rebuild(&mut self, records: Vec<LinkFields>) {
        *self = Self::from_records(records);
    }

    /// Applies one committed batch: removals first, then inserts.
    pub fn apply(&mut self, delta: ConversationDelta) {
        if delta.is_empty() {
            return;
        }
        let mut stale = BTreeSet::new();
        let replaced: Vec<MessageKey> = delta
            .inserted
            .iter()
            .map(|f| f.key)
            .filter(|key| self.records.contains_key(key))
            .collect();
        for key in &delta.removed {
            if let Some(root) = self.remove(*key) {
                stale.insert(root);
            }
        }
        // A replaced record may have been the only link between its peers.
        for key in replaced {
            if let Some((_, root, _)) = self.detach(key) {
                stale.insert(root);
            }
        }
        for fields in &delta.inserted {
            self.collect_lost_subjects(fields, &mut stale);
        }

        let mut pending = self.take_components(&stale);
        pending.extend(delta.inserted);
        self.link_all(pending);

        if self.parent.len() > 2 * (self.records.len() + self.key_nodes.len()) + COMPACT_SLACK {
            tracing::debug!(nodes = self.parent.len(), records = self.records.len(), "compacting conversation index");
            let records = self.records.drain().map(|(_, entry)| entry.fields).collect();
            self.rebuild(records);
        }
    }

    /// Number of indexed records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of conversations.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.members.len()
    }

    /// Conversation of a record.
    #[must_use]
    pub fn conversation_of(&self, key: MessageKey) -> Option<ConversationId> {
        self.records.get(&key).map(|entry| ConversationId(self.root(entry.node)))
    }

    /// Members of a conversation.
    #[must_use]
    pub fn members(&self, id: ConversationId) -> Vec<MessageKey> {
        self.members
            .get(&id.0)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Conversations with at least one member in `folder`, newest first.
    #[must_use]
    pub fn conversations_in_folder(&self, folder: FolderId) -> Vec<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = self
            .members
            .iter()
            .filter(|(_, set)| set.iter().any(|key| key.folder == folder))
            .map(|(&root, set)| self.summary(root, set))
            .collect();
        summaries.sort_by(|a, b| b.latest_date.cmp(&a.latest_date).then(a.id.cmp(&b.id)));
        summaries
    }

    fn summary(&self, root: usize, set: &BTreeSet<MessageKey>) -> ConversationSummary {
        let fields: Vec<&LinkFields> = set.iter().filter_map(|key| self.records.get(key)).map(|e| &e.fields).collect();
        let oldest = fields
            .iter()
            .min_by_key(|f| (f.date.is_none(), f.date, f.key))
            .and_then(|f| f.subject.clone());
        ConversationSummary {
            id: ConversationId(root),
            members: set.iter().copied().collect(),
            latest_date: fields.iter().filter_map(|f| f.date).max(),
            subject: oldest,
        }
    }

    /// Registers every record before linking any, so each record's keys are
    /// computed against the whole set. Later duplicates of a key win.
    fn link_all(&mut self, records: Vec<LinkFields>) {
        let unique: BTreeMap<MessageKey, LinkFields> = records.into_iter().map(|f| (f.key, f)).collect();
        let mut records: Vec<LinkFields> = unique.into_values().collect();
        records.sort_by_key(|f| (f.date.is_none(), f.date, f.key));
        for fields in &records {
            self.register(fields);
        }
        for fields in records {
            self.link(fields);
        }
    }

    fn link(&mut self, fields: LinkFields) {
        let keys = self.link_keys(&fields);
        let node = self.alloc();
        self.members.entry(node).or_default().insert(fields.key);
        for key in &keys {
            let key_node = match self.key_nodes.get(key) {
                Some(&existing) => existing,
                None => {
                    let created = self.alloc();
                    self.key_nodes.insert(key.clone(), created);
                    created
                }
            };
            self.union(node, key_node);
            *self.key_refs.entry(key.clone()).or_default() += 1;
        }
        self.records.insert(fields.key, Entry { node, keys, fields });
    }

    fn register(&mut self, fields: &LinkFields) {
        if let Some(id) = &fields.message_id {
            self.owners.entry(id.clone()).or_default().insert(fields.key);
        }
        for parent in &fields.parents {
            self.citers.entry(parent.clone()).or_default().insert(fields.key);
        }
    }

    fn unregister(&mut self, fields: &LinkFields) {
        if let Some(id) = &fields.message_id {
            remove_from(&mut self.owners, id, fields.key);
        }
        for parent in &fields.parents {
            remove_from(&mut self.citers, parent, fields.key);
        }
    }

    /// Link keys of a record against the registered records.
    fn link_keys(&self, fields: &LinkFields) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for id in fields.message_id.iter().chain(&fields.parents) {
            let key = format!("id:{id}");
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if let Some(subject) = self.subject_key(fields) {
            keys.push(subject);
        }
        keys
    }

    /// The subject key, unless a parent of the record is registered.
    fn subject_key(&self, fields: &LinkFields) -> Option<String> {
        if fields.parents.iter().any(|p| self.owners.contains_key(p)) {
            return None;
        }
        let subject = fields.subject.as_deref().and_then(normalize_subject)?;
        Some(format!("{SUBJECT_PREFIX}{subject}"))
    }

    /// Roots of components holding a record that loses its subject key once
    /// `fields` is registered: records citing its message-id while no other
    /// record carries that id.
    fn collect_lost_subjects(&self, fields: &LinkFields, stale: &mut BTreeSet<usize>) {
        let Some(id) = &fields.message_id else {
            return;
        };
        if self.owners.contains_key(id) {
            return;
        }
        for citer in self.citers.get(id).into_iter().flatten() {
            if let Some(entry) = self.records.get(citer)
                && entry.has_subject_key()
            {
                stale.insert(self.root(entry.node));
            }
        }
    }

    /// Unlinks a record. Returns the root of its component when that
    /// component has to be rebuilt: the record was the last holder of a
    /// key, or a record citing it now qualifies for a subject key.
    fn remove(&mut self, key: MessageKey) -> Option<usize> {
        let (entry, root, dropped) = self.detach(key)?;
        if dropped {
            return Some(root);
        }
        let orphaned = entry
            .fields
            .message_id
            .as_ref()
            .filter(|id| !self.owners.contains_key(*id))
            .and_then(|id| self.citers.get(id))
            .is_some_and(|citers| {
                citers.iter().any(|citer| {
                    self.records
                        .get(citer)
                        .is_some_and(|e| !e.has_subject_key() && self.subject_key(&e.fields).is_some())
                })
            });
        orphaned.then_some(root)
    }

    /// Unlinks every record of the given components and returns their fields.
    fn take_components(&mut self, roots: &BTreeSet<usize>) -> Vec<LinkFields> {
        let mut fields = Vec::new();
        for root in roots {
            let Some(set) = self.members.remove(root) else {
                continue;
            };
            for member in set {
                if let Some((entry, _, _)) = self.detach(member) {
                    fields.push(entry.fields);
                }
            }
        }
        fields
    }

    /// Unregisters a record. Returns its entry, the root its component had,
    /// and whether one of its keys lost its last holder.
    fn detach(&mut self, key: MessageKey) -> Option<(Entry, usize, bool)> {
        let entry = self.records.remove(&key)?;
        let root = self.find(entry.node);
        if let Some(set) = self.members.get_mut(&root) {
            set.remove(&key);
            if set.is_empty() {
                self.members.remove(&root);
            }
        }

        let mut dropped = false;
        for link in &entry.keys {
            if decrement(&mut self.key_refs, link) {
                self.key_nodes.remove(link);
                dropped = true;
            }
        }
        self.unregister(&entry.fields);
        Some((entry, root, dropped))
    }

    fn alloc(&mut self) -> usize {
        let node = self.parent.len();
        self.parent.push(node);
        self.rank.push(0);
        node
    }

    fn find(&mut self, node: usize) -> usize {
        let root = self.root(node);
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn root(&self, mut node: usize) -> usize {
        while self.parent[node] != node {
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (root, child) = match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => (rb, ra),
            std::cmp::Ordering::Greater => (ra, rb),
            std::cmp::Ordering::Equal => {
                self.rank[ra] += 1;
                (ra, rb)
            }
        };
        self.parent[child] = root;
        if let Some(moved) = self.members.remove(&child) {
            self.members.entry(root).or_default().extend(moved);
        }
    }
}

fn remove_from(index: &mut HashMap<String, BTreeSet<MessageKey>>, id: &str, key: MessageKey) {
    if let Some(set) = index.get_mut(id) {
        set.remove(&key);
        if set.is_empty() {
            index.remove(id);
        }
    }
}

/// Decrements a reference count, dropping the entry at zero. Returns true
/// if it was dropped.
fn decrement(counts: &mut HashMap<String, usize>, key: &str) -> bool {
    match counts.get_mut(key) {
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        Some(_) => {
            counts.remove(key);
            true
        }
        None => false,
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
    use proptest::prelude::*;

    const INBOX: FolderId = FolderId(1);
    const SENT: FolderId = FolderId(2);

    fn record(uid: u32, id: &str, parents: &[&str], subject: &str) -> LinkFields {
        LinkFields {
            key: MessageKey::new(INBOX, uid),
            message_id: (!id.is_empty()).then(|| id.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            subject: Some(subject.to_string()),
            date: Some(i64::from(uid) * 100),
        }
    }

    fn inserted(records: Vec<LinkFields>) -> ConversationDelta {
        ConversationDelta {
            inserted: records,
            removed: Vec::new(),
        }
    }

    fn removed(uids: &[u32]) -> ConversationDelta {
        ConversationDelta {
            inserted: Vec::new(),
            removed: uids.iter().map(|&uid| MessageKey::new(INBOX, uid)).collect(),
        }
    }

    fn partition(index: &ConversationIndex) -> BTreeSet<BTreeSet<MessageKey>> {
        index.members.values().cloned().collect()
    }

    fn same(index: &ConversationIndex, a: u32, b: u32) -> bool {
        index.conversation_of(MessageKey::new(INBOX, a)) == index.conversation_of(MessageKey::new(INBOX, b))
    }

    mod linking_tests {
        use super::*;

        #[test]
        fn replies_join_their_parent() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "Plan"),
                record(2, "b@x", &["a@x"], "Re: Plan"),
                record(3, "c@x", &["a@x", "b@x"], "Re: Plan"),
                record(4, "d@x", &[], "Other"),
            ]));
            assert!(same(&index, 1, 2));
            assert!(same(&index, 1, 3));
            assert!(!same(&index, 1, 4));
            assert_eq!(index.conversation_count(), 2);
        }

        #[test]
        fn reply_arriving_before_parent() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![record(2, "b@x", &["a@x"], "Re: Plan")]));
            index.apply(inserted(vec![record(1, "a@x", &[], "Totally new")]));
            assert!(same(&index, 1, 2));
        }

        #[test]
        fn shared_missing_ancestor_links_siblings() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "b@x", &["root@x"], "one"),
                record(2, "c@x", &["root@x"], "two"),
            ]));
            assert!(same(&index, 1, 2));
        }

        #[test]
        fn subject_fallback_groups_unreferenced_messages() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "Re: Project X"),
                record(2, "b@x", &[], "Project X"),
            ]));
            assert!(same(&index, 1, 2));

            index.apply(inserted(vec![record(3, "c@x", &["a@x"], "Budget numbers")]));
            assert!(same(&index, 1, 3));
            assert!(same(&index, 2, 3));
            assert_eq!(index.conversation_count(), 1);
        }

        #[test]
        fn explicit_reply_does_not_pull_in_subject_peers() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "Status"),
                record(2, "b@x", &["a@x"], "Re: Weekly"),
                record(3, "c@x", &[], "Re: Weekly"),
            ]));
            assert!(same(&index, 1, 2));
            assert!(!same(&index, 2, 3));
        }

        #[test]
        fn parent_arriving_last_drops_the_reply_subject() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![record(2, "b@x", &["a@x"], "Re: Weekly")]));
            index.apply(inserted(vec![record(3, "c@x", &[], "Re: Weekly")]));
            assert!(same(&index, 2, 3));

            index.apply(inserted(vec![record(1, "a@x", &[], "Status")]));
            assert!(same(&index, 1, 2));
            assert!(!same(&index, 2, 3));
            let rebuilt = ConversationIndex::from_records(vec![
                record(1, "a@x", &[], "Status"),
                record(2, "b@x", &["a@x"], "Re: Weekly"),
                record(3, "c@x", &[], "Re: Weekly"),
            ]);
            assert_eq!(partition(&index), partition(&rebuilt));
        }

        #[test]
        fn grouping_ignores_date_order() {
            // The reply is dated before the message it answers.
            let mut reply = record(1, "b@x", &["a@x"], "Re: Weekly");
            reply.date = Some(1);
            let records = vec![reply, record(2, "a@x", &[], "Status"), record(3, "c@x", &[], "Weekly")];
            let index = ConversationIndex::from_records(records);
            assert!(same(&index, 1, 2));
            assert!(!same(&index, 1, 3));
        }

        #[test]
        fn folders_share_conversations() {
            let mut index = ConversationIndex::new();
            let mut reply = record(1, "b@x", &["a@x"], "Re: Plan");
            reply.key = MessageKey::new(SENT, 1);
            index.apply(inserted(vec![record(1, "a@x", &[], "Plan"), reply]));

            let inbox = index.conversations_in_folder(INBOX);
            let sent = index.conversations_in_folder(SENT);
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox, sent);
            assert_eq!(inbox[0].members.len(), 2);
            assert_eq!(inbox[0].subject.as_deref(), Some("Plan"));
        }

        #[test]
        fn folder_listing_is_newest_first() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "first"),
                record(5, "b@x", &[], "second"),
                record(3, "c@x", &["a@x"], "Re: first"),
            ]));
            let listed = index.conversations_in_folder(INBOX);
            assert_eq!(listed.len(), 2);
            assert_eq!(listed[0].latest_date, Some(500));
            assert_eq!(listed[1].latest_date, Some(300));
            assert!(index.conversations_in_folder(SENT).is_empty());
        }
    }

    mod removal_tests {
        use super::*;

        #[test]
        fn removing_a_lone_message_drops_its_conversation() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![record(1, "a@x", &[], "one"), record(2, "b@x", &[], "two")]));
            index.apply(removed(&[1]));
            assert_eq!(index.conversation_of(MessageKey::new(INBOX, 1)), None);
            assert_eq!(index.conversation_count(), 1);
            assert_eq!(index.record_count(), 1);
        }

        #[test]
        fn losing_the_last_link_key_splits() {
            let mut index = ConversationIndex::new();
            // 1 shares root@x with 2 and the subject "plan" with 3.
            index.apply(inserted(vec![
                record(1, "b@x", &["root@x"], "Plan"),
                record(2, "c@x", &["root@x"], "Kickoff"),
                record(3, "d@x", &[], "Re: Plan"),
            ]));
            assert!(same(&index, 2, 3));
            index.apply(removed(&[1]));
            assert!(!same(&index, 2, 3));
            assert_eq!(index.conversation_count(), 2);
        }

        #[test]
        fn indirect_split_is_not_detected() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "alpha"),
                record(4, "z@x", &[], "zeta"),
                record(2, "b@x", &["a@x"], "beta"),
                record(3, "c@x", &["b@x", "z@x"], "gamma"),
            ]));
            index.apply(removed(&[2]));
            // a@x and b@x are still held by 1 and 3, and 3 keeps a known
            // parent in z@x.
            assert!(same(&index, 1, 3));
            assert_eq!(index.conversation_count(), 1);
        }

        #[test]
        fn orphaned_reply_regains_its_subject() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], ""),
                record(2, "b@x", &["a@x"], "Re: Weekly"),
                record(3, "c@x", &[], "Weekly"),
            ]));
            assert!(!same(&index, 2, 3));
            index.apply(removed(&[1]));
            assert!(same(&index, 2, 3));
        }

        #[test]
        fn removal_with_surviving_evidence_keeps_the_group() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "Plan"),
                record(2, "b@x", &["a@x"], "Re: Plan"),
                record(3, "c@x", &["a@x", "b@x"], "Re: Plan"),
            ]));
            index.apply(removed(&[1]));
            assert!(same(&index, 2, 3));
            assert_eq!(index.conversation_count(), 1);
        }

        #[test]
        fn replacing_a_bridge_splits() {
            let mut index = ConversationIndex::new();
            index.apply(inserted(vec![
                record(1, "a@x", &[], "alpha"),
                record(2, "b@x", &["a@x", "z@x"], "beta"),
                record(3, "c@x", &["z@x"], "gamma"),
            ]));
            assert!(same(&index, 1, 3));
            // 2 keeps its own id, which 3 does not cite.
            index.apply(inserted(vec![record(2, "b@x", &["a@x"], "beta")]));
            assert!(same(&index, 1, 2));
            assert!(!same(&index, 1, 3));
        }

        #[test]
        fn reinserting_is_idempotent() {
            let records = vec![record(1, "a@x", &[], "Plan"), record(2, "b@x", &["a@x"], "Re: Plan")];
            let mut index = ConversationIndex::new();
            index.apply(inserted(records.clone()));
            index.apply(inserted(records));
            assert_eq!(index.record_count(), 2);
            assert_eq!(index.conversation_count(), 1);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert { uid: u32, id: u8, parents: Vec<u8>, subject: u8 },
        Remove { uid: u32 },
    }

    fn insert_op() -> impl Strategy<Value = Op> {
        (0u32..24, 0u8..12, prop::collection::vec(0u8..12, 0..3), 0u8..4)
            .prop_map(|(uid, id, parents, subject)| Op::Insert { uid, id, parents, subject })
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => insert_op(),
            1 => (0u32..24).prop_map(|uid| Op::Remove { uid }),
        ]
    }

    /// Applies `batches` one at a time, calling `check` with the index and
    /// the records that should be live after each.
    fn replay(
        batches: Vec<Vec<Op>>,
        mut check: impl FnMut(&ConversationIndex, &BTreeMap<MessageKey, LinkFields>) -> Result<(), TestCaseError>,
    ) -> Result<(), TestCaseError> {
        let mut index = ConversationIndex::new();
        let mut live = BTreeMap::new();
        for batch in batches {
            let mut delta = ConversationDelta::default();
            for op in batch {
                match op {
                    Op::Insert { uid, id, parents, subject } => {
                        let parents: Vec<String> = parents.iter().map(|p| format!("{p}@x")).collect();
                        let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
                        let fields = record(uid, &format!("{id}@x"), &parents, &format!("Re: topic {subject}"));
                        delta.inserted.retain(|f| f.key != fields.key);
                        delta.inserted.push(fields.clone());
                        live.insert(fields.key, fields);
                    }
                    Op::Remove { uid } => {
                        let key = MessageKey::new(INBOX, uid);
                        delta.inserted.retain(|f| f.key != key);
                        delta.removed.push(key);
                        live.remove(&key);
                    }
                }
            }
            index.apply(delta);
            check(&index, &live)?;
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn members_partition_the_live_records(batches in prop::collection::vec(prop::collection::vec(op(), 1..6), 1..12)) {
            replay(batches, |index, live| {
                let mut seen = BTreeSet::new();
                for summary in index.conversations_in_folder(INBOX) {
                    prop_assert!(!summary.members.is_empty());
                    for member in &summary.members {
                        prop_assert!(seen.insert(*member), "{member:?} in two conversations");
                        prop_assert_eq!(index.conversation_of(*member), Some(summary.id));
                    }
                }
                prop_assert!(seen.iter().eq(live.keys()));
                prop_assert_eq!(index.record_count(), live.len());
                Ok(())
            })?;
        }

        #[test]
        fn arrival_order_does_not_matter(batches in prop::collection::vec(prop::collection::vec(insert_op(), 1..6), 1..12)) {
            replay(batches, |index, live| {
                let rebuilt = ConversationIndex::from_records(live.values().cloned().collect());
                prop_assert_eq!(partition(index), partition(&rebuilt));
                Ok(())
            })?;
        }

        #[test]
        fn removals_never_split_what_a_rebuild_joins(batches in prop::collection::vec(prop::collection::vec(op(), 1..6), 1..12)) {
            replay(batches, |index, live| {
                let rebuilt = ConversationIndex::from_records(live.values().cloned().collect());
                for group in partition(&rebuilt) {
                    let ids: BTreeSet<_> = group.iter().map(|key| index.conversation_of(*key)).collect();
                    prop_assert_eq!(ids.len(), 1, "{:?} is split", group);
                }
                Ok(())
            })?;
        }
    }
}
