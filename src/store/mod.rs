//! Ordered, hierarchical resource store
//!
//! A session keeps its entries in one insertion-ordered list. Order drives
//! the output order of rendering and diffing. Hierarchy is expressed only
//! through each entry's parent link: children are found by scanning the list,
//! and sibling order is their subsequence order in that scan.
//!
//! The store also keeps a single-slot undo buffer holding the most recent
//! removal or clear batch.

mod ingest;
mod reorder;

pub use ingest::IngestPolicy;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use crate::entry::{ResourceEntry, ResourceId};

#[derive(Debug, Default)]
struct StoreState {
    entries: Vec<ResourceEntry>,
    undo: Option<Vec<ResourceEntry>>,
}

/// Handle to one session's ordered entry list.
///
/// Clones share the same underlying list. The lock is only held inside
/// synchronous methods, never across an await point.
#[derive(Debug, Clone)]
pub struct ResourceStore {
    session_id: Arc<str>,
    policy: Arc<IngestPolicy>,
    state: Arc<Mutex<StoreState>>,
}

impl ResourceStore {
    pub fn new(session_id: impl Into<String>, policy: IngestPolicy) -> Self {
        Self {
            session_id: Arc::from(session_id.into()),
            policy: Arc::new(policy),
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Snapshot of all entries in store order.
    pub fn entries(&self) -> Vec<ResourceEntry> {
        self.lock().entries.clone()
    }

    pub fn find_entry(&self, identity: &str) -> Option<ResourceEntry> {
        self.lock()
            .entries
            .iter()
            .find(|entry| entry.identity.as_str() == identity)
            .cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|entry| entry.identity.as_str() == identity)
    }

    /// Direct children of `parent` (root-level entries for `None`), in store order.
    pub fn children_of(&self, parent: Option<&ResourceId>) -> Vec<ResourceEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.parent.as_ref() == parent)
            .cloned()
            .collect()
    }

    /// All transitive descendants of `identity`, in store order.
    pub fn descendants(&self, identity: &str) -> Vec<ResourceEntry> {
        let state = self.lock();
        let members = subtree_members(&state.entries, identity);
        state
            .entries
            .iter()
            .filter(|entry| entry.identity.as_str() != identity && members.contains(&entry.identity))
            .cloned()
            .collect()
    }

    /// `identity` plus all of its descendants, in store order.
    pub fn subtree(&self, identity: &str) -> Vec<ResourceEntry> {
        let state = self.lock();
        let members = subtree_members(&state.entries, identity);
        state
            .entries
            .iter()
            .filter(|entry| members.contains(&entry.identity))
            .cloned()
            .collect()
    }

    /// Append a fully-formed entry. Returns `false` without touching the
    /// store when the identity is already present.
    pub fn add_item(&self, mut entry: ResourceEntry) -> bool {
        entry.owner_session = self.session_id.to_string();
        let mut state = self.lock();
        if state.entries.iter().any(|e| e.identity == entry.identity) {
            return false;
        }
        state.entries.push(entry);
        true
    }

    /// Remove `identity` and every transitive descendant as one batch.
    /// The batch replaces the undo buffer.
    pub fn remove_entry(&self, identity: &str) -> bool {
        let mut state = self.lock();
        let members = subtree_members(&state.entries, identity);
        if members.is_empty() {
            return false;
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.entries)
            .into_iter()
            .partition(|entry| members.contains(&entry.identity));
        state.entries = kept;
        tracing::debug!("Removed {} entries under {}", removed.len(), identity);
        state.undo = Some(removed);
        true
    }

    /// Remove every entry, keeping them in the undo buffer.
    pub fn clear_files(&self) -> usize {
        let mut state = self.lock();
        let removed = std::mem::take(&mut state.entries);
        let count = removed.len();
        if count > 0 {
            state.undo = Some(removed);
        }
        count
    }

    pub fn has_undo(&self) -> bool {
        self.lock().undo.is_some()
    }

    pub fn undo_len(&self) -> usize {
        self.lock().undo.as_ref().map_or(0, Vec::len)
    }

    /// Append the buffered batch back to the end of the list.
    ///
    /// Entries whose identity was re-added in the meantime are not restored
    /// twice; the returned list holds only what was actually restored.
    pub fn undo(&self) -> Option<Vec<ResourceEntry>> {
        let mut state = self.lock();
        let batch = state.undo.take()?;
        let mut restored = Vec::with_capacity(batch.len());
        for entry in batch {
            if state.entries.iter().any(|e| e.identity == entry.identity) {
                continue;
            }
            state.entries.push(entry.clone());
            restored.push(entry);
        }
        Some(restored)
    }

    /// Replace the whole list, as done when loading persisted state.
    /// Cached content is dropped and duplicate identities are skipped.
    pub fn restore_files(&self, entries: Vec<ResourceEntry>) {
        let mut seen = HashSet::new();
        let mut restored = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if !seen.insert(entry.identity.clone()) {
                tracing::warn!("Skipping duplicate persisted entry {}", entry.identity);
                continue;
            }
            entry.content = None;
            entry.owner_session = self.session_id.to_string();
            restored.push(entry);
        }

        let mut state = self.lock();
        state.entries = restored;
        state.undo = None;
    }

    /// Snapshot of the undo buffer, for persistence.
    pub fn undo_snapshot(&self) -> Option<Vec<ResourceEntry>> {
        self.lock().undo.clone()
    }

    /// Reinstate a persisted undo buffer. Content is never restored.
    pub fn restore_undo(&self, batch: Option<Vec<ResourceEntry>>) {
        let batch = batch.filter(|batch| !batch.is_empty()).map(|batch| {
            batch
                .into_iter()
                .map(|mut entry| {
                    entry.content = None;
                    entry.owner_session = self.session_id.to_string();
                    entry
                })
                .collect()
        });
        self.lock().undo = batch;
    }

    /// Cache loaded content on an entry. Returns `false` when the entry is gone.
    pub fn set_content(&self, identity: &ResourceId, content: String) -> bool {
        let mut state = self.lock();
        match state.entries.iter_mut().find(|entry| &entry.identity == identity) {
            Some(entry) => {
                entry.content = Some(content);
                true
            }
            None => false,
        }
    }

    /// Atomic duplicate check and append, shared by every insertion path.
    fn insert_unique(&self, entry: ResourceEntry) -> bool {
        self.add_item(entry)
    }
}

/// Breadth-first walk over parent links starting at `root`. Returns the
/// identities of `root` and its descendants, or an empty set when `root`
/// is not in the list.
fn subtree_members(entries: &[ResourceEntry], root: &str) -> HashSet<ResourceId> {
    let mut members = HashSet::new();
    let Some(start) = entries.iter().find(|entry| entry.identity.as_str() == root) else {
        return members;
    };

    let mut children: HashMap<&ResourceId, Vec<&ResourceId>> = HashMap::new();
    for entry in entries {
        if let Some(parent) = &entry.parent {
            children.entry(parent).or_default().push(&entry.identity);
        }
    }

    let mut queue = VecDeque::from([&start.identity]);
    while let Some(current) = queue.pop_front() {
        // a corrupt persisted file could contain a parent cycle
        if !members.insert(current.clone()) {
            continue;
        }
        if let Some(kids) = children.get(current) {
            queue.extend(kids.iter().copied());
        }
    }
    members
}
