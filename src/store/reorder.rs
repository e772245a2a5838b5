//! Same-level drag reordering.

use std::collections::HashSet;
use super::ResourceStore;
use crate::entry::{ResourceEntry, ResourceId};
use crate::error::{ContextError, Result};

impl ResourceStore {
    /// Move `dragged` before `target`, to the top of the root level
    /// (`drop_on_root`), or to the end of their current parent group when
    /// neither is given. Returns `false` when the move was rejected; the
    /// store is then unchanged.
    pub fn reorder_items(&self, dragged: &[&str], target: Option<&str>, drop_on_root: bool) -> bool {
        match self.try_reorder_items(dragged, target, drop_on_root) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!("{}", err);
                false
            }
        }
    }

    pub fn try_reorder_items(&self, dragged: &[&str], target: Option<&str>, drop_on_root: bool) -> Result<()> {
        let mut state = self.lock();
        reorder(&mut state.entries, dragged, target, drop_on_root)
    }
}

fn conflict(reason: impl Into<String>) -> ContextError {
    ContextError::ReorderConflict(reason.into())
}

fn position(entries: &[ResourceEntry], identity: &str) -> Option<usize> {
    entries.iter().position(|entry| entry.identity.as_str() == identity)
}

fn reorder(
    entries: &mut Vec<ResourceEntry>,
    dragged: &[&str],
    target: Option<&str>,
    drop_on_root: bool,
) -> Result<()> {
    if dragged.is_empty() {
        return Err(conflict("nothing to move"));
    }

    let mut indices = Vec::with_capacity(dragged.len());
    for identity in dragged {
        let index = position(entries, identity)
            .ok_or_else(|| conflict(format!("{identity} is not in the session")))?;
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    indices.sort_unstable();

    let original_parent = entries[indices[0]].parent.clone();
    if indices.iter().any(|&i| entries[i].parent != original_parent) {
        return Err(conflict("dragged entries do not share a parent"));
    }

    if !drop_on_root {
        if let Some(target) = target {
            let target_index =
                position(entries, target).ok_or_else(|| conflict(format!("drop target {target} is not in the session")))?;
            if indices.contains(&target_index) {
                return Ok(());
            }
            let moving: HashSet<&ResourceId> = indices.iter().map(|&i| &entries[i].identity).collect();
            if has_ancestor_in(entries, target_index, &moving) {
                return Err(conflict(format!("cannot move entries inside their own subtree ({target})")));
            }
        }
    }

    // descending, so earlier indices stay valid
    let mut moved = Vec::with_capacity(indices.len());
    for &index in indices.iter().rev() {
        moved.push(entries.remove(index));
    }
    moved.reverse();

    let insert_at = if drop_on_root {
        for entry in &mut moved {
            entry.parent = None;
        }
        entries
            .iter()
            .position(|entry| entry.parent.is_none())
            .unwrap_or(entries.len())
    } else if let Some(target) = target {
        let Some(target_index) = position(entries, target) else {
            entries.extend(moved);
            return Err(conflict(format!("drop target {target} vanished")));
        };
        let new_parent = entries[target_index].parent.clone();
        for entry in &mut moved {
            entry.parent = new_parent.clone();
        }
        target_index
    } else {
        entries
            .iter()
            .rposition(|entry| entry.parent == original_parent)
            .or_else(|| {
                let parent = original_parent.as_ref()?;
                entries.iter().position(|entry| &entry.identity == parent)
            })
            .map_or(entries.len(), |index| index + 1)
    };

    entries.splice(insert_at..insert_at, moved);
    Ok(())
}

/// Walks parent links upward from `index`; bounded so a corrupt cycle ends.
fn has_ancestor_in(entries: &[ResourceEntry], index: usize, moving: &HashSet<&ResourceId>) -> bool {
    let mut current = entries[index].parent.as_ref();
    for _ in 0..entries.len() {
        let Some(parent) = current else {
            return false;
        };
        if moving.contains(parent) {
            return true;
        }
        current = entries
            .iter()
            .find(|entry| &entry.identity == parent)
            .and_then(|entry| entry.parent.as_ref());
    }
    false
}
