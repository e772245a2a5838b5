//! Recursive ingestion of filesystem trees into a store.

use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinSet;
use super::ResourceStore;
use crate::cancel::CancellationToken;
use crate::config::{ContextConfig, DEFAULT_MAX_EAGER_BYTES};
use crate::entry::{ResourceEntry, ResourceId};
use crate::filter::{ExclusionMatcher, ExclusionRules};
use crate::summary::{IngestSummary, IngestTally};

/// What ingestion may add and how much it reads up front.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    pub matcher: ExclusionMatcher,
    pub max_eager_bytes: u64,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            matcher: ExclusionMatcher::empty(),
            max_eager_bytes: DEFAULT_MAX_EAGER_BYTES,
        }
    }
}

impl IngestPolicy {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            matcher: ExclusionRules::from_config(config).ingest_matcher(),
            max_eager_bytes: config.ingest.max_eager_bytes,
        }
    }
}

type IngestFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

impl ResourceStore {
    /// Ingest one resource (recursively for directories).
    ///
    /// Returns whether the resource itself was added. Failures below it are
    /// logged and counted but never reported here; use [`ResourceStore::ingest`]
    /// for the counters.
    pub async fn add_resource(&self, identity: &str, parent: Option<&str>) -> bool {
        self.ingest(identity, parent, &CancellationToken::new())
            .await
            .root_added
    }

    /// Ingest one resource and report what happened to it and everything
    /// below it. Work done before `cancel` trips stays in the store.
    pub async fn ingest(
        &self,
        identity: &str,
        parent: Option<&str>,
        cancel: &CancellationToken,
    ) -> IngestSummary {
        let tally = Arc::new(IngestTally::default());

        let id = match ResourceId::parse(identity) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!("{}", err);
                tally.failed();
                return tally.snapshot(false);
            }
        };
        let parent = match parent.map(ResourceId::parse).transpose() {
            Ok(parent) => parent,
            Err(err) => {
                tracing::warn!("Invalid parent for {}: {}", id, err);
                tally.failed();
                return tally.snapshot(false);
            }
        };
        if let Some(parent) = &parent {
            match self.find_entry(parent.as_str()) {
                Some(entry) if entry.is_container() => {}
                Some(_) => {
                    tracing::warn!("Parent {} of {} is not a container", parent, id);
                    tally.failed();
                    return tally.snapshot(false);
                }
                None => {
                    tracing::warn!("Parent {} of {} is not in the session", parent, id);
                    tally.not_found();
                    return tally.snapshot(false);
                }
            }
        }

        let root_added = ingest_one(self.clone(), id, parent, cancel.clone(), tally.clone()).await;
        tally.snapshot(root_added)
    }

    fn append_ingested(&self, entry: ResourceEntry, tally: &IngestTally) -> bool {
        let identity = entry.identity.clone();
        if self.insert_unique(entry) {
            tally.added();
            true
        } else {
            // lost a race against a concurrent ingestion of the same identity
            tracing::debug!("Already present: {}", identity);
            tally.duplicate();
            false
        }
    }
}

/// Boxed so the directory walk can recurse through spawned tasks.
fn ingest_one(
    store: ResourceStore,
    id: ResourceId,
    parent: Option<ResourceId>,
    cancel: CancellationToken,
    tally: Arc<IngestTally>,
) -> IngestFuture {
    Box::pin(async move {
        if cancel.is_cancelled() {
            tally.cancelled();
            return false;
        }
        if store.contains(id.as_str()) {
            tracing::debug!("Already present: {}", id);
            tally.duplicate();
            return false;
        }

        let Some(path) = id.as_path() else {
            // opaque resources are never read or expanded here
            if store.policy().matcher.is_excluded(id.path_part()) {
                tracing::debug!("Excluded: {}", id);
                tally.excluded();
                return false;
            }
            let entry = ResourceEntry::leaf(id, store.session_id()).with_parent(parent);
            return store.append_ingested(entry, &tally);
        };

        if store.policy().matcher.is_excluded(&path) {
            tracing::debug!("Excluded: {}", path.display());
            tally.excluded();
            return false;
        }

        let link = match tokio::fs::symlink_metadata(&path).await {
            Ok(link) => link,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!("Resource not found: {}", path.display());
                tally.not_found();
                return false;
            }
            Err(err) => {
                tracing::error!("Failed to inspect {}: {}", path.display(), err);
                tally.failed();
                return false;
            }
        };
        let metadata = if link.file_type().is_symlink() {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!("Broken link {}: {}", path.display(), err);
                    tally.not_found();
                    return false;
                }
            }
        } else {
            link.clone()
        };

        if metadata.is_dir() {
            let entry = ResourceEntry::container(id.clone(), store.session_id()).with_parent(parent);
            if !store.append_ingested(entry, &tally) {
                return false;
            }
            if link.file_type().is_symlink() {
                tracing::debug!("Not descending into linked directory {}", path.display());
            } else {
                ingest_children(&store, &path, &id, &cancel, &tally).await;
            }
            return true;
        }

        let mut entry = ResourceEntry::leaf(id, store.session_id()).with_parent(parent);
        if metadata.len() <= store.policy().max_eager_bytes {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => entry.content = Some(text),
                Err(err) => tracing::debug!("Deferring content of {}: {}", path.display(), err),
            }
        }
        store.append_ingested(entry, &tally)
    })
}

/// Start every child before awaiting any of them.
async fn ingest_children(
    store: &ResourceStore,
    dir: &Path,
    parent: &ResourceId,
    cancel: &CancellationToken,
    tally: &Arc<IngestTally>,
) {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) => {
            tracing::error!("Failed to list {}: {}", dir.display(), err);
            tally.failed();
            return;
        }
    };

    let mut workers = JoinSet::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(child)) => {
                let child_path = child.path();
                if store.policy().matcher.is_excluded(&child_path) {
                    tracing::debug!("Excluded: {}", child_path.display());
                    tally.excluded();
                    continue;
                }
                workers.spawn(ingest_one(
                    store.clone(),
                    ResourceId::from_path(&child_path),
                    Some(parent.clone()),
                    cancel.clone(),
                    tally.clone(),
                ));
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("Stopped listing {}: {}", dir.display(), err);
                tally.failed();
                break;
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            tracing::error!("Ingestion task failed: {}", err);
            tally.failed();
        }
    }
}
