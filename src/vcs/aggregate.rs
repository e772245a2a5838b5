//! Repository-scoped diff aggregation
//!
//! Entries are partitioned by owning repository, diffed path by path, and
//! merged into one report. A failure for one path or one repository is
//! recorded in the report and the rest keeps going. Repositories and paths
//! are processed one after another.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::Serialize;
use super::{Repository, VersionControl};
use crate::cancel::CancellationToken;
use crate::entry::{ResourceEntry, ResourceId};
use crate::error::{ContextError, Result};
use crate::store::ResourceStore;
use crate::summary::plural;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffScope {
    /// Every entry of a session.
    Session,
    /// One container and its descendants.
    Subtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    NonFileScheme,
    NoRepository,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NonFileScheme => f.write_str("non-file-scheme"),
            SkipReason::NoRepository => f.write_str("untracked/no repository"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub identity: ResourceId,
    pub reason: SkipReason,
}

/// One path (or a whole repository, when `path` is `None`) that could not
/// be diffed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffFailure {
    pub repository: PathBuf,
    pub path: Option<String>,
    pub message: String,
}

impl fmt::Display for DiffFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", self.repository.join(path).display(), self.message),
            None => write!(f, "{}: {}", self.repository.display(), self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub diff_text: String,
    pub skipped: Vec<SkippedEntry>,
    pub errors: Vec<DiffFailure>,
    pub cancelled: bool,
}

impl DiffReport {
    pub fn has_differences(&self) -> bool {
        !self.diff_text.is_empty()
    }

    /// One consolidated message for the whole request.
    pub fn summary(&self) -> String {
        let head = if self.has_differences() {
            "Diff generated"
        } else {
            "No differences found"
        };
        let head = if self.cancelled {
            format!("Cancelled. {head}")
        } else {
            head.to_string()
        };

        let mut parts = Vec::new();
        if !self.skipped.is_empty() {
            let non_file = self
                .skipped
                .iter()
                .filter(|s| s.reason == SkipReason::NonFileScheme)
                .count();
            let untracked = self.skipped.len() - non_file;
            let mut reasons = Vec::new();
            if non_file > 0 {
                reasons.push(format!("{non_file} {}", SkipReason::NonFileScheme));
            }
            if untracked > 0 {
                reasons.push(format!("{untracked} {}", SkipReason::NoRepository));
            }
            parts.push(format!("{} skipped: {}", self.skipped.len(), reasons.join(", ")));
        }
        if !self.errors.is_empty() {
            parts.push(format!(
                "{} error{}",
                self.errors.len(),
                plural(self.errors.len())
            ));
        }

        if parts.is_empty() {
            head
        } else {
            format!("{head} ({})", parts.join("; "))
        }
    }
}

struct RepoGroup {
    repository: Arc<dyn Repository>,
    whole: bool,
    paths: Vec<String>,
}

pub struct DiffAggregator {
    vcs: Option<Arc<dyn VersionControl>>,
}

impl DiffAggregator {
    pub fn new(vcs: Option<Arc<dyn VersionControl>>) -> Self {
        Self { vcs }
    }

    pub fn is_available(&self) -> bool {
        self.vcs.is_some()
    }

    pub async fn diff_session(&self, store: &ResourceStore, cancel: &CancellationToken) -> Result<DiffReport> {
        self.aggregate(&store.entries(), DiffScope::Session, cancel).await
    }

    pub async fn diff_subtree(
        &self,
        store: &ResourceStore,
        identity: &str,
        cancel: &CancellationToken,
    ) -> Result<DiffReport> {
        let entries = store.subtree(identity);
        if entries.is_empty() {
            return Err(ContextError::NotFound(identity.to_string()));
        }
        self.aggregate(&entries, DiffScope::Subtree, cancel).await
    }

    pub async fn aggregate(
        &self,
        entries: &[ResourceEntry],
        scope: DiffScope,
        cancel: &CancellationToken,
    ) -> Result<DiffReport> {
        let vcs = self.vcs.as_ref().ok_or(ContextError::CollaboratorUnavailable)?;
        let mut report = DiffReport::default();

        let groups = collect_groups(vcs.as_ref(), entries, cancel, &mut report).await;
        let with_headers = groups.len() > 1 || scope == DiffScope::Session;

        let mut sections = Vec::new();
        for group in groups {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let fragments = diff_group(&group, cancel, &mut report).await;
            if fragments.is_empty() {
                continue;
            }
            let body = fragments.join("\n");
            if with_headers {
                sections.push(format!("# Repository: {}\n\n{}", group.repository.root().display(), body));
            } else {
                sections.push(body);
            }
        }

        report.diff_text = sections.join("\n").trim().to_string();
        tracing::debug!("{}", report.summary());
        Ok(report)
    }
}

/// Resolve every entry to its repository, keeping first-seen order.
async fn collect_groups(
    vcs: &dyn VersionControl,
    entries: &[ResourceEntry],
    cancel: &CancellationToken,
    report: &mut DiffReport,
) -> Vec<RepoGroup> {
    let mut groups: Vec<RepoGroup> = Vec::new();
    let mut lookups: HashMap<PathBuf, Option<Arc<dyn Repository>>> = HashMap::new();

    for entry in entries {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let Some(path) = entry.identity.as_path() else {
            report.skipped.push(SkippedEntry {
                identity: entry.identity.clone(),
                reason: SkipReason::NonFileScheme,
            });
            continue;
        };

        let lookup_key = if entry.is_container() {
            path.clone()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone())
        };
        let repository = match lookups.get(&lookup_key) {
            Some(found) => found.clone(),
            None => {
                let found = vcs.find_repository(&path).await;
                lookups.insert(lookup_key, found.clone());
                found
            }
        };

        let relative = match &repository {
            Some(repository) => relative_path(repository.root(), &path).await,
            None => None,
        };
        let (Some(repository), Some(relative)) = (repository, relative) else {
            if entry.is_container() {
                // descendants are resolved on their own
                tracing::debug!("No repository for container {}", entry.identity);
            } else {
                report.skipped.push(SkippedEntry {
                    identity: entry.identity.clone(),
                    reason: SkipReason::NoRepository,
                });
            }
            continue;
        };

        let index = match groups.iter().position(|g| g.repository.root() == repository.root()) {
            Some(index) => index,
            None => {
                groups.push(RepoGroup {
                    repository,
                    whole: false,
                    paths: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        if relative.is_empty() {
            group.whole = true;
        } else if !group.paths.contains(&relative) {
            group.paths.push(relative);
        }
    }

    groups
}

async fn diff_group(group: &RepoGroup, cancel: &CancellationToken, report: &mut DiffReport) -> Vec<String> {
    let repository = &group.repository;
    let targets = if group.whole {
        match repository.changed_paths_vs_head().await {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!("Listing changes in {} failed: {:#}", repository.root().display(), err);
                report.errors.push(DiffFailure {
                    repository: repository.root().to_path_buf(),
                    path: None,
                    message: format!("{err:#}"),
                });
                return Vec::new();
            }
        }
    } else {
        collapse_nested(&group.paths)
    };

    let mut fragments = Vec::new();
    for relative in targets {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match repository.diff_vs_head(Some(&relative)).await {
            Ok(text) => {
                if let Some(fragment) = normalize_fragment(&relative, &text) {
                    fragments.push(fragment);
                }
            }
            Err(err) => {
                tracing::warn!("Diff of {} failed: {:#}", relative, err);
                report.errors.push(DiffFailure {
                    repository: repository.root().to_path_buf(),
                    path: Some(relative),
                    message: format!("{err:#}"),
                });
            }
        }
    }
    fragments
}

/// `path` relative to `root`, `/`-separated; empty for the root itself.
async fn relative_path(root: &Path, path: &Path) -> Option<String> {
    if let Ok(relative) = path.strip_prefix(root) {
        return Some(to_slash(relative));
    }
    // symlinked temp dirs and the like
    let root = tokio::fs::canonicalize(root).await.ok()?;
    let path = tokio::fs::canonicalize(path).await.ok()?;
    path.strip_prefix(&root).ok().map(to_slash)
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Drop paths already covered by an ancestor path in the same list.
fn collapse_nested(paths: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|path| {
            !paths
                .iter()
                .any(|other| other != *path && path.starts_with(&format!("{other}/")))
        })
        .cloned()
        .collect()
}

/// Make sure a fragment starts with a unified-diff header. Empty fragments
/// mean "no changes" and are dropped.
fn normalize_fragment(relative: &str, text: &str) -> Option<String> {
    let text = text.trim_end();
    if text.trim().is_empty() {
        return None;
    }
    if text.starts_with("diff --git ") {
        return Some(text.to_string());
    }

    let mut fragment = format!("diff --git a/{relative} b/{relative}\n");
    let has_file_header = text.lines().any(|line| line.starts_with("--- "))
        && text.lines().any(|line| line.starts_with("+++ "));
    if !has_file_header {
        fragment.push_str(&format!("--- a/{relative}\n+++ b/{relative}\n"));
    }
    fragment.push_str(text);
    Some(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_collapse_nested_paths() {
        let paths = vec!["src".to_string(), "src/lib.rs".to_string(), "srcs/a".to_string()];
        assert_eq!(collapse_nested(&paths), vec!["src", "srcs/a"]);
    }

    #[test]
    fn test_normalize_fragment_headers() {
        assert_eq!(normalize_fragment("a.txt", "  \n"), None);

        let full = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-x\n+y\n";
        assert_eq!(normalize_fragment("a.txt", full).unwrap(), full.trim_end());

        let bare = normalize_fragment("a.txt", "@@ -1 +1 @@\n-x\n+y").unwrap();
        assert!(bare.starts_with("diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@"));

        let headed = normalize_fragment("a.txt", "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@").unwrap();
        assert_eq!(headed.matches("--- a/a.txt").count(), 1);
    }

    #[test]
    fn test_summary_messages() {
        assert_eq!(DiffReport::default().summary(), "No differences found");

        let report = DiffReport {
            diff_text: "diff --git a/x b/x".into(),
            skipped: vec![
                SkippedEntry {
                    identity: ResourceId::parse("untitled:1").unwrap(),
                    reason: SkipReason::NonFileScheme,
                },
                SkippedEntry {
                    identity: ResourceId::parse("/tmp/x").unwrap(),
                    reason: SkipReason::NoRepository,
                },
            ],
            errors: vec![DiffFailure {
                repository: PathBuf::from("/r"),
                path: Some("a".into()),
                message: "boom".into(),
            }],
            cancelled: false,
        };
        assert_eq!(
            report.summary(),
            "Diff generated (2 skipped: 1 non-file-scheme, 1 untracked/no repository; 1 error)"
        );
        assert_eq!(report.errors[0].to_string(), "/r/a: boom");
    }

    struct OneRepo {
        root: PathBuf,
    }

    #[async_trait]
    impl Repository for OneRepo {
        fn root(&self) -> &Path {
            &self.root
        }

        async fn changed_paths_vs_head(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["a.txt".into()])
        }

        async fn diff_vs_head(&self, relative: Option<&str>) -> anyhow::Result<String> {
            Ok(format!("@@ -1 +1 @@\n-old {}\n+new", relative.unwrap_or("")))
        }
    }

    struct OneVcs(Arc<OneRepo>);

    #[async_trait]
    impl VersionControl for OneVcs {
        async fn find_repository(&self, path: &Path) -> Option<Arc<dyn Repository>> {
            if path.starts_with(&self.0.root) {
                let repository: Arc<dyn Repository> = self.0.clone();
                Some(repository)
            } else {
                None
            }
        }
    }

    fn vcs() -> Arc<dyn VersionControl> {
        Arc::new(OneVcs(Arc::new(OneRepo { root: PathBuf::from("/repo") })))
    }

    #[tokio::test]
    async fn test_missing_collaborator_is_unavailable() {
        let aggregator = DiffAggregator::new(None);
        let result = aggregator.aggregate(&[], DiffScope::Session, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ContextError::CollaboratorUnavailable)));
    }

    #[tokio::test]
    async fn test_subtree_scope_has_no_header_for_one_repo() {
        let entries = vec![
            ResourceEntry::container(ResourceId::parse("/repo/src").unwrap(), "s"),
            ResourceEntry::leaf(ResourceId::parse("/repo/src/a.rs").unwrap(), "s")
                .with_parent(Some(ResourceId::parse("/repo/src").unwrap())),
        ];
        let report = DiffAggregator::new(Some(vcs()))
            .aggregate(&entries, DiffScope::Subtree, &CancellationToken::new())
            .await
            .unwrap();

        // the file is covered by its directory
        assert_eq!(report.diff_text.matches("diff --git").count(), 1);
        assert!(report.diff_text.starts_with("diff --git a/src b/src"));
        assert!(!report.diff_text.contains("# Repository"));
    }

    #[tokio::test]
    async fn test_session_scope_always_has_header() {
        let entries = vec![ResourceEntry::leaf(ResourceId::parse("/repo/a.txt").unwrap(), "s")];
        let report = DiffAggregator::new(Some(vcs()))
            .aggregate(&entries, DiffScope::Session, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.diff_text.starts_with("# Repository: /repo\n\ndiff --git a/a.txt b/a.txt"));
    }

    #[tokio::test]
    async fn test_whole_repository_uses_changed_paths() {
        let entries = vec![ResourceEntry::container(ResourceId::parse("/repo").unwrap(), "s")];
        let report = DiffAggregator::new(Some(vcs()))
            .aggregate(&entries, DiffScope::Subtree, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.diff_text.contains("-old a.txt"));
    }

    #[tokio::test]
    async fn test_skips_are_classified() {
        let entries = vec![
            ResourceEntry::leaf(ResourceId::parse("untitled:Untitled-1").unwrap(), "s"),
            ResourceEntry::leaf(ResourceId::parse("/elsewhere/x.txt").unwrap(), "s"),
            ResourceEntry::container(ResourceId::parse("/elsewhere").unwrap(), "s"),
        ];
        let report = DiffAggregator::new(Some(vcs()))
            .aggregate(&entries, DiffScope::Session, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.diff_text.is_empty());
        let reasons: Vec<_> = report.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::NonFileScheme, SkipReason::NoRepository]);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let entries = vec![ResourceEntry::leaf(ResourceId::parse("/repo/a.txt").unwrap(), "s")];
        let report = DiffAggregator::new(Some(vcs()))
            .aggregate(&entries, DiffScope::Session, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.diff_text.is_empty());
    }
}
