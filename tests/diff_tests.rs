use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use ctxpack::vcs::SkipReason;
use ctxpack::{
    CancellationToken, ContextError, DiffAggregator, IngestPolicy, Repository, ResourceEntry, ResourceId,
    ResourceStore, VersionControl,
};

/// A repository whose per-path diffs are scripted; `None` makes the path fail.
struct ScriptedRepo {
    root: PathBuf,
    diffs: BTreeMap<String, Option<String>>,
}

#[async_trait]
impl Repository for ScriptedRepo {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn changed_paths_vs_head(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.diffs.keys().cloned().collect())
    }

    async fn diff_vs_head(&self, relative: Option<&str>) -> anyhow::Result<String> {
        let relative = relative.unwrap_or_default();
        match self.diffs.get(relative) {
            Some(Some(text)) => Ok(text.clone()),
            Some(None) => bail!("fatal: bad object for {}", relative),
            None => Ok(String::new()),
        }
    }
}

struct ScriptedVcs {
    repositories: Vec<Arc<ScriptedRepo>>,
}

#[async_trait]
impl VersionControl for ScriptedVcs {
    async fn find_repository(&self, path: &Path) -> Option<Arc<dyn Repository>> {
        self.repositories
            .iter()
            .find(|repo| path.starts_with(&repo.root))
            .map(|repo| {
                let repository: Arc<dyn Repository> = repo.clone();
                repository
            })
    }
}

fn repo(root: &str, diffs: &[(&str, Option<&str>)]) -> Arc<ScriptedRepo> {
    Arc::new(ScriptedRepo {
        root: PathBuf::from(root),
        diffs: diffs
            .iter()
            .map(|(path, text)| (path.to_string(), text.map(str::to_string)))
            .collect(),
    })
}

fn aggregator(repositories: Vec<Arc<ScriptedRepo>>) -> DiffAggregator {
    DiffAggregator::new(Some(Arc::new(ScriptedVcs { repositories })))
}

fn store_with(entries: Vec<ResourceEntry>) -> ResourceStore {
    let store = ResourceStore::new("s", IngestPolicy::default());
    for entry in entries {
        assert!(store.add_item(entry));
    }
    store
}

fn id(raw: &str) -> ResourceId {
    ResourceId::parse(raw).unwrap()
}

#[tokio::test]
async fn test_only_repositories_with_changes_get_a_section() {
    let r1 = repo("/r1", &[("a.txt", Some("@@ -1 +1 @@\n-a\n+b"))]);
    let r2 = repo("/r2", &[]);
    let store = store_with(vec![
        ResourceEntry::container(id("/r1"), "s"),
        ResourceEntry::container(id("/r2"), "s"),
    ]);

    let report = aggregator(vec![r1, r2])
        .diff_session(&store, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.diff_text.matches("# Repository:").count(), 1);
    assert!(report.diff_text.starts_with("# Repository: /r1\n\ndiff --git a/a.txt b/a.txt"));
    assert!(!report.diff_text.contains("/r2"));
    assert!(report.errors.is_empty());
    assert!(report.skipped.is_empty());
    assert_eq!(report.summary(), "Diff generated");
}

#[tokio::test]
async fn test_failing_path_does_not_stop_the_others() {
    let r = repo(
        "/r",
        &[
            ("ok.txt", Some("@@ -1 +1 @@\n-1\n+2")),
            ("bad.txt", None),
            ("other.txt", Some("@@ -1 +1 @@\n-x\n+y")),
        ],
    );
    let store = store_with(vec![
        ResourceEntry::leaf(id("/r/ok.txt"), "s"),
        ResourceEntry::leaf(id("/r/bad.txt"), "s"),
        ResourceEntry::leaf(id("/r/other.txt"), "s"),
    ]);

    let report = aggregator(vec![r])
        .diff_session(&store, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path.as_deref(), Some("bad.txt"));
    assert!(report.errors[0].to_string().contains("/r/bad.txt"));
    assert!(report.diff_text.contains("diff --git a/ok.txt b/ok.txt"));
    assert!(report.diff_text.contains("diff --git a/other.txt b/other.txt"));
    assert!(!report.diff_text.contains("bad.txt"));
    assert_eq!(report.summary(), "Diff generated (1 error)");
}

#[tokio::test]
async fn test_subtree_diff_is_limited_to_descendants() {
    let r = repo(
        "/r",
        &[
            ("src", Some("@@ -1 +1 @@\n-src\n+src2")),
            ("README.md", Some("@@ -1 +1 @@\n-r\n+R")),
        ],
    );
    let store = store_with(vec![
        ResourceEntry::leaf(id("/r/README.md"), "s"),
        ResourceEntry::container(id("/r/src"), "s"),
        ResourceEntry::leaf(id("/r/src/lib.rs"), "s").with_parent(Some(id("/r/src"))),
        ResourceEntry::leaf(id("untitled:notes"), "s"),
    ]);

    let report = aggregator(vec![r])
        .diff_subtree(&store, "/r/src", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.diff_text.starts_with("diff --git a/src b/src"));
    assert!(!report.diff_text.contains("README"));
    assert!(!report.diff_text.contains("# Repository"));

    let session = aggregator(vec![repo("/r", &[])])
        .diff_session(&store, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!session.has_differences());
    assert_eq!(session.skipped.len(), 1);
    assert_eq!(session.skipped[0].reason, SkipReason::NonFileScheme);
    assert_eq!(session.summary(), "No differences found (1 skipped: 1 non-file-scheme)");
}

#[tokio::test]
async fn test_subtree_of_unknown_entry_is_not_found() {
    let store = store_with(Vec::new());
    let result = aggregator(Vec::new())
        .diff_subtree(&store, "/nowhere", &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ContextError::NotFound(_))));
}
