//! Version-control seams and the repository-scoped diff aggregator.

pub mod aggregate;
pub mod git;

pub use aggregate::{DiffAggregator, DiffFailure, DiffReport, DiffScope, SkipReason, SkippedEntry};
pub use git::GitCli;

use std::path::Path;
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;

/// One working tree.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Absolute root of the working tree.
    fn root(&self) -> &Path;

    /// Paths (relative to the root, `/`-separated) that differ from HEAD.
    async fn changed_paths_vs_head(&self) -> Result<Vec<String>>;

    /// Unified diff of the working tree against HEAD, for one relative path
    /// or for everything.
    async fn diff_vs_head(&self, relative: Option<&str>) -> Result<String>;
}

/// Finds the repository owning a path.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn find_repository(&self, path: &Path) -> Option<Arc<dyn Repository>>;
}
