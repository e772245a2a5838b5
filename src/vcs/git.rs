use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use super::{Repository, VersionControl};

/// Version control through the `git` executable.
#[derive(Default)]
pub struct GitCli {
    repositories: Mutex<HashMap<PathBuf, Arc<GitRepository>>>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a usable `git` is on the path.
    pub async fn available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn find_repository(&self, path: &Path) -> Option<Arc<dyn Repository>> {
        let dir = existing_dir(path).await?;
        let toplevel = match run_git(&dir, &["rev-parse", "--show-toplevel"]).await {
            Ok(out) => out,
            Err(err) => {
                tracing::debug!("No repository for {}: {:#}", path.display(), err);
                return None;
            }
        };
        let root = PathBuf::from(toplevel.trim());
        if root.as_os_str().is_empty() {
            return None;
        }

        let mut repositories = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        let repository: Arc<dyn Repository> = repositories
            .entry(root.clone())
            .or_insert_with(|| Arc::new(GitRepository { root }))
            .clone();
        Some(repository)
    }
}

/// Nearest existing directory at or above `path`, so deleted files still
/// resolve to their repository.
async fn existing_dir(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(dir) = current {
        if is_dir(dir).await {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map_or(false, |meta| meta.is_dir())
}

pub struct GitRepository {
    root: PathBuf,
}

#[async_trait]
impl Repository for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn changed_paths_vs_head(&self) -> Result<Vec<String>> {
        // NUL-separated so names are never quoted or escaped
        let out = run_git(&self.root, &["diff", "--name-only", "-z", "HEAD"]).await?;
        Ok(out
            .split('\0')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn diff_vs_head(&self, relative: Option<&str>) -> Result<String> {
        let mut args = vec!["diff", "HEAD"];
        if let Some(relative) = relative.filter(|r| !r.is_empty()) {
            args.push("--");
            args.push(relative);
        }
        run_git(&self.root, &args)
            .await
            .with_context(|| format!("diff of {} failed", relative.unwrap_or(".")))
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(["-c", "core.quotePath=false"])
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git {} failed with exit code {}: {}",
            args.first().unwrap_or(&""),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
