//! Glob-based exclusion matching.
//!
//! Two independent pattern sets exist: one gates ingestion (checked against
//! absolute or workspace-relative paths), the other gates the structure
//! listing (checked against paths relative to the listed root). A pattern
//! excludes a path when, in order:
//!
//! 1. it matches the full normalized path,
//! 2. it matches the path relative to a workspace root (longest root first),
//! 3. it has no separator and matches the base name alone.
//!
//! `*` and `?` never cross `/`, `**` spans any depth. A hidden entry (base
//! name starting with `.`) only matches patterns that spell out a dotted
//! segment themselves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use crate::config::ContextConfig;

/// Glob pattern -> enabled flag, as read from configuration.
pub type PatternMap = BTreeMap<String, bool>;

const CASE_INSENSITIVE: bool = cfg!(windows);

#[derive(Debug, Clone)]
struct CompiledPattern {
    matcher: GlobMatcher,
    allows_hidden: bool,
    bare: bool,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Option<Self> {
        let normalized = pattern.trim().replace('\\', "/");
        let normalized = normalized.trim_end_matches('/');
        if normalized.is_empty() {
            return None;
        }

        let glob = GlobBuilder::new(normalized)
            .literal_separator(true)
            .case_insensitive(CASE_INSENSITIVE)
            .build();

        match glob {
            Ok(glob) => Some(Self {
                matcher: glob.compile_matcher(),
                allows_hidden: normalized.split('/').any(|segment| segment.starts_with('.')),
                bare: !normalized.contains('/'),
            }),
            Err(err) => {
                tracing::warn!("Ignoring invalid exclusion pattern {:?}: {}", pattern, err);
                None
            }
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        !candidate.is_empty() && self.matcher.is_match(candidate)
    }
}

/// Evaluates paths against one exclusion pattern set.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    patterns: Vec<CompiledPattern>,
    /// Normalized roots, longest first.
    roots: Vec<String>,
}

impl ExclusionMatcher {
    /// Compiles the enabled patterns of `patterns`. Invalid globs are logged
    /// and dropped.
    pub fn new(patterns: &PatternMap, roots: &[PathBuf]) -> Self {
        let patterns = patterns
            .iter()
            .filter(|(_, enabled)| **enabled)
            .filter_map(|(pattern, _)| CompiledPattern::compile(pattern))
            .collect();

        let mut roots: Vec<String> = roots
            .iter()
            .map(|root| normalize(root))
            .filter(|root| !root.is_empty())
            .collect();
        roots.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        roots.dedup();

        Self { patterns, roots }
    }

    /// A matcher that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_excluded<P: AsRef<Path>>(&self, path: P) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let full = normalize(path.as_ref());
        let base = full.rsplit('/').next().unwrap_or(&full);
        let hidden = base.starts_with('.') && base != "." && base != "..";
        let relatives: Vec<&str> = self
            .roots
            .iter()
            .filter_map(|root| strip_root(&full, root))
            .collect();

        self.patterns.iter().any(|pattern| {
            if hidden && !pattern.allows_hidden {
                return false;
            }
            pattern.matches(&full)
                || relatives.iter().any(|relative| pattern.matches(relative))
                || (pattern.bare && pattern.matches(base))
        })
    }
}

/// The two configured pattern sets.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    pub ingest: PatternMap,
    pub structure: PatternMap,
    pub workspace_roots: Vec<PathBuf>,
}

impl ExclusionRules {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            ingest: config.ingest.exclude.clone(),
            structure: config.structure.exclude.clone(),
            workspace_roots: config.workspace_roots.clone(),
        }
    }

    /// Matcher applied while ingesting resources into a store.
    pub fn ingest_matcher(&self) -> ExclusionMatcher {
        ExclusionMatcher::new(&self.ingest, &self.workspace_roots)
    }

    /// Matcher applied while listing the structure under `root`.
    pub fn structure_matcher(&self, root: &Path) -> ExclusionMatcher {
        ExclusionMatcher::new(&self.structure, &[root.to_path_buf()])
    }
}

fn normalize(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() && text.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_root<'a>(full: &'a str, root: &str) -> Option<&'a str> {
    if full.len() <= root.len() {
        return None;
    }
    let head = full.get(..root.len())?;
    let tail = &full[root.len()..];
    let same_root = if CASE_INSENSITIVE {
        head.eq_ignore_ascii_case(root)
    } else {
        head == root
    };
    if !same_root {
        return None;
    }
    if root.ends_with('/') {
        Some(tail)
    } else {
        tail.strip_prefix('/')
    }
}
