//! Box-drawing tree listings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;
use ignore::WalkBuilder;
use crate::entry::{ResourceEntry, ResourceId};
use crate::error::{ContextError, Result};
use crate::filter::ExclusionRules;

const BRANCH: &str = "├── ";
const LAST: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_dir: bool,
}

impl TreeNode {
    fn insert_path(&mut self, components: &[&str], is_dir: bool) {
        let Some((first, rest)) = components.split_first() else {
            return;
        };
        let child = self.children.entry(first.to_string()).or_default();
        if rest.is_empty() {
            child.is_dir |= is_dir;
        } else {
            child.is_dir = true;
            child.insert_path(rest, is_dir);
        }
    }

    fn sorted_children(&self) -> Vec<(&String, &TreeNode)> {
        let mut children: Vec<_> = self.children.iter().collect();
        children.sort_by(|(a_name, a), (b_name, b)| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => compare_names(a_name, b_name),
        });
        children
    }

    fn render(&self, output: &mut String, prefix: &str) {
        let children = self.sorted_children();
        let count = children.len();
        for (index, (name, child)) in children.into_iter().enumerate() {
            let last = index + 1 == count;
            output.push_str(prefix);
            output.push_str(if last { LAST } else { BRANCH });
            output.push_str(name);
            if child.is_dir {
                output.push('/');
            }
            output.push('\n');

            let nested = format!("{prefix}{}", if last { SPACE } else { PIPE });
            child.render(output, &nested);
        }
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

/// Directory structure under `root`, directories first, then by name.
///
/// Entries matched by the structure exclusion set (relative to `root`) are
/// left out together with everything below them. `.gitignore` files are
/// honored when `respect_gitignore` is set.
pub async fn structure_listing(root: &Path, rules: &ExclusionRules, respect_gitignore: bool) -> Result<String> {
    let is_dir = tokio::fs::metadata(root).await.map_or(false, |meta| meta.is_dir());
    if !is_dir {
        return Err(ContextError::NotFound(root.display().to_string()));
    }

    let root = root.to_path_buf();
    let rules = rules.clone();
    tokio::task::spawn_blocking(move || walk_structure(&root, &rules, respect_gitignore))
        .await
        .map_err(|err| ContextError::Io(io::Error::new(io::ErrorKind::Other, err)))
}

fn walk_structure(root: &Path, rules: &ExclusionRules, respect_gitignore: bool) -> String {
    let matcher = rules.structure_matcher(root);
    let walk_root = root.to_path_buf();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(respect_gitignore)
        .git_global(respect_gitignore)
        .git_exclude(respect_gitignore)
        .ignore(respect_gitignore)
        .parents(respect_gitignore)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.path() == walk_root {
                return true;
            }
            entry.file_name() != ".git" && !matcher.is_excluded(entry.path())
        })
        .build();

    let mut tree = TreeNode::default();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Error walking directory: {}", err);
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        let components: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        if components.is_empty() {
            continue;
        }
        let is_dir = entry.file_type().map_or(false, |ft| ft.is_dir());
        tree.insert_path(&components, is_dir);
    }

    let root_name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut output = format!("{root_name}/\n");
    tree.render(&mut output, "");
    output
}

/// Outline of a session's entries following parent links in store order.
/// Entries whose parent is missing, or that sit on a parent cycle, are shown
/// at the top level.
pub fn session_outline(entries: &[ResourceEntry], display: impl Fn(&ResourceId) -> String) -> String {
    if entries.is_empty() {
        return "(empty session)\n".to_string();
    }

    let present: HashSet<&ResourceId> = entries.iter().map(|e| &e.identity).collect();
    let mut children: HashMap<&ResourceId, Vec<&ResourceEntry>> = HashMap::new();
    let mut top_level = Vec::new();
    for entry in entries {
        match &entry.parent {
            Some(parent) if present.contains(parent) => children.entry(parent).or_default().push(entry),
            _ => top_level.push(entry),
        }
    }

    let mut output = String::new();
    let mut visited = HashSet::new();
    // entries on a cycle are unreachable from the top level
    let stranded = entries.iter();
    for entry in top_level.into_iter().chain(stranded) {
        if !visited.insert(&entry.identity) {
            continue;
        }
        output.push_str(&display(&entry.identity));
        if entry.is_container() {
            output.push('/');
        }
        output.push('\n');
        outline_children(&entry.identity, &children, "", &mut visited, &mut output);
    }
    output
}

fn outline_children<'a>(
    parent: &'a ResourceId,
    children: &HashMap<&'a ResourceId, Vec<&'a ResourceEntry>>,
    prefix: &str,
    visited: &mut HashSet<&'a ResourceId>,
    output: &mut String,
) {
    let Some(kids) = children.get(parent) else {
        return;
    };
    let kids: Vec<_> = kids.iter().filter(|kid| !visited.contains(&kid.identity)).collect();
    let count = kids.len();
    for (index, kid) in kids.into_iter().enumerate() {
        if !visited.insert(&kid.identity) {
            continue;
        }
        let last = index + 1 == count;
        output.push_str(prefix);
        output.push_str(if last { LAST } else { BRANCH });
        output.push_str(&kid.identity.file_name());
        if kid.is_container() {
            output.push('/');
        }
        output.push('\n');

        let nested = format!("{prefix}{}", if last { SPACE } else { PIPE });
        outline_children(&kid.identity, children, &nested, visited, output);
    }
}
