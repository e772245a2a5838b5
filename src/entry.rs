use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use url::Url;
use crate::error::{ContextError, Result};

/// Canonical address of a resource tracked by a session.
///
/// Plain paths and `file:` URIs are filesystem-addressable. Anything else
/// carrying a `scheme:` prefix (archive members, unsaved buffers, ...) is an
/// opaque resource whose content is only ever loaded on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Validates an identity string and brings it into canonical form.
    ///
    /// Filesystem identities are always stored as plain paths, so
    /// `file:///p/a%20b.txt` and `/p/a b.txt` name the same entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = || ContextError::InvalidIdentity(raw.to_string());
        if raw.is_empty() {
            return Err(invalid());
        }
        let id = Self(raw.to_string());
        match id.scheme() {
            None => Ok(Self::from_path(raw)),
            Some("file") => file_uri_path(raw).map(Self::from_path).ok_or_else(invalid),
            Some(_) => Ok(id),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let text = path.as_ref().to_string_lossy().replace('\\', "/");
        Self(trim_trailing_separator(&text).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URI scheme, if the identity carries one.
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.0.split_once(':')?;
        let mut chars = scheme.chars();
        let first = chars.next()?;
        // single letters are drive prefixes, not schemes
        if scheme.len() < 2 || !first.is_ascii_alphabetic() {
            return None;
        }
        if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            Some(scheme)
        } else {
            None
        }
    }

    pub fn is_file_scheme(&self) -> bool {
        matches!(self.scheme(), None | Some("file"))
    }

    /// Filesystem path for file-scheme identities.
    pub fn as_path(&self) -> Option<PathBuf> {
        match self.scheme() {
            None => Some(PathBuf::from(&self.0)),
            Some("file") => file_uri_path(&self.0),
            Some(_) => None,
        }
    }

    /// Path-shaped part of the identity, used for exclusion checks and
    /// display. For opaque schemes this is everything after the scheme.
    pub fn path_part(&self) -> String {
        match self.as_path() {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                let rest = self.0.split_once(':').map(|(_, rest)| rest).unwrap_or(&self.0);
                rest.trim_start_matches('/').to_string()
            }
        }
    }

    /// Last path segment, or the whole identity when there is none.
    pub fn file_name(&self) -> String {
        let part = self.path_part();
        let trimmed = trim_trailing_separator(&part);
        trimmed
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(trimmed)
            .to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded local path of a `file:` URI. URIs naming a remote host or no
/// path at all have none.
fn file_uri_path(raw: &str) -> Option<PathBuf> {
    let url = Url::parse(raw).ok()?;
    if url.path().trim_start_matches('/').is_empty() {
        return None;
    }
    url.to_file_path().ok()
}

fn trim_trailing_separator(text: &str) -> &str {
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() {
        // keep "/" for the filesystem root
        &text[..text.len().min(1)]
    } else {
        trimmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Container,
    Leaf,
}

/// One resource or container tracked by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub identity: ResourceId,
    pub kind: EntryKind,
    /// Cached text; `None` means "not loaded yet".
    pub content: Option<String>,
    pub parent: Option<ResourceId>,
    pub owner_session: String,
}

impl ResourceEntry {
    pub fn leaf(identity: ResourceId, owner_session: impl Into<String>) -> Self {
        Self {
            identity,
            kind: EntryKind::Leaf,
            content: None,
            parent: None,
            owner_session: owner_session.into(),
        }
    }

    pub fn container(identity: ResourceId, owner_session: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Container,
            ..Self::leaf(identity, owner_session)
        }
    }

    pub fn with_parent(mut self, parent: Option<ResourceId>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind == EntryKind::Container
    }

    pub fn is_root_level(&self) -> bool {
        self.parent.is_none()
    }
}
