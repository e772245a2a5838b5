//! Session state file.
//!
//! The current shape is
//!
//! ```json
//! { "version": 2, "activeSession": "..", "sessions": [
//!     { "id": "..", "name": "..",
//!       "files": [{ "identity": "..", "isContainer": false, "parentIdentity": ".." }],
//!       "undo": [ ... ] } ] }
//! ```
//!
//! Version 1 files are a bare array of sessions whose file records use
//! `uri` / `isDirectory` / `parentUri`. They are migrated on load. Loading
//! is lenient per record: anything malformed is skipped with a warning.
//! Cached content is never written.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use crate::entry::{EntryKind, ResourceEntry, ResourceId};
use crate::error::{ContextError, Result};

pub const STATE_FORMAT_VERSION: u32 = 2;

/// One persisted entry, without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFile {
    pub identity: ResourceId,
    pub is_container: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_identity: Option<ResourceId>,
}

impl PersistedFile {
    pub fn from_entry(entry: &ResourceEntry) -> Self {
        Self {
            identity: entry.identity.clone(),
            is_container: entry.is_container(),
            parent_identity: entry.parent.clone(),
        }
    }

    pub fn into_entry(self, owner_session: &str) -> ResourceEntry {
        let kind = if self.is_container {
            EntryKind::Container
        } else {
            EntryKind::Leaf
        };
        ResourceEntry {
            identity: self.identity,
            kind,
            content: None,
            parent: self.parent_identity,
            owner_session: owner_session.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedSession {
    pub id: String,
    pub name: String,
    pub files: Vec<PersistedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<Vec<PersistedFile>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(rename = "activeSession", skip_serializing_if = "Option::is_none")]
    pub active_session: Option<String>,
    #[serde(rename = "savedAt", skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    pub sessions: Vec<PersistedSession>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            active_session: None,
            saved_at: None,
            sessions: Vec::new(),
        }
    }
}

/// JSON state file with atomic writes.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state, returning `Ok(None)` when there is nothing stored.
    /// A file that is not JSON at all is an error so it never gets
    /// overwritten silently.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&text).map_err(|err| ContextError::Persistence {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        Ok(Some(decode_state(value)))
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let payload = serde_json::to_vec_pretty(state).map_err(|err| ContextError::Persistence {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        write_atomic(&self.path, &payload)?;
        Ok(())
    }
}

/// Writes data through a temporary sibling file followed by rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_sibling(path);
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `x.md` and `x.xml` in one directory must not share a temp file.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Interprets any known shape of the state file.
pub fn decode_state(value: Value) -> PersistedState {
    let (raw_sessions, active_session, saved_at) = match value {
        Value::Array(sessions) => {
            tracing::info!("Migrating version 1 session state");
            (sessions, None, None)
        }
        Value::Object(mut root) => {
            if let Some(version) = root.get("version").and_then(Value::as_u64) {
                if version > u64::from(STATE_FORMAT_VERSION) {
                    tracing::warn!("Session state version {} is newer than {}", version, STATE_FORMAT_VERSION);
                }
            }
            let active = string_field(&root, &["activeSession"]);
            let saved_at = string_field(&root, &["savedAt"])
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|stamp| stamp.with_timezone(&Utc));
            let sessions = match root.remove("sessions") {
                Some(Value::Array(sessions)) => sessions,
                _ => {
                    tracing::warn!("Session state has no session list");
                    Vec::new()
                }
            };
            (sessions, active, saved_at)
        }
        Value::Null => (Vec::new(), None, None),
        other => {
            tracing::warn!("Ignoring unrecognized session state: {}", type_name(&other));
            (Vec::new(), None, None)
        }
    };

    let mut seen_ids = HashSet::new();
    let mut sessions = Vec::with_capacity(raw_sessions.len());
    for (index, raw) in raw_sessions.into_iter().enumerate() {
        let Some(mut session) = decode_session(raw, index) else {
            continue;
        };
        if !seen_ids.insert(session.id.clone()) {
            let fresh = new_session_id();
            tracing::warn!("Duplicate session id {}; reassigned to {}", session.id, fresh);
            session.id = fresh.clone();
            seen_ids.insert(fresh);
        }
        sessions.push(session);
    }

    let active_session = active_session.filter(|id| sessions.iter().any(|s| &s.id == id));
    PersistedState {
        version: STATE_FORMAT_VERSION,
        active_session,
        saved_at,
        sessions,
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn default_session_name(index: usize) -> String {
    format!("Session {}", index + 1)
}

fn decode_session(raw: Value, index: usize) -> Option<PersistedSession> {
    let Value::Object(object) = raw else {
        tracing::warn!("Skipping session record {}: not an object", index);
        return None;
    };

    let id = string_field(&object, &["id"]).unwrap_or_else(new_session_id);
    let name = string_field(&object, &["name"]).unwrap_or_else(|| default_session_name(index));
    let files = decode_files(object.get("files"), &name);
    let undo = match object.get("undo") {
        Some(Value::Array(_)) => Some(decode_files(object.get("undo"), &name)).filter(|files| !files.is_empty()),
        _ => None,
    };

    Some(PersistedSession { id, name, files, undo })
}

fn decode_files(raw: Option<&Value>, session_name: &str) -> Vec<PersistedFile> {
    let Some(Value::Array(records)) = raw else {
        return Vec::new();
    };
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let file = decode_file(record);
            if file.is_none() {
                tracing::warn!("Skipping file record {} in session {:?}", index, session_name);
            }
            file
        })
        .collect()
}

fn decode_file(record: &Value) -> Option<PersistedFile> {
    let Value::Object(object) = record else {
        return None;
    };

    let raw_identity = string_field(object, &["identity", "uri"])?;
    let is_container = object
        .get("isContainer")
        .or_else(|| object.get("isDirectory"))
        .and_then(Value::as_bool)?;
    let identity = ResourceId::parse(&raw_identity).ok()?;

    let parent_identity = string_field(object, &["parentIdentity", "parentUri"]).and_then(|raw| {
        match ResourceId::parse(&raw) {
            Ok(parent) => Some(parent),
            Err(err) => {
                tracing::warn!("Dropping parent of {}: {}", identity, err);
                None
            }
        }
    });

    Some(PersistedFile {
        identity,
        is_container,
        parent_identity,
    })
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
