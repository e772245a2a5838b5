//! Error taxonomy shared by the store, registry, persistence and diff layers.
//!
//! Batch operations (ingestion, rendering, diffing) never surface a single
//! unit's failure through these variants; they record it in their summary
//! and keep going. The variants here are returned only when a whole request
//! is rejected.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("excluded by pattern: {0}")]
    Excluded(String),

    #[error("already present: {0}")]
    Duplicate(String),

    #[error("failed to read {path}: {reason}")]
    ReadFailure { path: String, reason: String },

    #[error("reorder rejected: {0}")]
    ReorderConflict(String),

    #[error("version control is unavailable")]
    CollaboratorUnavailable,

    #[error("no sessions exist")]
    NoSessions,

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("invalid resource identity: {0:?}")]
    InvalidIdentity(String),

    #[error("invalid session state in {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = ContextError> = std::result::Result<T, E>;
