//! Consolidated per-command summaries.
//!
//! Batch commands report one message built from counters rather than one
//! message per item.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use serde::Serialize;

/// Counters for one ingestion command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Whether the requested resource itself was added.
    pub root_added: bool,
    /// Entries appended, including the root.
    pub added: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub not_found: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl IngestSummary {
    /// Fold the counters of another ingestion into this one.
    pub fn merge(&mut self, other: &IngestSummary) {
        self.root_added |= other.root_added;
        self.added += other.added;
        self.excluded += other.excluded;
        self.duplicates += other.duplicates;
        self.not_found += other.not_found;
        self.failed += other.failed;
        self.cancelled |= other.cancelled;
    }

    pub fn skipped(&self) -> usize {
        self.excluded + self.duplicates
    }

    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if self.excluded > 0 {
            parts.push(format!("{} excluded", self.excluded));
        }
        if self.duplicates > 0 {
            parts.push(format!("{} already present", self.duplicates));
        }
        if self.not_found > 0 {
            parts.push(format!("{} not found", self.not_found));
        }
        if self.failed > 0 {
            parts.push(format!("{} failed", self.failed));
        }

        let head = if self.added == 0 {
            "Nothing added".to_string()
        } else {
            format!("Added {} item{}", self.added, plural(self.added))
        };
        let head = if self.cancelled {
            format!("Cancelled. {head}")
        } else {
            head
        };

        if parts.is_empty() {
            head
        } else {
            format!("{head} ({})", parts.join(", "))
        }
    }
}

pub(crate) fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Shared counters updated by concurrent ingestion workers.
#[derive(Debug, Default)]
pub(crate) struct IngestTally {
    added: AtomicUsize,
    excluded: AtomicUsize,
    duplicates: AtomicUsize,
    not_found: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicBool,
}

impl IngestTally {
    pub fn added(&self) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn excluded(&self) {
        self.excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self, root_added: bool) -> IngestSummary {
        IngestSummary {
            root_added,
            added: self.added.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
