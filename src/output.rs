//! Output documents a session publishes into.
//!
//! The host owns open documents; a session only keeps a weak link and a
//! one-shot close observer. [`FileSurface`] is the command-line host: every
//! document is a file in an output directory, and deleting the file counts
//! as closing it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use crate::error::Result;
use crate::persist::write_atomic;

pub type CloseObserver = Box<dyn FnOnce() + Send>;

/// A rendered document that can be updated in place while open.
pub trait OutputDocument: Send + Sync {
    fn title(&self) -> &str;

    fn is_open(&self) -> bool;

    fn update(&self, text: &str) -> Result<()>;

    /// Register an observer fired once when the document closes.
    fn on_close(&self, observer: CloseObserver) -> Box<dyn CloseSubscription>;
}

pub trait CloseSubscription: Send {
    fn dispose(self: Box<Self>);
}

/// Opens new documents.
pub trait OutputSurface: Send + Sync {
    fn open(&self, title: &str, text: &str) -> Result<Arc<dyn OutputDocument>>;
}

#[derive(Default)]
struct Observers {
    next_id: AtomicU64,
    pending: Mutex<Vec<(u64, CloseObserver)>>,
}

impl Observers {
    fn register(&self, observer: CloseObserver) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, observer));
        id
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|(pending, _)| *pending != id);
    }

    fn fire(&self) {
        let pending = std::mem::take(&mut *self.lock());
        for (_, observer) in pending {
            observer();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, CloseObserver)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct FileDocumentInner {
    title: String,
    path: PathBuf,
    open: AtomicBool,
    observers: Observers,
}

/// A document backed by one file.
pub struct FileDocument {
    inner: Arc<FileDocumentInner>,
}

impl FileDocument {
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Mark closed and notify observers. Later calls do nothing.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            self.inner.observers.fire();
        }
    }
}

impl OutputDocument for FileDocument {
    fn title(&self) -> &str {
        &self.inner.title
    }

    fn is_open(&self) -> bool {
        if !self.inner.open.load(Ordering::SeqCst) {
            return false;
        }
        if !self.inner.path.exists() {
            tracing::debug!("Output file {} was removed", self.inner.path.display());
            self.close();
            return false;
        }
        true
    }

    fn update(&self, text: &str) -> Result<()> {
        write_atomic(&self.inner.path, text.as_bytes())?;
        Ok(())
    }

    fn on_close(&self, observer: CloseObserver) -> Box<dyn CloseSubscription> {
        let id = self.inner.observers.register(observer);
        Box::new(FileCloseSubscription {
            document: Arc::downgrade(&self.inner),
            id,
        })
    }
}

struct FileCloseSubscription {
    document: Weak<FileDocumentInner>,
    id: u64,
}

impl CloseSubscription for FileCloseSubscription {
    fn dispose(self: Box<Self>) {
        if let Some(document) = self.document.upgrade() {
            document.observers.remove(self.id);
        }
    }
}

/// Writes documents as files under one directory and keeps them open for
/// the lifetime of the surface.
pub struct FileSurface {
    dir: PathBuf,
    extension: &'static str,
    documents: Mutex<Vec<Arc<FileDocument>>>,
}

impl FileSurface {
    pub fn new(dir: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            dir: dir.into(),
            extension,
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a document with `title` is written to.
    pub fn document_path(&self, title: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(title), self.extension))
    }

    /// Close the document titled `title`, if open.
    pub fn close(&self, title: &str) -> bool {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = documents.iter().position(|doc| doc.title() == title) else {
            return false;
        };
        let document = documents.remove(index);
        drop(documents);
        document.close();
        true
    }
}

impl OutputSurface for FileSurface {
    fn open(&self, title: &str, text: &str) -> Result<Arc<dyn OutputDocument>> {
        let path = self.document_path(title);
        write_atomic(&path, text.as_bytes())?;
        tracing::debug!("Opened output document {}", path.display());

        let document = Arc::new(FileDocument {
            inner: Arc::new(FileDocumentInner {
                title: title.to_string(),
                path,
                open: AtomicBool::new(true),
                observers: Observers::default(),
            }),
        });

        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.retain(|doc| doc.title() != title);
        documents.push(document.clone());
        Ok(document)
    }
}

fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect();
    let stem = stem.trim_matches(|c| c == '-' || c == '.');
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_open_update_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path(), "md");

        let doc = surface.open("My Session", "first").unwrap();
        let path = surface.document_path("My Session");
        assert_eq!(path.file_name().unwrap(), "My-Session.md");
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        doc.update("second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(doc.is_open());

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let _subscription = doc.on_close(Box::new(move || flag.store(true, Ordering::SeqCst)));

        assert!(surface.close("My Session"));
        assert!(closed.load(Ordering::SeqCst));
        assert!(!doc.is_open());
    }

    #[test]
    fn test_disposed_observer_is_not_called() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path(), "md");
        let doc = surface.open("doc", "x").unwrap();

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let subscription = doc.on_close(Box::new(move || flag.store(true, Ordering::SeqCst)));
        subscription.dispose();

        surface.close("doc");
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_deleted_file_counts_as_closed() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path(), "md");
        let doc = surface.open("doc", "x").unwrap();

        fs::remove_file(surface.document_path("doc")).unwrap();
        assert!(!doc.is_open());
    }

    #[test]
    fn test_weak_link_dies_with_surface() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path(), "md");
        let weak = Arc::downgrade(&surface.open("doc", "x").unwrap());
        assert!(weak.upgrade().is_some());

        drop(surface);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_file_stem_sanitizing() {
        assert_eq!(file_stem("a/b c"), "a-b-c");
        assert_eq!(file_stem("///"), "document");
    }
}
