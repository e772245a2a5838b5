use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use ctxpack::output::CloseObserver;
use ctxpack::{
    CloseSubscription, ContentRenderer, ContextConfig, FileSurface, OutputDocument, OutputFormat, OutputSurface,
    PublishOutcome, ResourceEntry, ResourceId, SessionRegistry, StateFile,
};

fn config_in(temp_dir: &TempDir) -> ContextConfig {
    let mut config = ContextConfig::default();
    config.storage.state_file = Some(temp_dir.path().join("sessions.json"));
    config
}

#[test]
fn test_legacy_state_is_migrated_on_init() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let state_path = temp_dir.path().join("sessions.json");

    // Version 1 kept a bare list of sessions
    fs::write(
        &state_path,
        r#"[
            {"id": "old-1", "name": "Work", "files": [
                {"uri": "/p", "isDirectory": true},
                {"uri": "/p/a.txt", "isDirectory": false, "parentUri": "/p"},
                {"isDirectory": false}
            ]},
            {"id": "old-1", "files": []}
        ]"#,
    )
    .expect("Failed to write state");

    let config = config_in(&temp_dir);
    let registry = SessionRegistry::init(&config, Some(StateFile::new(&state_path))).unwrap();

    assert_eq!(registry.len(), 2);
    let work = registry.resolve("Work").unwrap();
    assert_eq!(work.id(), "old-1");
    let entries = work.store().entries();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_container());
    assert_eq!(entries[1].parent, Some(ResourceId::parse("/p").unwrap()));

    // the clashing id was replaced
    let second = &registry.sessions()[1];
    assert_ne!(second.id(), "old-1");
    assert_eq!(second.name(), "Session 2");
    assert_eq!(registry.active_id(), Some("old-1"));
}

#[test]
fn test_sessions_survive_a_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = config_in(&temp_dir);
    let state_path = config.storage.state_file_path();

    let mut registry = SessionRegistry::init(&config, Some(StateFile::new(&state_path))).unwrap();
    let docs = registry.create_session(Some("Docs"));
    {
        let store = registry.get(&docs).unwrap().store();
        store.add_item(ResourceEntry::leaf(ResourceId::parse("/keep.md").unwrap(), &docs));
        store.add_item(ResourceEntry::leaf(ResourceId::parse("/gone.md").unwrap(), &docs));
        assert!(store.remove_entry("/gone.md"));
    }
    registry.dispose().unwrap();

    let reloaded = SessionRegistry::init(&config, Some(StateFile::new(&state_path))).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.active_id(), Some(docs.as_str()));
    assert!(reloaded.last_saved().is_some());

    let store = reloaded.get(&docs).unwrap().store();
    assert_eq!(store.len(), 1);
    let restored = store.undo().unwrap();
    assert_eq!(restored[0].identity.as_str(), "/gone.md");
}

#[test]
fn test_corrupt_state_is_an_error_and_left_alone() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = config_in(&temp_dir);
    let state_path = config.storage.state_file_path();
    fs::write(&state_path, "{ not json").unwrap();

    assert!(SessionRegistry::init(&config, Some(StateFile::new(&state_path))).is_err());
    assert_eq!(fs::read_to_string(&state_path).unwrap(), "{ not json");
}

#[tokio::test]
async fn test_render_session_files() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path().join("proj");
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src").join("main.rs"), "fn main() {}\n").unwrap();

    let registry = SessionRegistry::in_memory(&ContextConfig::default());
    let session = registry.active().unwrap();
    let renderer = ContentRenderer::new(OutputFormat::Markdown).with_roots(vec![root.clone()]);

    let empty = renderer.render_store(session.store(), None).await;
    assert_eq!(
        empty.text,
        "> No files to render. Add files or folders to the session first.\n"
    );

    assert!(
        session
            .store()
            .add_resource(&ResourceId::from_path(&root).to_string(), None)
            .await
    );
    let output = renderer.render_store(session.store(), Some("Context")).await;
    assert_eq!(
        output.text,
        "Context\n\n## src/main.rs\n\n```rust\nfn main() {}\n```\n"
    );
    assert_eq!(output.files, 1);
    assert_eq!(output.failed, 0);
}

#[tokio::test]
async fn test_publish_reuses_open_document() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let surface = FileSurface::new(temp_dir.path(), "md");
    let mut registry = SessionRegistry::in_memory(&ContextConfig::default());
    let session = registry.active_mut().unwrap();

    assert_eq!(session.publish(&surface, "Main", "one").unwrap(), PublishOutcome::Opened);
    assert_eq!(session.publish(&surface, "Main", "two").unwrap(), PublishOutcome::Updated);
    let path = surface.document_path("Main");
    assert_eq!(fs::read_to_string(&path).unwrap(), "two");

    // closing the document makes the next publish open a fresh one
    assert!(surface.close("Main"));
    assert!(session.output_document().is_none());
    assert_eq!(session.publish(&surface, "Main", "three").unwrap(), PublishOutcome::Opened);

    // so does deleting its file
    fs::remove_file(&path).unwrap();
    assert_eq!(session.publish(&surface, "Main", "four").unwrap(), PublishOutcome::Opened);
    assert_eq!(fs::read_to_string(&path).unwrap(), "four");
}

/// Counts how often documents are opened and keeps them in memory.
#[derive(Default)]
struct MemorySurface {
    opened: AtomicUsize,
    documents: Mutex<Vec<Arc<MemoryDocument>>>,
}

struct MemoryDocument {
    title: String,
    text: Mutex<String>,
}

struct NoopSubscription;

impl CloseSubscription for NoopSubscription {
    fn dispose(self: Box<Self>) {}
}

impl OutputDocument for MemoryDocument {
    fn title(&self) -> &str {
        &self.title
    }

    fn is_open(&self) -> bool {
        true
    }

    fn update(&self, text: &str) -> ctxpack::Result<()> {
        *self.text.lock().unwrap() = text.to_string();
        Ok(())
    }

    fn on_close(&self, _observer: CloseObserver) -> Box<dyn CloseSubscription> {
        Box::new(NoopSubscription)
    }
}

impl OutputSurface for MemorySurface {
    fn open(&self, title: &str, text: &str) -> ctxpack::Result<Arc<dyn OutputDocument>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let document = Arc::new(MemoryDocument {
            title: title.to_string(),
            text: Mutex::new(text.to_string()),
        });
        self.documents.lock().unwrap().push(document.clone());
        Ok(document)
    }
}

#[test]
fn test_each_session_keeps_its_own_document() {
    let surface = MemorySurface::default();
    let mut registry = SessionRegistry::in_memory(&ContextConfig::default());
    let first = registry.active_id().unwrap().to_string();
    let second = registry.create_session(Some("Second"));

    for _ in 0..3 {
        registry.get_mut(&first).unwrap().publish(&surface, "First", "a").unwrap();
        registry.get_mut(&second).unwrap().publish(&surface, "Second", "b").unwrap();
    }
    assert_eq!(surface.opened.load(Ordering::SeqCst), 2);

    // removing a session drops its link; a replacement opens anew
    registry.remove_session(&second).unwrap();
    let third = registry.create_session(Some("Second"));
    registry.get_mut(&third).unwrap().publish(&surface, "Second", "c").unwrap();
    assert_eq!(surface.opened.load(Ordering::SeqCst), 3);

    let documents = surface.documents.lock().unwrap();
    assert_eq!(*documents[0].text.lock().unwrap(), "a");
    assert_eq!(*documents[2].text.lock().unwrap(), "c");
}
