//! Sessions and the registry that owns them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use chrono::{DateTime, Utc};
use crate::config::ContextConfig;
use crate::error::{ContextError, Result};
use crate::output::{CloseSubscription, OutputDocument, OutputSurface};
use crate::persist::{self, PersistedFile, PersistedSession, PersistedState, StateFile};
use crate::store::{IngestPolicy, ResourceStore};

/// What [`Session::publish`] did with the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Updated,
    Opened,
}

struct OutputLink {
    document: Weak<dyn OutputDocument>,
    closed: Arc<AtomicBool>,
    subscription: Option<Box<dyn CloseSubscription>>,
}

impl OutputLink {
    fn live(&self) -> Option<Arc<dyn OutputDocument>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.document.upgrade().filter(|doc| doc.is_open())
    }

    fn dispose(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
        }
    }
}

/// A named collection of resources with an optional published document.
pub struct Session {
    id: String,
    name: String,
    store: ResourceStore,
    output: Option<OutputLink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entries", &self.store.len())
            .field("linked", &self.output.is_some())
            .finish()
    }
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, policy: IngestPolicy) -> Self {
        let id = id.into();
        Self {
            store: ResourceStore::new(id.clone(), policy),
            id,
            name: name.into(),
            output: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// The linked document, when it is still open.
    pub fn output_document(&self) -> Option<Arc<dyn OutputDocument>> {
        self.output.as_ref().and_then(OutputLink::live)
    }

    /// Show `text` in this session's document: in place when it is still
    /// open, otherwise in a newly opened one.
    pub fn publish(&mut self, surface: &dyn OutputSurface, title: &str, text: &str) -> Result<PublishOutcome> {
        if let Some(document) = self.output_document() {
            document.update(text)?;
            return Ok(PublishOutcome::Updated);
        }

        self.unlink_output();
        let document = surface.open(title, text)?;
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let subscription = document.on_close(Box::new(move || flag.store(true, Ordering::SeqCst)));

        self.output = Some(OutputLink {
            document: Arc::downgrade(&document),
            closed,
            subscription: Some(subscription),
        });
        Ok(PublishOutcome::Opened)
    }

    fn unlink_output(&mut self) {
        if let Some(link) = self.output.take() {
            link.dispose();
        }
    }

    /// Drop the document link and clear the store.
    pub fn dispose(&mut self) {
        self.unlink_output();
        self.store.clear_files();
    }

    fn to_persisted(&self) -> PersistedSession {
        let files = self.store.entries().iter().map(PersistedFile::from_entry).collect();
        let undo = self
            .store
            .undo_snapshot()
            .map(|batch| batch.iter().map(PersistedFile::from_entry).collect());
        PersistedSession {
            id: self.id.clone(),
            name: self.name.clone(),
            files,
            undo,
        }
    }

    fn from_persisted(persisted: PersistedSession, policy: IngestPolicy) -> Self {
        let session = Self::new(persisted.id, persisted.name, policy);
        let entries = persisted
            .files
            .into_iter()
            .map(|file| file.into_entry(&session.id))
            .collect();
        session.store.restore_files(entries);
        let undo = persisted
            .undo
            .map(|batch| batch.into_iter().map(|file| file.into_entry(&session.id)).collect());
        session.store.restore_undo(undo);
        session
    }
}

/// Owns every session, which one is active, and where they are persisted.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: Option<String>,
    state_file: Option<StateFile>,
    policy: IngestPolicy,
    last_saved: Option<DateTime<Utc>>,
}

impl SessionRegistry {
    /// Load persisted sessions, creating one default session when nothing
    /// usable was stored.
    pub fn init(config: &ContextConfig, state_file: Option<StateFile>) -> Result<Self> {
        let policy = IngestPolicy::from_config(config);
        let state = match &state_file {
            Some(file) => file.load()?.unwrap_or_default(),
            None => PersistedState::default(),
        };

        let mut registry = Self {
            sessions: Vec::new(),
            active: None,
            state_file,
            policy,
            last_saved: state.saved_at,
        };
        for persisted in state.sessions {
            let session = Session::from_persisted(persisted, registry.policy.clone());
            registry.sessions.push(session);
        }
        registry.active = state.active_session;

        if registry.sessions.is_empty() {
            registry.create_session(None);
        }
        if registry.active.is_none() {
            registry.active = registry.sessions.first().map(|s| s.id.clone());
        }

        tracing::debug!("Loaded {} sessions", registry.sessions.len());
        Ok(registry)
    }

    /// A registry that is never written to disk.
    pub fn in_memory(config: &ContextConfig) -> Self {
        let mut registry = Self {
            sessions: Vec::new(),
            active: None,
            state_file: None,
            policy: IngestPolicy::from_config(config),
            last_saved: None,
        };
        registry.create_session(None);
        registry
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// When the loaded state was last written.
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.last_saved
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Create a session and make it active. Returns its id.
    pub fn create_session(&mut self, name: Option<&str>) -> String {
        let id = persist::new_session_id();
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| persist::default_session_name(self.sessions.len()));

        tracing::info!("Created session {:?}", name);
        self.sessions.push(Session::new(id.clone(), name, self.policy.clone()));
        self.active = Some(id.clone());
        id
    }

    /// Remove and dispose a session. The first remaining session becomes
    /// active when the removed one was.
    pub fn remove_session(&mut self, id: &str) -> Result<String> {
        let index = self.index_of(id)?;
        let mut session = self.sessions.remove(index);
        let name = session.name.clone();
        session.dispose();

        if self.active.as_deref() == Some(id) {
            self.active = self.sessions.first().map(|s| s.id.clone());
        }
        Ok(name)
    }

    pub fn rename_session(&mut self, id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ContextError::Config("session name must not be empty".to_string()));
        }
        let index = self.index_of(id)?;
        self.sessions[index].name = name.to_string();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Session> {
        let index = self.index_of(id)?;
        Ok(&self.sessions[index])
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut Session> {
        let index = self.index_of(id)?;
        Ok(&mut self.sessions[index])
    }

    /// Find a session by id, then by name, then by unique id prefix.
    pub fn resolve(&self, key: &str) -> Result<&Session> {
        if self.sessions.is_empty() {
            return Err(ContextError::NoSessions);
        }
        if let Some(session) = self.sessions.iter().find(|s| s.id == key) {
            return Ok(session);
        }
        if let Some(session) = self.sessions.iter().find(|s| s.name == key) {
            return Ok(session);
        }
        let mut prefixed = self.sessions.iter().filter(|s| s.id.starts_with(key));
        match (prefixed.next(), prefixed.next()) {
            (Some(session), None) if !key.is_empty() => Ok(session),
            _ => Err(ContextError::SessionNotFound(key.to_string())),
        }
    }

    pub fn active(&self) -> Result<&Session> {
        let id = self.active_key()?;
        self.get(&id)
    }

    pub fn active_mut(&mut self) -> Result<&mut Session> {
        let id = self.active_key()?;
        self.get_mut(&id)
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        self.index_of(id)?;
        self.active = Some(id.to_string());
        Ok(())
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            version: persist::STATE_FORMAT_VERSION,
            active_session: self.active.clone(),
            saved_at: Some(Utc::now()),
            sessions: self.sessions.iter().map(Session::to_persisted).collect(),
        }
    }

    /// Persist all sessions. Without a state file this does nothing.
    pub fn save(&self) -> Result<()> {
        match &self.state_file {
            Some(file) => {
                file.save(&self.snapshot())?;
                tracing::debug!("Saved {} sessions to {}", self.sessions.len(), file.path().display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Save, then release every session.
    pub fn dispose(mut self) -> Result<()> {
        let saved = self.save();
        for session in &mut self.sessions {
            session.unlink_output();
        }
        self.sessions.clear();
        self.active = None;
        saved
    }

    fn active_key(&self) -> Result<String> {
        if self.sessions.is_empty() {
            return Err(ContextError::NoSessions);
        }
        match &self.active {
            Some(id) => Ok(id.clone()),
            None => Ok(self.sessions[0].id.clone()),
        }
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        if self.sessions.is_empty() {
            return Err(ContextError::NoSessions);
        }
        self.sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ContextError::SessionNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ResourceEntry, ResourceId};
    use crate::output::FileSurface;

    fn leaf(raw: &str) -> ResourceEntry {
        ResourceEntry::leaf(ResourceId::parse(raw).unwrap(), "")
    }

    #[test]
    fn test_in_memory_registry_has_default_session() {
        let registry = SessionRegistry::in_memory(&ContextConfig::default());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active().unwrap().name(), "Session 1");
    }

    #[test]
    fn test_create_rename_remove() {
        let mut registry = SessionRegistry::in_memory(&ContextConfig::default());
        let first = registry.active().unwrap().id().to_string();
        let second = registry.create_session(Some("Review"));
        assert_eq!(registry.active_id(), Some(second.as_str()));

        registry.rename_session(&second, "Audit").unwrap();
        assert_eq!(registry.get(&second).unwrap().name(), "Audit");
        assert!(registry.rename_session(&second, "  ").is_err());

        assert_eq!(registry.remove_session(&second).unwrap(), "Audit");
        assert_eq!(registry.active_id(), Some(first.as_str()));

        registry.remove_session(&first).unwrap();
        assert!(matches!(registry.active(), Err(ContextError::NoSessions)));
        assert!(matches!(registry.remove_session("x"), Err(ContextError::NoSessions)));
    }

    #[test]
    fn test_unknown_session_is_reported() {
        let mut registry = SessionRegistry::in_memory(&ContextConfig::default());
        assert!(matches!(
            registry.set_active("missing"),
            Err(ContextError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_by_name_and_prefix() {
        let mut registry = SessionRegistry::in_memory(&ContextConfig::default());
        let id = registry.create_session(Some("Docs"));
        assert_eq!(registry.resolve("Docs").unwrap().id(), id);
        assert_eq!(registry.resolve(&id[..8]).unwrap().id(), id);
        assert!(registry.resolve("nope").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let config = ContextConfig::default();

        let mut registry = SessionRegistry::init(&config, Some(StateFile::new(&path))).unwrap();
        let id = registry.create_session(Some("Work"));
        {
            let store = registry.get(&id).unwrap().store();
            store.add_item(leaf("/a.txt").with_content("cached".into()));
            store.add_item(leaf("/b.txt"));
            store.remove_entry("/b.txt");
        }
        registry.dispose().unwrap();

        let reloaded = SessionRegistry::init(&config, Some(StateFile::new(&path))).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.last_saved().is_some());
        let session = reloaded.active().unwrap();
        assert_eq!(session.name(), "Work");
        let entries = session.store().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, None);
        assert_eq!(entries[0].owner_session, id);
        assert_eq!(session.store().undo_len(), 1);
    }

    #[test]
    fn test_publish_updates_open_document() {
        let dir = tempfile::tempdir().unwrap();
        let surface = FileSurface::new(dir.path(), "md");
        let mut session = Session::new("s", "S", IngestPolicy::default());

        assert_eq!(session.publish(&surface, "S", "one").unwrap(), PublishOutcome::Opened);
        assert_eq!(session.publish(&surface, "S", "two").unwrap(), PublishOutcome::Updated);
        assert_eq!(
            std::fs::read_to_string(surface.document_path("S")).unwrap(),
            "two"
        );

        surface.close("S");
        assert!(session.output_document().is_none());
        assert_eq!(session.publish(&surface, "S", "three").unwrap(), PublishOutcome::Opened);
    }
}
