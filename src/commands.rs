//! Command handlers for the `ctxpack` binary.
//!
//! Every command prints its artifact (if any) on stdout and one summary line
//! on stderr. Commands that change a session save the registry afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use crate::cancel::CancellationToken;
use crate::cli::{absolutize, Cli, Command, SessionCommand};
use crate::config::{ContextConfig, OutputFormat};
use crate::entry::ResourceId;
use crate::filter::ExclusionRules;
use crate::output::{FileSurface, OutputSurface};
use crate::persist::StateFile;
use crate::render::{session_outline, structure_listing, ContentRenderer};
use crate::session::{PublishOutcome, Session, SessionRegistry};
use crate::summary::{plural, IngestSummary};
use crate::vcs::{DiffAggregator, GitCli, VersionControl};

/// Result of one command.
pub struct Outcome {
    pub message: String,
    /// Whether sessions must be saved.
    pub changed: bool,
}

impl Outcome {
    fn changed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: true,
        }
    }

    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: false,
        }
    }
}

/// Where `diff` gets its version control from.
enum VcsSource {
    /// Use `git` when it is on the path.
    Detect,
    Fixed(Option<Arc<dyn VersionControl>>),
}

pub struct App {
    config: ContextConfig,
    registry: SessionRegistry,
    session_key: Option<String>,
    cwd: PathBuf,
    cancel: CancellationToken,
    vcs: VcsSource,
}

impl App {
    pub fn new(cli: &Cli, cancel: CancellationToken) -> Result<Self> {
        let config = cli.load_config()?;
        let state_path = config.storage.state_file_path();
        let registry = SessionRegistry::init(&config, Some(StateFile::new(&state_path)))
            .with_context(|| format!("failed to load sessions from {}", state_path.display()))?;
        let cwd = std::env::current_dir().context("cannot determine the current directory")?;

        Ok(Self {
            config,
            registry,
            session_key: cli.session.clone(),
            cwd,
            cancel,
            vcs: VcsSource::Detect,
        })
    }

    /// Diff through `vcs` instead of looking for `git`; `None` behaves as if
    /// no version control were installed.
    pub fn with_version_control(mut self, vcs: Option<Arc<dyn VersionControl>>) -> Self {
        self.vcs = VcsSource::Fixed(vcs);
        self
    }

    /// Run one command, save when it changed anything, and release the registry.
    pub async fn run(mut self, command: Command) -> Result<()> {
        let outcome = self.dispatch(command).await?;
        if outcome.changed {
            self.registry.dispose().context("failed to save sessions")?;
        }
        if !outcome.message.is_empty() {
            eprintln!("{}", outcome.message);
        }
        Ok(())
    }

    async fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::Add { paths, parent } => self.add(&paths, parent.as_deref()).await,
            Command::Remove { identity } => self.remove(&identity),
            Command::Undo => self.undo(),
            Command::Clear => self.clear(),
            Command::Move { items, before, to_root } => self.move_items(&items, before.as_deref(), to_root),
            Command::List { tree } => self.list(tree),
            Command::Render { format, header, out } => {
                let format = format.map(OutputFormat::from).unwrap_or(self.config.output.format);
                self.render(format, header, out.as_deref()).await
            }
            Command::Tree { path, no_gitignore } => self.tree(path.as_deref(), no_gitignore).await,
            Command::Diff { subtree, out } => self.diff(subtree.as_deref(), out.as_deref()).await,
            Command::Session { action } => self.session(action),
        }
    }

    fn session_id(&self) -> Result<String> {
        let session = match &self.session_key {
            Some(key) => self.registry.resolve(key)?,
            None => self.registry.active()?,
        };
        Ok(session.id().to_string())
    }

    fn current(&self) -> Result<&Session> {
        let id = self.session_id()?;
        Ok(self.registry.get(&id)?)
    }

    /// Paths (and `file:` URIs) become absolute identities; other URIs are
    /// kept as they are.
    fn identity(&self, raw: &str) -> Result<String> {
        let id = ResourceId::parse(raw)?;
        if id.scheme().is_some() {
            return Ok(id.to_string());
        }
        Ok(ResourceId::from_path(absolutize(&self.cwd, Path::new(id.as_str()))).to_string())
    }

    async fn add(&mut self, paths: &[String], parent: Option<&str>) -> Result<Outcome> {
        let parent = parent.map(|p| self.identity(p)).transpose()?;
        let identities = paths.iter().map(|p| self.identity(p)).collect::<Result<Vec<_>>>()?;
        let store = self.current()?.store().clone();

        let mut total = IngestSummary::default();
        for identity in &identities {
            if self.cancel.is_cancelled() {
                total.cancelled = true;
                break;
            }
            let summary = store.ingest(identity, parent.as_deref(), &self.cancel).await;
            total.merge(&summary);
        }
        let changed = total.added > 0;
        Ok(Outcome {
            message: total.message(),
            changed,
        })
    }

    fn remove(&mut self, identity: &str) -> Result<Outcome> {
        let identity = self.identity(identity)?;
        let store = self.current()?.store();
        if !store.remove_entry(&identity) {
            return Ok(Outcome::unchanged(format!("Not in session: {identity}")));
        }
        let count = store.undo_len();
        Ok(Outcome::changed(format!(
            "Removed {count} entr{} (undo available)",
            if count == 1 { "y" } else { "ies" }
        )))
    }

    fn undo(&mut self) -> Result<Outcome> {
        match self.current()?.store().undo() {
            Some(restored) => Ok(Outcome::changed(format!(
                "Restored {} entr{}",
                restored.len(),
                if restored.len() == 1 { "y" } else { "ies" }
            ))),
            None => Ok(Outcome::unchanged("Nothing to undo")),
        }
    }

    fn clear(&mut self) -> Result<Outcome> {
        let count = self.current()?.store().clear_files();
        if count == 0 {
            return Ok(Outcome::unchanged("Session is already empty"));
        }
        Ok(Outcome::changed(format!(
            "Cleared {count} entr{} (undo available)",
            if count == 1 { "y" } else { "ies" }
        )))
    }

    fn move_items(&mut self, items: &[String], before: Option<&str>, to_root: bool) -> Result<Outcome> {
        let items = items.iter().map(|i| self.identity(i)).collect::<Result<Vec<_>>>()?;
        let before = before.map(|b| self.identity(b)).transpose()?;
        let dragged: Vec<&str> = items.iter().map(String::as_str).collect();

        self.current()?
            .store()
            .try_reorder_items(&dragged, before.as_deref(), to_root)?;
        Ok(Outcome::changed(format!(
            "Moved {} item{}",
            dragged.len(),
            plural(dragged.len())
        )))
    }

    fn list(&self, tree: bool) -> Result<Outcome> {
        let session = self.current()?;
        let entries = session.store().entries();
        let renderer = ContentRenderer::from_config(&self.config);

        if tree {
            print!("{}", session_outline(&entries, |id| renderer.display_path(id)));
        } else {
            for entry in &entries {
                let suffix = if entry.is_container() { "/" } else { "" };
                println!("{}{}", entry.identity, suffix);
            }
        }
        Ok(Outcome::unchanged(format!(
            "{}: {} entr{}",
            session.name(),
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        )))
    }

    async fn render(&mut self, format: OutputFormat, header: Option<String>, out: Option<&Path>) -> Result<Outcome> {
        let renderer = ContentRenderer::new(format).with_roots(self.config.workspace_roots.clone());
        let header = header.or_else(|| self.config.output.header.clone());
        let id = self.session_id()?;
        let session = self.registry.get_mut(&id)?;
        let output = renderer.render_store(session.store(), header.as_deref()).await;

        match out {
            Some(dir) => {
                let extension = match format {
                    OutputFormat::Markdown => "md",
                    OutputFormat::Xml => "xml",
                };
                let surface = FileSurface::new(dir, extension);
                let title = session.name().to_string();
                publish(session, &surface, &title, &output.text)?;
                println!("{}", surface.document_path(&title).display());
            }
            None => print!("{}", output.text),
        }
        Ok(Outcome::unchanged(output.summary()))
    }

    async fn tree(&self, path: Option<&Path>, no_gitignore: bool) -> Result<Outcome> {
        let root = absolutize(&self.cwd, path.unwrap_or(Path::new(".")));
        let rules = ExclusionRules::from_config(&self.config);
        let respect_gitignore = self.config.structure.respect_gitignore && !no_gitignore;
        let listing = structure_listing(&root, &rules, respect_gitignore).await?;
        print!("{listing}");
        Ok(Outcome::unchanged(""))
    }

    async fn diff(&mut self, subtree: Option<&str>, out: Option<&Path>) -> Result<Outcome> {
        let vcs: Option<Arc<dyn VersionControl>> = match &self.vcs {
            VcsSource::Fixed(vcs) => vcs.clone(),
            VcsSource::Detect => {
                if GitCli::available().await {
                    Some(Arc::new(GitCli::new()))
                } else {
                    None
                }
            }
        };
        let aggregator = DiffAggregator::new(vcs);

        let subtree = subtree.map(|s| self.identity(s)).transpose()?;
        let id = self.session_id()?;
        let session = self.registry.get_mut(&id)?;
        let report = match &subtree {
            Some(identity) => aggregator.diff_subtree(session.store(), identity, &self.cancel).await?,
            None => aggregator.diff_session(session.store(), &self.cancel).await?,
        };

        for failure in &report.errors {
            eprintln!("error: {failure}");
        }
        if report.has_differences() {
            match out {
                Some(dir) => {
                    let surface = FileSurface::new(dir, "diff");
                    let title = format!("{} diff", session.name());
                    publish(session, &surface, &title, &report.diff_text)?;
                    println!("{}", surface.document_path(&title).display());
                }
                None => println!("{}", report.diff_text),
            }
        }
        Ok(Outcome::unchanged(report.summary()))
    }

    fn session(&mut self, action: SessionCommand) -> Result<Outcome> {
        match action {
            SessionCommand::List => {
                let active = self.registry.active_id().map(str::to_string);
                for session in self.registry.sessions() {
                    let marker = if active.as_deref() == Some(session.id()) { "*" } else { " " };
                    println!(
                        "{} {}  {}  ({} entries)",
                        marker,
                        short_id(session.id()),
                        session.name(),
                        session.store().len()
                    );
                }
                let saved = self
                    .registry
                    .last_saved()
                    .map(|stamp| format!(", last saved {}", stamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")))
                    .unwrap_or_default();
                Ok(Outcome::unchanged(format!(
                    "{} session{}{}",
                    self.registry.len(),
                    plural(self.registry.len()),
                    saved
                )))
            }
            SessionCommand::New { name } => {
                let id = self.registry.create_session(name.as_deref());
                let name = self.registry.get(&id)?.name().to_string();
                Ok(Outcome::changed(format!("Created session {name:?} ({})", short_id(&id))))
            }
            SessionCommand::Rename { session, name } => {
                let id = self.registry.resolve(&session)?.id().to_string();
                self.registry.rename_session(&id, &name)?;
                Ok(Outcome::changed(format!("Renamed session to {:?}", name.trim())))
            }
            SessionCommand::Delete { session } => {
                let id = self.registry.resolve(&session)?.id().to_string();
                let name = self.registry.remove_session(&id)?;
                Ok(Outcome::changed(format!("Deleted session {name:?}")))
            }
            SessionCommand::Use { session } => {
                let id = self.registry.resolve(&session)?.id().to_string();
                self.registry.set_active(&id)?;
                let name = self.registry.get(&id)?.name().to_string();
                Ok(Outcome::changed(format!("Switched to session {name:?}")))
            }
        }
    }
}

fn publish(session: &mut Session, surface: &dyn OutputSurface, title: &str, text: &str) -> Result<()> {
    match session.publish(surface, title, text)? {
        PublishOutcome::Opened => tracing::debug!("Opened document {:?}", title),
        PublishOutcome::Updated => tracing::debug!("Updated document {:?}", title),
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
