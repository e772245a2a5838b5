//! Content aggregation into one document
//!
//! Entries are rendered in store order. Containers are skipped; each leaf
//! becomes one block holding its display path, a language hint and either
//! its content or an inline error marker. Loading failures never abort the
//! batch.

pub mod language;
pub mod tree;

pub use language::language_hint;
pub use tree::{session_outline, structure_listing};

use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use crate::config::{ContextConfig, OutputFormat};
use crate::entry::{ResourceEntry, ResourceId};
use crate::error::{ContextError, Result};
use crate::store::ResourceStore;

const EMPTY_MESSAGE: &str = "No files to render. Add files or folders to the session first.";

/// Loads content that was not cached at ingestion time.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load(&self, identity: &ResourceId) -> Result<String>;
}

/// Reads file-scheme resources from disk. Other schemes have no provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentSource;

#[async_trait]
impl ContentSource for FsContentSource {
    async fn load(&self, identity: &ResourceId) -> Result<String> {
        let Some(path) = identity.as_path() else {
            return Err(ContextError::ReadFailure {
                path: identity.to_string(),
                reason: "no content provider for this scheme".to_string(),
            });
        };
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| ContextError::ReadFailure {
                path: path.display().to_string(),
                reason: err.to_string(),
            })
    }
}

/// A rendered document plus how it went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    pub text: String,
    pub files: usize,
    pub loaded: usize,
    pub failed: usize,
}

impl RenderOutput {
    pub fn summary(&self) -> String {
        let mut message = format!("Rendered {} file{}", self.files, crate::summary::plural(self.files));
        if self.failed > 0 {
            message.push_str(&format!(" ({} could not be read)", self.failed));
        }
        message
    }
}

pub struct ContentRenderer {
    format: OutputFormat,
    roots: Vec<PathBuf>,
    source: Arc<dyn ContentSource>,
}

impl ContentRenderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            roots: Vec::new(),
            source: Arc::new(FsContentSource),
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.output.format).with_roots(config.workspace_roots.clone())
    }

    /// Display paths are made relative to the longest matching root.
    pub fn with_roots(mut self, mut roots: Vec<PathBuf>) -> Self {
        roots.sort_by_key(|root| std::cmp::Reverse(root.as_os_str().len()));
        self.roots = roots;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn display_path(&self, identity: &ResourceId) -> String {
        let Some(path) = identity.as_path() else {
            return identity.to_string();
        };
        self.roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(|relative| relative.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|| path.to_string_lossy().into_owned())
    }

    pub async fn render(&self, entries: &[ResourceEntry], header: Option<&str>) -> String {
        self.render_entries(entries, header, None).await.text
    }

    /// Render a whole store, caching content it had to load.
    pub async fn render_store(&self, store: &ResourceStore, header: Option<&str>) -> RenderOutput {
        let entries = store.entries();
        self.render_entries(&entries, header, Some(store)).await
    }

    async fn render_entries(
        &self,
        entries: &[ResourceEntry],
        header: Option<&str>,
        cache: Option<&ResourceStore>,
    ) -> RenderOutput {
        let mut output = RenderOutput::default();
        let mut blocks = Vec::new();

        for entry in entries.iter().filter(|entry| !entry.is_container()) {
            output.files += 1;
            let display = self.display_path(&entry.identity);
            let language = language_hint(&entry.identity.file_name());

            let body = match &entry.content {
                Some(content) => Ok(content.clone()),
                None => match self.source.load(&entry.identity).await {
                    Ok(content) => {
                        output.loaded += 1;
                        if let Some(store) = cache {
                            store.set_content(&entry.identity, content.clone());
                        }
                        Ok(content)
                    }
                    Err(err) => {
                        tracing::warn!("{}", err);
                        output.failed += 1;
                        Err(err.to_string())
                    }
                },
            };

            blocks.push(match self.format {
                OutputFormat::Markdown => markdown_block(&display, language, body),
                OutputFormat::Xml => xml_block(&display, language, body),
            });
        }

        output.text = self.assemble(blocks, header);
        output
    }

    fn assemble(&self, blocks: Vec<String>, header: Option<&str>) -> String {
        let mut text = String::new();
        if let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) {
            text.push_str(header);
            text.push_str("\n\n");
        }

        match self.format {
            OutputFormat::Markdown => {
                if blocks.is_empty() {
                    text.push_str(&format!("> {EMPTY_MESSAGE}\n"));
                } else {
                    text.push_str(&blocks.join("\n"));
                }
            }
            OutputFormat::Xml => {
                text.push_str("<files>\n");
                if blocks.is_empty() {
                    text.push_str(&format!("<!-- {EMPTY_MESSAGE} -->\n"));
                } else {
                    text.push_str(&blocks.concat());
                }
                text.push_str("</files>\n");
            }
        }
        text
    }
}

fn markdown_block(display: &str, language: &str, body: std::result::Result<String, String>) -> String {
    match body {
        Ok(content) => {
            let fence = "`".repeat(fence_len(&content));
            let newline = if content.ends_with('\n') || content.is_empty() { "" } else { "\n" };
            format!("## {display}\n\n{fence}{language}\n{content}{newline}{fence}\n")
        }
        Err(reason) => format!("## {display}\n\n> Error loading content: {reason}\n"),
    }
}

fn xml_block(display: &str, language: &str, body: std::result::Result<String, String>) -> String {
    let path = escape_attr(display);
    match body {
        Ok(content) => {
            let newline = if content.ends_with('\n') || content.is_empty() { "" } else { "\n" };
            format!(
                "<file path=\"{path}\" language=\"{}\">\n{content}{newline}</file>\n",
                escape_attr(language)
            )
        }
        Err(reason) => format!("<file path=\"{path}\" error=\"{}\" />\n", escape_attr(&reason)),
    }
}

/// One more backtick than the longest run inside `content`, at least three.
fn fence_len(content: &str) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    (longest + 1).max(3)
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
