use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crate::config::{ContextConfig, OutputFormat};

#[derive(Parser)]
#[command(name = "ctxpack")]
#[command(version)]
#[command(about = "Collect files into sessions and bundle them into one prompt-ready document")]
#[command(long_about = "ctxpack keeps named sessions of files and folders, renders them into a single markdown or XML document, prints directory structures, and produces git diffs scoped to a session or one of its folders.")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session state file
    #[arg(long, global = true, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Session to operate on (id, name or id prefix); defaults to the active one
    #[arg(short, long, global = true, value_name = "SESSION")]
    pub session: Option<String>,

    /// Workspace root for relative matching and display paths (repeatable)
    #[arg(long = "root", global = true, value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add files or folders (folders are added recursively)
    Add {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,
        /// Attach the added resources under this existing entry
        #[arg(long, value_name = "IDENTITY")]
        parent: Option<String>,
    },
    /// Remove an entry and everything below it
    Remove {
        #[arg(value_name = "IDENTITY")]
        identity: String,
    },
    /// Restore the most recent removal or clear
    Undo,
    /// Remove every entry from the session
    Clear,
    /// Reorder entries that share a parent
    Move {
        #[arg(required = true, value_name = "IDENTITY")]
        items: Vec<String>,
        /// Place the entries right before this one (adopting its parent)
        #[arg(long, value_name = "IDENTITY", conflicts_with = "to_root")]
        before: Option<String>,
        /// Move the entries to the top of the session root
        #[arg(long)]
        to_root: bool,
    },
    /// List the session's entries
    List {
        /// Show entries as a tree
        #[arg(long)]
        tree: bool,
    },
    /// Render the session into one document
    Render {
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        /// Text placed above the rendered files
        #[arg(long)]
        header: Option<String>,
        /// Write the document into this directory instead of stdout
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Print the directory structure of a folder
    Tree {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Do not hide entries ignored by .gitignore
        #[arg(long)]
        no_gitignore: bool,
    },
    /// Diff the session (or one folder of it) against HEAD
    Diff {
        /// Only diff this entry and its descendants
        #[arg(long, value_name = "IDENTITY")]
        subtree: Option<String>,
        /// Write the diff into this directory instead of stdout
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// List sessions
    List,
    /// Create a session and make it active
    New { name: Option<String> },
    /// Rename a session
    Rename { session: String, name: String },
    /// Delete a session
    Delete { session: String },
    /// Make a session the active one
    Use { session: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Markdown,
    Xml,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Xml => OutputFormat::Xml,
        }
    }
}

impl Cli {
    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    /// Configuration with command-line overrides applied.
    pub fn load_config(&self) -> Result<ContextConfig> {
        let mut config = ContextConfig::load_or_default(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "invalid configuration".to_string(),
        })?;

        if let Some(state) = &self.state {
            config.storage.state_file = Some(state.clone());
        }
        if !self.roots.is_empty() {
            let cwd = std::env::current_dir().context("cannot determine the current directory")?;
            config.workspace_roots = self.roots.iter().map(|root| absolutize(&cwd, root)).collect();
        }
        Ok(config)
    }
}

/// Lexically absolute form of `path`, without touching the filesystem.
pub fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize() {
        let cwd = Path::new("/work/project");
        assert_eq!(absolutize(cwd, Path::new("src/./lib.rs")), PathBuf::from("/work/project/src/lib.rs"));
        assert_eq!(absolutize(cwd, Path::new("../other")), PathBuf::from("/work/other"));
        assert_eq!(absolutize(cwd, Path::new("/abs/x")), PathBuf::from("/abs/x"));
    }

    #[test]
    fn test_parse_move_command() {
        let cli = Cli::try_parse_from(["ctxpack", "move", "a", "b", "--before", "c", "-s", "Docs"]).unwrap();
        assert_eq!(cli.session.as_deref(), Some("Docs"));
        match cli.command {
            Command::Move { items, before, to_root } => {
                assert_eq!(items, vec!["a", "b"]);
                assert_eq!(before.as_deref(), Some("c"));
                assert!(!to_root);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_before_conflicts_with_to_root() {
        assert!(Cli::try_parse_from(["ctxpack", "move", "a", "--before", "b", "--to-root"]).is_err());
    }
}
