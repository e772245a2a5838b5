pub mod cancel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod output;
pub mod persist;
pub mod render;
pub mod session;
pub mod store;
pub mod summary;
pub mod vcs;

pub use cancel::CancellationToken;
pub use config::{ContextConfig, OutputFormat};
pub use entry::{EntryKind, ResourceEntry, ResourceId};
pub use error::{ContextError, Result};
pub use filter::{ExclusionMatcher, ExclusionRules, PatternMap};
pub use output::{CloseSubscription, FileSurface, OutputDocument, OutputSurface};
pub use persist::{PersistedState, StateFile};
pub use render::{ContentRenderer, ContentSource, FsContentSource, RenderOutput};
pub use session::{PublishOutcome, Session, SessionRegistry};
pub use store::{IngestPolicy, ResourceStore};
pub use summary::IngestSummary;
pub use vcs::{DiffAggregator, DiffReport, DiffScope, GitCli, Repository, VersionControl};
