//! MediaLibrarian Core
//!
//! This crate contains:
//! - Batch items and actions
//! - Lane classification and queues
//! - The batch scheduler (pause, resume, cancel)
//! - Post-run cleanup and per-category summaries
//! - Configuration
//! - Error types, statistics and progress interfaces

pub mod action;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod progress;
pub mod queue;
pub mod stats;
pub mod summary;

pub use action::{
    Action, ActionKind, ActionOutcome, ActionStatus, EpisodeRef, ExecContext, Item, ItemList,
    MetadataFormat, MissingItem,
};
pub use classifier::{classify, lane_for};
pub use collector::{finalize, FinalizeReport};
pub use config::{AppConfig, EngineConfig, FilerConfig, LoggingConfig};
pub use download::{DownloadError, DownloadSource, NoDownloads};
pub use engine::{ActionEngine, BatchOutcome, BatchReport, EngineHandle, EngineState};
pub use error::{ActionError, EngineError};
pub use progress::{LaneSnapshot, LoggingReporter, ProgressReporter};
pub use queue::{ActionQueue, Lane, Lanes};
pub use stats::{AtomicStats, NullStats, Stat, StatsSink, StatsSnapshot};
pub use summary::{summarize, ActionCategory, ActionSummary, CategoryTotals};
