//! Batch items and the actions they carry

use crate::download::DownloadSource;
use crate::error::ActionError;
use crate::stats::{Stat, StatsSink};
use app_fs::{FileOperations, MoveMethod, OpControl};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// The caller-owned batch
pub type ItemList = Vec<Item>;

/// Opaque reference to the episode or show an action belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeRef(pub String);

impl fmt::Display for EpisodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry in a batch
#[derive(Debug, Clone)]
pub enum Item {
    Action(Arc<Action>),
    /// Planning placeholder for an episode that could not be found. Carries no work.
    Missing(MissingItem),
}

impl Item {
    pub fn action(kind: ActionKind) -> Self {
        Item::Action(Arc::new(Action::new(kind)))
    }

    pub fn as_action(&self) -> Option<&Arc<Action>> {
        match self {
            Item::Action(action) => Some(action),
            Item::Missing(_) => None,
        }
    }
}

impl From<Action> for Item {
    fn from(action: Action) -> Self {
        Item::Action(Arc::new(action))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingItem {
    pub episode: EpisodeRef,
    pub expected_path: PathBuf,
}

/// Sidecar metadata flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFormat {
    KodiNfo,
    PyTivoMeta,
    Mede8erXml,
}

impl MetadataFormat {
    pub fn label(self) -> &'static str {
        match self {
            MetadataFormat::KodiNfo => "Kodi NFO",
            MetadataFormat::PyTivoMeta => "pyTivo Meta",
            MetadataFormat::Mede8erXml => "Mede8er XML",
        }
    }
}

/// What an action does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ActionKind {
    Copy { from: PathBuf, to: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    DeleteFile { path: PathBuf },
    DeleteDirectory { path: PathBuf },
    WriteMetadata { target: PathBuf, format: MetadataFormat, body: String },
    TouchDates { target: PathBuf, modified: DateTime<Utc> },
    DownloadImage { url: String, destination: PathBuf },
    DownloadRss { url: String, destination: PathBuf, title: String },
    ExternalDownloadProbe { query: String },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Copy { .. } => "Copy",
            ActionKind::Move { .. } => "Move",
            ActionKind::Rename { .. } => "Rename",
            ActionKind::DeleteFile { .. } => "Delete File",
            ActionKind::DeleteDirectory { .. } => "Delete Directory",
            ActionKind::WriteMetadata { .. } => "Write Metadata",
            ActionKind::TouchDates { .. } => "Update Dates",
            ActionKind::DownloadImage { .. } => "Download Image",
            ActionKind::DownloadRss { .. } => "Download RSS",
            ActionKind::ExternalDownloadProbe { .. } => "Check Download Client",
        }
    }

    pub fn source(&self) -> Option<&Path> {
        match self {
            ActionKind::Copy { from, .. }
            | ActionKind::Move { from, .. }
            | ActionKind::Rename { from, .. } => Some(from),
            ActionKind::DeleteFile { path } | ActionKind::DeleteDirectory { path } => Some(path),
            _ => None,
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        match self {
            ActionKind::Copy { to, .. }
            | ActionKind::Move { to, .. }
            | ActionKind::Rename { to, .. } => Some(to),
            ActionKind::WriteMetadata { target, .. } | ActionKind::TouchDates { target, .. } => {
                Some(target)
            }
            ActionKind::DownloadImage { destination, .. }
            | ActionKind::DownloadRss { destination, .. } => Some(destination),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Copy { from, to }
            | ActionKind::Move { from, to }
            | ActionKind::Rename { from, to } => {
                write!(f, "{} {} -> {}", self.name(), from.display(), to.display())
            }
            ActionKind::DeleteFile { path } | ActionKind::DeleteDirectory { path } => {
                write!(f, "{} {}", self.name(), path.display())
            }
            ActionKind::WriteMetadata { target, format, .. } => {
                write!(f, "Write {} {}", format.label(), target.display())
            }
            ActionKind::TouchDates { target, modified } => {
                write!(f, "Set date of {} to {}", target.display(), modified.to_rfc3339())
            }
            ActionKind::DownloadImage { url, destination } => {
                write!(f, "Download {} -> {}", url, destination.display())
            }
            ActionKind::DownloadRss { title, destination, .. } => {
                write!(f, "Download RSS '{}' -> {}", title, destination.display())
            }
            ActionKind::ExternalDownloadProbe { query } => {
                write!(f, "Check download client for '{}'", query)
            }
        }
    }
}

/// Lifecycle of an action within one batch run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ActionStatus {
    #[default]
    Pending,
    Succeeded,
    Failed(String),
}

/// Result of one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// Stopped by cancellation; the action is still pending
    Cancelled,
    /// Already done before this call; nothing was executed
    Skipped,
}

/// Everything an action needs from its surroundings while executing
#[derive(Clone)]
pub struct ExecContext {
    pub control: OpControl,
    pub stats: Arc<dyn StatsSink>,
    pub downloads: Arc<dyn DownloadSource>,
    pub files: FileOperations,
}

/// A single unit of work in a batch
#[derive(Debug)]
pub struct Action {
    id: Uuid,
    kind: ActionKind,
    episode: Option<EpisodeRef>,
    status: Mutex<ActionStatus>,
    percent: AtomicU8,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            episode: None,
            status: Mutex::new(ActionStatus::Pending),
            percent: AtomicU8::new(0),
        }
    }

    pub fn for_episode(kind: ActionKind, episode: EpisodeRef) -> Self {
        Self {
            episode: Some(episode),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn episode(&self) -> Option<&EpisodeRef> {
        self.episode.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn status(&self) -> ActionStatus {
        self.status.lock().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.status.lock(), ActionStatus::Pending)
    }

    /// Finished, successfully or not
    pub fn is_done(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(*self.status.lock(), ActionStatus::Succeeded)
    }

    pub fn is_error(&self) -> bool {
        matches!(*self.status.lock(), ActionStatus::Failed(_))
    }

    pub fn error_text(&self) -> Option<String> {
        match &*self.status.lock() {
            ActionStatus::Failed(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// The path or name this action creates
    pub fn produces(&self) -> String {
        match &self.kind {
            ActionKind::ExternalDownloadProbe { query } => query.clone(),
            kind => kind
                .destination()
                .or_else(|| kind.source())
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Short label for progress displays and worker names
    pub fn progress_text(&self) -> String {
        let path = self.kind.destination().or_else(|| self.kind.source());
        match path.and_then(Path::file_name) {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.produces(),
        }
    }

    /// Relative cost used to weight overall progress. Touches the file system.
    pub fn size_of_work(&self) -> u64 {
        let file_len = |p: &Path| std::fs::metadata(p).map(|m| m.len().max(1)).unwrap_or(1);
        match &self.kind {
            ActionKind::Copy { from, .. } => file_len(from),
            ActionKind::Move { from, to } if !app_fs::same_volume(from, to) => file_len(from),
            _ => 1,
        }
    }

    pub fn percent_done(&self) -> u8 {
        if self.is_done() {
            100
        } else {
            self.percent.load(Ordering::Relaxed)
        }
    }

    pub(crate) fn mark_succeeded(&self) {
        *self.status.lock() = ActionStatus::Succeeded;
        self.percent.store(100, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self, text: impl Into<String>) {
        let mut text = text.into();
        if text.trim().is_empty() {
            text = String::from("Unknown error");
        }
        *self.status.lock() = ActionStatus::Failed(text);
    }

    fn report_bytes(&self, done: u64, total: u64) {
        let pct = if total == 0 { 100 } else { (done.min(total) * 100 / total) as u8 };
        self.percent.store(pct, Ordering::Relaxed);
    }

    /// Execute the action once.
    ///
    /// Ordinary failures are recorded on the action and reported as
    /// [`ActionOutcome::Failed`]. A done action is never executed again.
    pub async fn execute(&self, ctx: &ExecContext) -> ActionOutcome {
        if self.is_done() {
            return ActionOutcome::Skipped;
        }

        match self.run(ctx).await {
            Ok(()) => {
                self.mark_succeeded();
                ActionOutcome::Succeeded
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(action = %self.id, "Cancelled: {}", self.kind);
                ActionOutcome::Cancelled
            }
            Err(e) => {
                tracing::debug!(action = %self.id, "Failed: {}: {}", self.kind, e);
                self.mark_failed(e.to_string());
                ActionOutcome::Failed
            }
        }
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        ctx.control.checkpoint().await?;
        let stats = ctx.stats.as_ref();
        let mut on_progress = |done: u64, total: u64| self.report_bytes(done, total);

        match &self.kind {
            ActionKind::Copy { from, to } => {
                let bytes = ctx.files.copy_file(from, to, &ctx.control, &mut on_progress).await?;
                stats.record(Stat::FilesCopied, 1);
                stats.record(Stat::BytesCopied, bytes);
            }
            ActionKind::Move { from, to } => {
                let method = ctx.files.move_file(from, to, &ctx.control, &mut on_progress).await?;
                if let MoveMethod::CopiedAndDeleted(bytes) = method {
                    stats.record(Stat::BytesCopied, bytes);
                }
                stats.record(Stat::FilesMoved, 1);
            }
            ActionKind::Rename { from, to } => {
                ctx.files.rename(from, to).await?;
                stats.record(Stat::FilesRenamed, 1);
            }
            ActionKind::DeleteFile { path } => {
                ctx.files.delete_file(path).await?;
                stats.record(Stat::FilesDeleted, 1);
            }
            ActionKind::DeleteDirectory { path } => {
                ctx.files.delete_dir(path).await?;
                stats.record(Stat::DirectoriesDeleted, 1);
            }
            ActionKind::WriteMetadata { target, body, .. } => {
                ctx.files.write_atomic(target, body.as_bytes()).await?;
                stats.record(Stat::MetadataFilesWritten, 1);
            }
            ActionKind::TouchDates { target, modified } => {
                ctx.files.touch_modified(target, SystemTime::from(*modified)).await?;
                stats.record(Stat::DatesTouched, 1);
            }
            ActionKind::DownloadImage { url, destination }
            | ActionKind::DownloadRss { url, destination, .. } => {
                let body = tokio::select! {
                    _ = ctx.control.cancelled() => return Err(ActionError::Cancelled),
                    body = ctx.downloads.fetch(url) => body?,
                };
                self.report_bytes(1, 2);
                ctx.control.checkpoint().await?;
                ctx.files.write_atomic(destination, &body).await?;
                stats.record(Stat::Downloads, 1);
                stats.record(Stat::BytesDownloaded, body.len() as u64);
            }
            ActionKind::ExternalDownloadProbe { query } => {
                let tracked = tokio::select! {
                    _ = ctx.control.cancelled() => return Err(ActionError::Cancelled),
                    tracked = ctx.downloads.probe(query) => tracked?,
                };
                stats.record(Stat::DownloadProbes, 1);
                if !tracked {
                    return Err(ActionError::NotTracked(query.clone()));
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}
