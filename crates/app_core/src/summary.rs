//! Per-category totals of a batch, shown before it is run

use crate::action::{ActionKind, Item};
use serde::Serialize;
use std::fmt;

const CATEGORY_COUNT: usize = 10;

/// Display grouping of batch items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ActionCategory {
    Missing,
    Rename,
    Copy,
    Move,
    Remove,
    DownloadRss,
    Download,
    MediaCenterMetadata,
    FileMetadata,
    DownloadClient,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; CATEGORY_COUNT] = [
        ActionCategory::Missing,
        ActionCategory::Rename,
        ActionCategory::Copy,
        ActionCategory::Move,
        ActionCategory::Remove,
        ActionCategory::DownloadRss,
        ActionCategory::Download,
        ActionCategory::MediaCenterMetadata,
        ActionCategory::FileMetadata,
        ActionCategory::DownloadClient,
    ];

    pub fn of(item: &Item) -> Self {
        let Some(action) = item.as_action() else {
            return ActionCategory::Missing;
        };
        match action.kind() {
            ActionKind::Rename { .. } => ActionCategory::Rename,
            ActionKind::Copy { .. } => ActionCategory::Copy,
            ActionKind::Move { .. } => ActionCategory::Move,
            ActionKind::DeleteFile { .. } | ActionKind::DeleteDirectory { .. } => {
                ActionCategory::Remove
            }
            ActionKind::DownloadRss { .. } => ActionCategory::DownloadRss,
            ActionKind::DownloadImage { .. } => ActionCategory::Download,
            ActionKind::WriteMetadata { .. } => ActionCategory::MediaCenterMetadata,
            ActionKind::TouchDates { .. } => ActionCategory::FileMetadata,
            ActionKind::ExternalDownloadProbe { .. } => ActionCategory::DownloadClient,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionCategory::Missing => "Missing",
            ActionCategory::Rename => "Rename",
            ActionCategory::Copy => "Copy",
            ActionCategory::Move => "Move",
            ActionCategory::Remove => "Remove",
            ActionCategory::DownloadRss => "Download RSS",
            ActionCategory::Download => "Download",
            ActionCategory::MediaCenterMetadata => "Media Center Metadata",
            ActionCategory::FileMetadata => "Update File/Directory Metadata",
            ActionCategory::DownloadClient => "Downloading",
        }
    }

    /// Categories whose header shows the data volume
    pub fn has_size(self) -> bool {
        matches!(self, ActionCategory::Copy | ActionCategory::Move)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTotals {
    pub count: usize,
    /// Bytes of the sources that exist; only tracked for copies and moves
    pub bytes: u64,
}

/// Totals for every category, in display order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    totals: [CategoryTotals; CATEGORY_COUNT],
}

impl ActionSummary {
    pub fn get(&self, category: ActionCategory) -> CategoryTotals {
        self.totals[category.index()]
    }

    pub fn total_items(&self) -> usize {
        self.totals.iter().map(|t| t.count).sum()
    }

    /// Group header such as `Copy (2 items, 1.5 GB)`
    pub fn header(&self, category: ActionCategory) -> String {
        let totals = self.get(category);
        let items = format!(
            "{} {}",
            totals.count,
            if totals.count == 1 { "item" } else { "items" }
        );
        if category.has_size() {
            format!("{} ({}, {})", category.label(), items, format_size(totals.bytes))
        } else {
            format!("{} ({})", category.label(), items)
        }
    }

    /// Non-empty categories with their totals
    pub fn iter(&self) -> impl Iterator<Item = (ActionCategory, CategoryTotals)> + '_ {
        ActionCategory::ALL
            .into_iter()
            .map(|c| (c, self.get(c)))
            .filter(|(_, t)| t.count > 0)
    }
}

impl fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (category, _) in self.iter() {
            writeln!(f, "{}", self.header(category))?;
        }
        Ok(())
    }
}

/// Count items per category. Reads source sizes from the file system.
pub fn summarize(items: &[Item]) -> ActionSummary {
    let mut summary = ActionSummary::default();
    for item in items {
        let category = ActionCategory::of(item);
        let totals = &mut summary.totals[category.index()];
        totals.count += 1;

        if category.has_size() {
            if let Some(source) = item.as_action().and_then(|a| a.kind().source()) {
                totals.bytes += std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    summary
}

/// Human-readable size with one decimal, in MB below a gigabyte
pub fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else {
        format!("{:.1} MB", bytes / MB)
    }
}
