//! Batch statistics sink

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter categories an action can increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stat {
    FilesCopied,
    FilesMoved,
    FilesRenamed,
    FilesDeleted,
    DirectoriesDeleted,
    BytesCopied,
    MetadataFilesWritten,
    DatesTouched,
    Downloads,
    BytesDownloaded,
    DownloadProbes,
}

const STAT_COUNT: usize = 11;

impl Stat {
    pub const ALL: [Stat; STAT_COUNT] = [
        Stat::FilesCopied,
        Stat::FilesMoved,
        Stat::FilesRenamed,
        Stat::FilesDeleted,
        Stat::DirectoriesDeleted,
        Stat::BytesCopied,
        Stat::MetadataFilesWritten,
        Stat::DatesTouched,
        Stat::Downloads,
        Stat::BytesDownloaded,
        Stat::DownloadProbes,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Stat::FilesCopied => "files_copied",
            Stat::FilesMoved => "files_moved",
            Stat::FilesRenamed => "files_renamed",
            Stat::FilesDeleted => "files_deleted",
            Stat::DirectoriesDeleted => "directories_deleted",
            Stat::BytesCopied => "bytes_copied",
            Stat::MetadataFilesWritten => "metadata_files_written",
            Stat::DatesTouched => "dates_touched",
            Stat::Downloads => "downloads",
            Stat::BytesDownloaded => "bytes_downloaded",
            Stat::DownloadProbes => "download_probes",
        }
    }
}

/// Receives counter increments from concurrently running actions.
/// The engine never reads it back.
pub trait StatsSink: Send + Sync {
    fn record(&self, stat: Stat, amount: u64);
}

/// Lock-free counters, one per [`Stat`]
#[derive(Debug, Default)]
pub struct AtomicStats {
    counters: [AtomicU64; STAT_COUNT],
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counters[stat.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values: Stat::ALL.map(|stat| (stat, self.get(stat))),
        }
    }
}

impl StatsSink for AtomicStats {
    fn record(&self, stat: Stat, amount: u64) {
        self.counters[stat.index()].fetch_add(amount, Ordering::Relaxed);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn record(&self, _stat: Stat, _amount: u64) {}
}

/// Point-in-time copy of [`AtomicStats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    values: [(Stat, u64); STAT_COUNT],
}

impl StatsSnapshot {
    pub fn get(&self, stat: Stat) -> u64 {
        self.values[stat.index()].1
    }

    /// Non-zero counters only
    pub fn non_zero(&self) -> impl Iterator<Item = (Stat, u64)> + '_ {
        self.values.iter().copied().filter(|(_, v)| *v > 0)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (stat, value) in self.non_zero() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", stat.label(), value)?;
            first = false;
        }
        if first {
            f.write_str("nothing recorded")?;
        }
        Ok(())
    }
}
