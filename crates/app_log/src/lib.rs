//! MediaLibrarian Logging & Observability Module
//!
//! Provides structured logging, panic handling, crash reports, and deadlock detection.

mod panic_hook;
mod logging;

pub use panic_hook::{init_panic_hook, panic_message};
pub use logging::{init_logging, cleanup_old_logs, cleanup_logs_in, LogGuard};

use std::path::PathBuf;
use directories::ProjectDirs;

/// Tracing target used for per-lane worker and permit traffic
pub const THREADS_TARGET: &str = "threads";

/// Get the application log directory
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "MediaLibrarian", "MediaLibrarian")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Initialize all observability features.
///
/// The returned guard flushes the file log when dropped; keep it alive for
/// the lifetime of the process.
pub fn init() -> anyhow::Result<LogGuard> {
    let guard = init_logging()?;
    init_panic_hook();

    #[cfg(debug_assertions)]
    init_deadlock_detector();

    Ok(guard)
}

/// Report parking_lot deadlocks among lane workers. Returns how many
/// deadlock cycles were found.
pub fn report_deadlocks() -> usize {
    let cycles = parking_lot::deadlock::check_deadlock();
    for (cycle, threads) in cycles.iter().enumerate() {
        tracing::error!(target: THREADS_TARGET, cycle, threads = threads.len(), "Deadlock detected");
        for t in threads {
            tracing::error!(
                target: THREADS_TARGET,
                cycle,
                thread_id = ?t.thread_id(),
                "Deadlocked thread backtrace:\n{:?}",
                t.backtrace()
            );
        }
    }
    cycles.len()
}

#[cfg(debug_assertions)]
fn init_deadlock_detector() {
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(10);

    let spawned = std::thread::Builder::new()
        .name("deadlock-detector".into())
        .spawn(|| loop {
            std::thread::sleep(INTERVAL);
            report_deadlocks();
        });

    if let Err(e) = spawned {
        tracing::warn!("Failed to start deadlock detector: {}", e);
    }
}
