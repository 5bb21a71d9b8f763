//! Lane classifier
//!
//! Splits a flat batch into the four lanes. Each lane is processed in
//! order, but all lanes run in parallel:
//! - Move/Copy: copies and cross-filesystem moves
//! - Move/Delete: renames, same-volume moves, deletions
//! - Write Metadata: sidecar files and date touches
//! - Download: images, RSS payloads, download-client checks
//!
//! Placeholders are skipped; there is nothing to execute for them.

use crate::action::{Action, ActionKind, Item};
use crate::config::EngineConfig;
use crate::queue::{ActionQueue, Lane, Lanes};
use std::path::Path;

/// Lane an action belongs in
pub fn lane_for(action: &Action) -> Lane {
    match action.kind() {
        ActionKind::WriteMetadata { .. } | ActionKind::TouchDates { .. } => Lane::WriteMetadata,
        ActionKind::DownloadImage { .. }
        | ActionKind::DownloadRss { .. }
        | ActionKind::ExternalDownloadProbe { .. } => Lane::Download,
        ActionKind::Rename { .. } => Lane::MoveDelete,
        ActionKind::Move { from, to } if is_quick_move(from, to) => Lane::MoveDelete,
        ActionKind::Move { .. } | ActionKind::Copy { .. } => Lane::MoveCopy,
        ActionKind::DeleteFile { .. } | ActionKind::DeleteDirectory { .. } => Lane::MoveDelete,
    }
}

fn is_quick_move(from: &Path, to: &Path) -> bool {
    app_fs::same_volume(from, to)
}

/// Partition `items` into lanes, keeping input order within each lane
pub fn classify(items: &[Item], config: &EngineConfig) -> Lanes {
    let mut queues = Lane::ALL.map(|lane| ActionQueue::new(lane, config.lane_limit(lane)));
    let mut skipped = 0usize;

    for item in items {
        let Some(action) = item.as_action() else {
            skipped += 1;
            continue;
        };
        let lane = lane_for(action);
        tracing::trace!(lane = lane.name(), action = %action.id(), "Classified: {}", action);
        queues[lane.index()].push(action.clone());
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} non-action items", skipped);
    }

    Lanes::new(queues)
}
