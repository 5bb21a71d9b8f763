//! Post-run cleanup of the caller's batch

use crate::action::{Item, ItemList};
use serde::Serialize;

/// What [`finalize`] did to a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    /// Succeeded actions dropped from the list
    pub removed: usize,
    /// Failed actions kept in the list
    pub failed: usize,
    /// Actions kept because they never finished
    pub pending: usize,
}

/// Remove every succeeded action from `items`, keeping failures, unfinished
/// actions and placeholders. Each kept failure is logged.
///
/// Must only run once every worker of the batch has exited. Running it again
/// on the same list removes nothing.
pub fn finalize(items: &mut ItemList) -> FinalizeReport {
    let before = items.len();
    items.retain(|item| !item.as_action().is_some_and(|action| action.is_succeeded()));

    let mut report = FinalizeReport {
        removed: before - items.len(),
        ..FinalizeReport::default()
    };

    for action in items.iter().filter_map(Item::as_action) {
        if let Some(text) = action.error_text() {
            report.failed += 1;
            tracing::warn!(
                action = %action.id(),
                "Failed to complete the following action: {}, doing {}. Error was {}",
                action.name(),
                action,
                text
            );
        } else if action.is_pending() {
            report.pending += 1;
        }
    }

    if report.removed > 0 || report.failed > 0 || report.pending > 0 {
        tracing::debug!(
            removed = report.removed,
            failed = report.failed,
            pending = report.pending,
            "Batch finalized"
        );
    }
    report
}
