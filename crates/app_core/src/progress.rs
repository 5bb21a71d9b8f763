//! Progress reporting interface
//!
//! A progress UI is optional. It sees the lanes when a batch starts, gets a
//! callback per action, and may pause, resume or cancel through an
//! [`EngineHandle`](crate::EngineHandle).

use crate::action::{Action, ActionOutcome};
use crate::engine::{BatchReport, EngineState};
use serde::Serialize;

/// Live view of one lane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    pub name: String,
    pub limit: usize,
    pub len: usize,
    pub cursor: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub finished: usize,
}

/// Receives coarse progress from the engine. Every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    fn lanes_ready(&self, _lanes: &[LaneSnapshot]) {}

    fn state_changed(&self, _state: EngineState) {}

    fn action_started(&self, _lane: &str, _action: &Action) {}

    fn action_finished(&self, _lane: &str, _action: &Action, _outcome: ActionOutcome) {}

    fn batch_finished(&self, _report: &BatchReport) {}
}

/// Writes progress to the log, for unattended runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReporter;

impl ProgressReporter for LoggingReporter {
    fn lanes_ready(&self, lanes: &[LaneSnapshot]) {
        for lane in lanes.iter().filter(|l| l.len > 0) {
            tracing::info!(lane = %lane.name, actions = lane.len, limit = lane.limit, "Lane queued");
        }
    }

    fn state_changed(&self, state: EngineState) {
        tracing::info!(%state, "Batch state changed");
    }

    fn action_finished(&self, lane: &str, action: &Action, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Succeeded => tracing::info!(lane, "Done: {}", action),
            ActionOutcome::Failed => tracing::warn!(
                lane,
                "Failed: {} ({})",
                action,
                action.error_text().unwrap_or_default()
            ),
            ActionOutcome::Cancelled => tracing::info!(lane, "Cancelled: {}", action),
            ActionOutcome::Skipped => {}
        }
    }

    fn batch_finished(&self, report: &BatchReport) {
        tracing::info!(
            outcome = ?report.outcome,
            succeeded = report.succeeded,
            failed = report.failed,
            not_started = report.not_started,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
    }
}
