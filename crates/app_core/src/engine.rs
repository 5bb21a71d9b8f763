//! Batch scheduler
//!
//! A batch is split into four lanes. Each lane gets its own dispatcher task
//! that waits on the pause gate and on a semaphore sized to the lane limit,
//! claims the next action and spawns one worker for it. The batch ends when
//! every lane is exhausted and every worker has exited.
//!
//! Cancelling is terminal: dispatchers stop claiming, running actions get a
//! grace period to stop at their next checkpoint and are then aborted.

use crate::action::{Action, ActionOutcome, ExecContext, ItemList};
use crate::classifier;
use crate::collector::{self, FinalizeReport};
use crate::config::{AppConfig, EngineConfig};
use crate::download::{DownloadSource, NoDownloads};
use crate::progress::{LaneSnapshot, ProgressReporter};
use crate::queue::{Lane, Lanes, LANE_COUNT};
use crate::stats::{NullStats, StatsSink};
use crate::EngineError;
use app_fs::{FileOperations, OpControl};
use app_log::THREADS_TARGET;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ============================================================================
// State & results
// ============================================================================

/// Observable state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    /// Every lane is exhausted, only running workers remain
    Draining,
    Completed,
    Cancelled,
    Aborted,
}

impl EngineState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Cancelled | EngineState::Aborted
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a batch that was not aborted ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchOutcome {
    Completed,
    Cancelled,
}

/// Totals for one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub total_actions: usize,
    /// Workers spawned
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Started but stopped by cancellation; still pending
    pub interrupted: usize,
    /// Already done before the run
    pub skipped: usize,
    /// Never claimed because the batch was cancelled
    pub not_started: usize,
    pub elapsed: Duration,
    pub lanes: Vec<LaneSnapshot>,
}

#[derive(Debug, Default)]
struct RunCounters {
    started: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl RunCounters {
    fn record(&self, outcome: ActionOutcome) {
        let counter = match outcome {
            ActionOutcome::Succeeded => &self.succeeded,
            ActionOutcome::Failed => &self.failed,
            ActionOutcome::Skipped => &self.skipped,
            ActionOutcome::Cancelled => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, outcome: BatchOutcome, lanes: &Lanes, elapsed: Duration) -> BatchReport {
        let total_actions = lanes.total_actions();
        let started = self.started.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);

        BatchReport {
            outcome,
            total_actions,
            started,
            succeeded,
            failed,
            interrupted: started.saturating_sub(succeeded + failed),
            skipped,
            not_started: total_actions.saturating_sub(started + skipped),
            elapsed,
            lanes: lanes.snapshots(),
        }
    }
}

// ============================================================================
// Shared state & handle
// ============================================================================

struct RunSlot {
    cancel: CancellationToken,
    reporter: Option<Arc<dyn ProgressReporter>>,
    lanes: Option<Arc<Lanes>>,
    /// Every classified action with its work weight
    work: Arc<Vec<(Arc<Action>, u64)>>,
}

struct Shared {
    state: watch::Sender<EngineState>,
    pause: watch::Sender<bool>,
    running: AtomicBool,
    /// Lane dispatchers still claiming work in the current run
    dispatching: AtomicUsize,
    run: Mutex<Option<RunSlot>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::channel(EngineState::Idle).0,
            pause: watch::channel(false).0,
            running: AtomicBool::new(false),
            dispatching: AtomicUsize::new(0),
            run: Mutex::new(None),
        }
    }

    fn reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        self.run.lock().as_ref().and_then(|slot| slot.reporter.clone())
    }

    /// Move to `to` if the current state satisfies `from`
    fn transition(&self, to: EngineState, from: impl Fn(EngineState) -> bool) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state != to && from(*state) {
                *state = to;
                true
            } else {
                false
            }
        });

        if changed {
            tracing::debug!(state = %to, "Engine state changed");
            if let Some(reporter) = self.reporter() {
                reporter.state_changed(to);
            }
        }
        changed
    }

    fn set_state(&self, to: EngineState) {
        self.transition(to, |_| true);
    }
}

/// Resets the running flag however `run` exits
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Cloneable control surface for a progress UI or a signal handler
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Hold dispatch and running actions at their next checkpoint
    pub fn pause(&self) {
        self.shared.pause.send_replace(true);
        if self.shared.transition(EngineState::Paused, |s| {
            matches!(s, EngineState::Running | EngineState::Draining)
        }) {
            tracing::info!("Batch paused");
        }
    }

    pub fn unpause(&self) {
        self.shared.pause.send_replace(false);
        let resumed = if self.shared.dispatching.load(Ordering::Acquire) > 0 {
            EngineState::Running
        } else {
            EngineState::Draining
        };
        if self.shared.transition(resumed, |s| s == EngineState::Paused) {
            tracing::info!("Batch resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.pause.borrow()
    }

    /// Cancel the running batch. Does nothing when no batch is running.
    pub fn cancel(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        if let Some(slot) = self.shared.run.lock().as_ref() {
            if !slot.cancel.is_cancelled() {
                tracing::info!("Cancelling batch");
                slot.cancel.cancel();
            }
        }
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.shared.state.subscribe()
    }

    /// Live lane counters of the current (or last) run
    pub fn lanes(&self) -> Vec<LaneSnapshot> {
        self.shared
            .run
            .lock()
            .as_ref()
            .and_then(|slot| slot.lanes.as_ref())
            .map(|lanes| lanes.snapshots())
            .unwrap_or_default()
    }

    /// Overall progress in percent, weighted by each action's size of work
    pub fn overall_percent(&self) -> f64 {
        let work = match self.shared.run.lock().as_ref() {
            Some(slot) if slot.lanes.is_some() => Arc::clone(&slot.work),
            _ => return 0.0,
        };

        let total: u64 = work.iter().map(|(_, weight)| weight).sum();
        if total == 0 {
            return 100.0;
        }
        let done: f64 = work
            .iter()
            .map(|(action, weight)| *weight as f64 * f64::from(action.percent_done()) / 100.0)
            .sum();
        done * 100.0 / total as f64
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs batches of actions across the four lanes
pub struct ActionEngine {
    config: EngineConfig,
    stats: Arc<dyn StatsSink>,
    downloads: Arc<dyn DownloadSource>,
    files: FileOperations,
    shared: Arc<Shared>,
}

impl ActionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let files = FileOperations::new(config.copy_chunk_size);
        Self {
            config,
            stats: Arc::new(NullStats),
            downloads: Arc::new(NoDownloads),
            files,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Engine with file handling taken from the filer settings
    pub fn from_config(config: &AppConfig) -> Self {
        let files = FileOperations::new(config.engine.copy_chunk_size)
            .with_trash(config.filer.use_recycle_bin)
            .with_create_missing_dirs(config.filer.create_missing_dirs);
        Self::new(config.engine.clone()).with_file_operations(files)
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_download_source(mut self, downloads: Arc<dyn DownloadSource>) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn with_file_operations(mut self, files: FileOperations) -> Self {
        self.files = files;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Execute every action in `items` and wait for the batch to end.
    ///
    /// Actions are marked in place; nothing is removed from `items`. A fault
    /// in the scheduler itself aborts the batch with
    /// [`EngineError::BatchAborted`]. Cancellation is not an error.
    pub async fn run(
        &self,
        items: &ItemList,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<BatchReport, EngineError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }
        let _running = RunningGuard(Arc::clone(&self.shared));

        let started_at = Instant::now();
        let cancel = CancellationToken::new();
        self.shared.pause.send_replace(false);
        *self.shared.run.lock() = Some(RunSlot {
            cancel: cancel.clone(),
            reporter: reporter.clone(),
            lanes: None,
            work: Arc::default(),
        });
        self.shared.set_state(EngineState::Running);

        // Classification stats the file system
        let batch = items.clone();
        let config = self.config.clone();
        let classified = tokio::task::spawn_blocking(move || {
            let lanes = classifier::classify(&batch, &config);
            let work: Vec<_> = lanes
                .iter()
                .flat_map(|queue| queue.actions().iter())
                .map(|action| (Arc::clone(action), action.size_of_work()))
                .collect();
            (lanes, work)
        })
        .await;

        let (lanes, work) = match classified {
            Ok(classified) => classified,
            Err(e) => return Err(self.abort(format!("classification failed: {}", e))),
        };
        let lanes = Arc::new(lanes);
        if let Some(slot) = self.shared.run.lock().as_mut() {
            slot.lanes = Some(Arc::clone(&lanes));
            slot.work = Arc::new(work);
        }
        if let Some(reporter) = &reporter {
            reporter.lanes_ready(&lanes.snapshots());
        }

        let scope = Arc::new(RunScope {
            lanes: Arc::clone(&lanes),
            ctx: ExecContext {
                control: OpControl::new(self.shared.pause.subscribe(), cancel.clone()),
                stats: Arc::clone(&self.stats),
                downloads: Arc::clone(&self.downloads),
                files: self.files.clone(),
            },
            cancel: cancel.clone(),
            grace: self.config.cancel_grace(),
            shared: Arc::clone(&self.shared),
            counters: RunCounters::default(),
            reporter: reporter.clone(),
        });

        self.shared.dispatching.store(LANE_COUNT, Ordering::Release);
        let mut dispatchers = JoinSet::new();
        for lane in Lane::ALL {
            dispatchers.spawn(dispatch_lane(Arc::clone(&scope), lane));
        }

        let mut fault = None;
        while let Some(joined) = dispatchers.join_next().await {
            let reason = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(EngineError::BatchAborted(reason))) => reason,
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    format!(
                        "lane dispatcher panicked: {}",
                        app_log::panic_message(payload.as_ref())
                    )
                }
                Err(e) => format!("lane dispatcher stopped: {}", e),
            };

            if fault.is_none() {
                tracing::error!("Fatal scheduler fault, aborting batch: {}", reason);
                cancel.cancel();
                // Dropping a dispatcher's worker set aborts its workers
                dispatchers.abort_all();
                fault = Some(reason);
            }
        }
        self.shared.dispatching.store(0, Ordering::Release);

        if let Some(reason) = fault {
            return Err(self.abort(reason));
        }
        if !cancel.is_cancelled() && !lanes.is_drained() {
            let stuck: Vec<_> = lanes
                .iter()
                .filter(|q| q.remaining() > 0 || q.in_flight() > 0)
                .map(|q| {
                    format!(
                        "{} ({} unclaimed, {} running)",
                        q.name(),
                        q.remaining(),
                        q.in_flight()
                    )
                })
                .collect();
            let reason = format!("lanes not drained after dispatch ended: {}", stuck.join(", "));
            tracing::error!("Fatal scheduler fault: {}", reason);
            return Err(self.abort(reason));
        }

        let outcome = if cancel.is_cancelled() {
            BatchOutcome::Cancelled
        } else {
            BatchOutcome::Completed
        };
        let report = scope.counters.report(outcome, &lanes, started_at.elapsed());
        self.shared.set_state(match outcome {
            BatchOutcome::Completed => EngineState::Completed,
            BatchOutcome::Cancelled => EngineState::Cancelled,
        });
        if let Some(reporter) = &reporter {
            reporter.batch_finished(&report);
        }
        Ok(report)
    }

    /// Run the batch, then drop every succeeded action from `items`.
    ///
    /// Failed and unfinished actions stay in the list, each failure logged.
    pub async fn do_actions(
        &self,
        items: &mut ItemList,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<(BatchReport, FinalizeReport), EngineError> {
        tracing::info!("**********************");
        tracing::info!("Doing Selected Actions....");

        let result = self.run(items, reporter).await;
        let finalized = collector::finalize(items);

        match &result {
            Ok(report) => tracing::info!(
                outcome = ?report.outcome,
                succeeded = report.succeeded,
                failed = report.failed,
                "Batch took {:.1}s",
                report.elapsed.as_secs_f64()
            ),
            Err(e) => tracing::error!("{}", e),
        }
        tracing::info!("Completed Selected Actions");
        tracing::info!("**********************");

        result.map(|report| (report, finalized))
    }

    fn abort(&self, reason: String) -> EngineError {
        self.shared.set_state(EngineState::Aborted);
        EngineError::BatchAborted(reason)
    }
}

// ============================================================================
// Dispatch & workers
// ============================================================================

/// Everything the dispatchers and workers of one run share
struct RunScope {
    lanes: Arc<Lanes>,
    ctx: ExecContext,
    cancel: CancellationToken,
    grace: Duration,
    shared: Arc<Shared>,
    counters: RunCounters,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl RunScope {
    fn dispatcher_finished(&self) {
        let remaining = self.shared.dispatching.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && !self.cancel.is_cancelled() {
            self.shared
                .transition(EngineState::Draining, |s| s == EngineState::Running);
        }
    }
}

async fn dispatch_lane(scope: Arc<RunScope>, lane: Lane) -> Result<(), EngineError> {
    let queue = scope.lanes.get(lane);
    let semaphore = Arc::new(Semaphore::new(queue.limit()));
    let mut workers = JoinSet::new();

    if !queue.is_empty() {
        tracing::info!(
            "Setting up '{}' worker, with {} tasks in position {}",
            queue.name(),
            queue.len(),
            lane.index()
        );
    }

    loop {
        if scope.ctx.control.checkpoint().await.is_err() {
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|_| {
                EngineError::BatchAborted(format!("'{}' lane semaphore closed", queue.name()))
            })?,
        };

        // A pause requested while waiting for the permit holds this claim too
        if scope.ctx.control.checkpoint().await.is_err() {
            break;
        }

        let Some((position, action)) = queue.claim() else {
            break;
        };

        if action.is_done() {
            scope.counters.record(ActionOutcome::Skipped);
            tracing::trace!(lane = queue.name(), position, "Skipping finished action: {}", action);
            continue;
        }

        tracing::trace!(
            target: THREADS_TARGET,
            lane = queue.name(),
            position,
            free_permits = semaphore.available_permits(),
            "Starting worker"
        );
        scope.counters.started.fetch_add(1, Ordering::Relaxed);

        let in_flight = scope.lanes.enter(lane);
        let span = tracing::info_span!("worker", lane = queue.name(), task = %action.progress_text());
        let worker_scope = Arc::clone(&scope);
        workers.spawn(
            async move {
                let _permit = permit;
                let _in_flight = in_flight;
                run_worker(&worker_scope, lane, &action).await;
            }
            .instrument(span),
        );

        while let Some(joined) = workers.try_join_next() {
            log_join(lane, joined);
        }
    }

    scope.dispatcher_finished();

    let interrupted = scope.cancel.is_cancelled()
        || tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => true,
            _ = drain(lane, &mut workers) => false,
        };

    if interrupted
        && !workers.is_empty()
        && tokio::time::timeout(scope.grace, drain(lane, &mut workers))
            .await
            .is_err()
    {
        tracing::warn!(
            lane = queue.name(),
            workers = workers.len(),
            "Workers still running after the cancel grace period, aborting them"
        );
        workers.abort_all();
        drain(lane, &mut workers).await;
    }

    tracing::trace!(target: THREADS_TARGET, lane = queue.name(), "Lane finished");
    Ok(())
}

async fn drain(lane: Lane, workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        log_join(lane, joined);
    }
}

fn log_join(lane: Lane, joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            tracing::debug!(target: THREADS_TARGET, lane = lane.name(), "Worker aborted");
        }
        // Panics are caught inside the worker; anything here escaped that
        Err(e) => tracing::error!(lane = lane.name(), "Worker ended abnormally: {}", e),
    }
}

async fn run_worker(scope: &RunScope, lane: Lane, action: &Arc<Action>) {
    let body = async {
        if let Some(reporter) = &scope.reporter {
            reporter.action_started(lane.name(), action);
        }

        let outcome = action.execute(&scope.ctx).await;
        scope.counters.record(outcome);

        if let Some(reporter) = &scope.reporter {
            reporter.action_finished(lane.name(), action, outcome);
        }
    };

    // Anything escaping the worker, reporter callbacks included, fails the action
    if let Err(payload) = AssertUnwindSafe(body).catch_unwind().await {
        let message = app_log::panic_message(payload.as_ref()).to_string();
        tracing::error!(action = %action.id(), "Worker crashed on '{}': {}", action, message);
        if action.is_pending() {
            action.mark_failed(format!("Worker crashed: {}", message));
            scope.counters.record(ActionOutcome::Failed);
        }
    }
}
