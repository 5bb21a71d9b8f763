// Integration tests for the batch scheduler

use app_core::{
    finalize, ActionEngine, ActionKind, ActionOutcome, BatchOutcome, DownloadError,
    DownloadSource, EngineConfig, EngineError, EngineState, Item, ItemList, Lane,
    LaneSnapshot, MetadataFormat, ProgressReporter,
};
use app_core::{Action, BatchReport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

/// Download source with scripted delays, failures and panics that records
/// how many fetches ran at once
#[derive(Default)]
struct ScriptedSource {
    delay: Duration,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    current: AtomicUsize,
    peak: AtomicUsize,
    fetches: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }
}

struct Active<'a>(&'a AtomicUsize);

impl<'a> Active<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Active(current)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DownloadSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        *self.fetches.lock().entry(url.to_string()).or_default() += 1;
        let _active = Active::enter(&self.current, &self.peak);

        tokio::time::sleep(self.delay).await;

        if self.panicking.contains(url) {
            panic!("scripted panic for {}", url);
        }
        if self.failing.contains(url) {
            return Err(DownloadError::Http(format!("404 Not Found: {}", url)));
        }
        Ok(url.as_bytes().to_vec())
    }

    async fn probe(&self, query: &str) -> Result<bool, DownloadError> {
        Ok(!self.failing.contains(query))
    }
}

#[derive(Default)]
struct RecordingReporter {
    lanes: Mutex<Vec<LaneSnapshot>>,
    states: Mutex<Vec<EngineState>>,
    started: AtomicUsize,
    finished: AtomicUsize,
    batches: AtomicUsize,
}

impl ProgressReporter for RecordingReporter {
    fn lanes_ready(&self, lanes: &[LaneSnapshot]) {
        *self.lanes.lock() = lanes.to_vec();
    }

    fn state_changed(&self, state: EngineState) {
        self.states.lock().push(state);
    }

    fn action_started(&self, _lane: &str, _action: &Action) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn action_finished(&self, _lane: &str, _action: &Action, _outcome: ActionOutcome) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_finished(&self, _report: &BatchReport) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }
}

fn url(n: usize) -> String {
    format!("http://images.example/{}.jpg", n)
}

fn downloads(dir: &TempDir, n: usize) -> ItemList {
    (0..n)
        .map(|i| {
            Item::action(ActionKind::DownloadImage {
                url: url(i),
                destination: dir.path().join(format!("{}.jpg", i)),
            })
        })
        .collect()
}

fn engine_with(source: Arc<ScriptedSource>, parallel_downloads: usize) -> ActionEngine {
    let config = EngineConfig {
        parallel_downloads,
        cancel_grace_ms: 100,
        ..EngineConfig::default()
    };
    ActionEngine::new(config).with_download_source(source)
}

fn actions(items: &ItemList) -> impl Iterator<Item = &Arc<Action>> {
    items.iter().filter_map(Item::as_action)
}

async fn wait_for_state(engine: &ActionEngine, wanted: EngineState) {
    let mut states = engine.handle().subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .expect("engine dropped");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_lane_respects_limit() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(40)));
    let engine = engine_with(source.clone(), 4);
    let mut items = downloads(&dir, 10);

    let report = engine.run(&items, None).await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.succeeded, 10);
    assert!(source.peak() <= 4, "peak {} over the lane limit", source.peak());
    assert!(source.peak() > 1, "downloads never overlapped");

    let lane = &report.lanes[Lane::Download.index()];
    assert_eq!((lane.len, lane.cursor, lane.finished), (10, 10, 10));
    assert!(lane.peak_in_flight <= 4);

    for i in 0..10 {
        assert_eq!(source.fetch_count(&url(i)), 1);
        assert!(dir.path().join(format!("{}.jpg", i)).exists());
    }

    finalize(&mut items);
    assert!(items.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_action_per_lane() {
    let dir = TempDir::new().unwrap();
    let episode = dir.path().join("show.s01e01.mkv");
    let sample = dir.path().join("sample.mkv");
    std::fs::write(&episode, vec![1u8; 64 * 1024]).unwrap();
    std::fs::write(&sample, b"sample").unwrap();

    let copy_target = dir.path().join("library").join("Show - S01E01.mkv");
    let rename_target = dir.path().join("Sample.mkv");
    let nfo = dir.path().join("Show - S01E01.nfo");
    let poster = dir.path().join("poster.jpg");

    let mut items: ItemList = vec![
        Item::action(ActionKind::Copy {
            from: episode.clone(),
            to: copy_target.clone(),
        }),
        Item::action(ActionKind::Rename {
            from: sample.clone(),
            to: rename_target.clone(),
        }),
        Item::action(ActionKind::WriteMetadata {
            target: nfo.clone(),
            format: MetadataFormat::KodiNfo,
            body: "<episodedetails><title>Pilot</title></episodedetails>".into(),
        }),
        Item::action(ActionKind::DownloadImage {
            url: url(1),
            destination: poster.clone(),
        }),
    ];

    let source = Arc::new(ScriptedSource::default());
    let reporter = Arc::new(RecordingReporter::default());
    let engine = engine_with(source, 4);
    let report = engine.run(&items, Some(reporter.clone())).await.unwrap();

    assert_eq!(report.succeeded, 4);
    let lanes = reporter.lanes.lock().clone();
    assert_eq!(lanes.len(), 4);
    assert!(lanes.iter().all(|lane| lane.len == 1));
    assert_eq!(reporter.started.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.batches.load(Ordering::SeqCst), 1);
    assert_eq!(reporter.states.lock().first(), Some(&EngineState::Running));
    assert_eq!(reporter.states.lock().last(), Some(&EngineState::Completed));

    assert_eq!(std::fs::read(&copy_target).unwrap().len(), 64 * 1024);
    assert!(episode.exists());
    assert!(rename_target.exists() && !sample.exists());
    assert!(std::fs::read_to_string(&nfo).unwrap().contains("Pilot"));
    assert_eq!(std::fs::read(&poster).unwrap(), url(1).into_bytes());

    finalize(&mut items);
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_copy_with_missing_source_is_kept() {
    let dir = TempDir::new().unwrap();
    let mut items: ItemList = vec![Item::action(ActionKind::Copy {
        from: dir.path().join("gone.mkv"),
        to: dir.path().join("out.mkv"),
    })];

    let engine = ActionEngine::new(EngineConfig::default());
    let report = engine.run(&items, None).await.unwrap();
    assert_eq!(report.failed, 1);

    let action = items[0].as_action().unwrap();
    assert!(action.is_done());
    assert!(action.is_error());
    assert!(action.error_text().unwrap().to_lowercase().contains("not found"));

    let finalized = finalize(&mut items);
    assert_eq!((finalized.removed, finalized.failed), (0, 1));
    assert_eq!(items.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_are_retained_with_text() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::with_delay(Duration::from_millis(5))
        .failing(&url(1))
        .failing(&url(4))
        .failing("Show S02E03");
    let engine = engine_with(Arc::new(source), 3);

    let mut items = downloads(&dir, 6);
    items.push(Item::action(ActionKind::ExternalDownloadProbe {
        query: "Show S02E03".into(),
    }));
    items.push(Item::action(ActionKind::ExternalDownloadProbe {
        query: "Show S02E04".into(),
    }));

    let report = engine.run(&items, None).await.unwrap();
    assert_eq!((report.succeeded, report.failed), (5, 3));

    let first = finalize(&mut items);
    assert_eq!(first.removed, 5);
    assert_eq!(items.len(), 3);
    for action in actions(&items) {
        assert!(action.is_error());
        assert!(!action.error_text().unwrap().trim().is_empty());
    }

    let second = finalize(&mut items);
    assert_eq!(second.removed, 0);
    assert_eq!(items.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_and_resume_lose_nothing() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(30)));
    let engine = Arc::new(engine_with(source.clone(), 2));
    let handle = engine.handle();
    let items = downloads(&dir, 12);

    let batch = items.clone();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&batch, None).await })
    };

    wait_for_state(&engine, EngineState::Running).await;
    tokio::time::sleep(Duration::from_millis(45)).await;
    handle.pause();
    assert!(handle.is_paused());
    assert_eq!(handle.state(), EngineState::Paused);

    // In-flight fetches finish, nothing new starts
    tokio::time::sleep(Duration::from_millis(100)).await;
    let while_paused = source.total_fetches();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.total_fetches(), while_paused);
    assert!(while_paused < 12);

    handle.unpause();
    let report = runner.await.unwrap().unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.succeeded, 12);
    for i in 0..12 {
        assert_eq!(source.fetch_count(&url(i)), 1, "url {} fetched more than once", i);
    }
    assert!(actions(&items).all(|a| a.is_succeeded()));
    assert_eq!(handle.state(), EngineState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_leaves_actions_pending() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(300)));
    let engine = Arc::new(engine_with(source.clone(), 2));
    let handle = engine.handle();
    let mut items = downloads(&dir, 10);

    let batch = items.clone();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&batch, None).await })
    };

    wait_for_state(&engine, EngineState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("cancelled batch did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome, BatchOutcome::Cancelled);
    assert_eq!(report.failed, 0);
    assert!(report.not_started > 0);
    assert_eq!(report.interrupted + report.not_started, 10 - report.succeeded);
    assert_eq!(handle.state(), EngineState::Cancelled);
    assert!(actions(&items).all(|a| !a.is_error()));

    let finalized = finalize(&mut items);
    assert_eq!(finalized.failed, 0);
    assert_eq!(finalized.pending, items.len());
    assert!(!items.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_while_paused() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(20)));
    let engine = Arc::new(engine_with(source, 1));
    let handle = engine.handle();
    let items = downloads(&dir, 20);

    let batch = items.clone();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&batch, None).await })
    };

    wait_for_state(&engine, EngineState::Running).await;
    handle.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("paused batch ignored cancel")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, BatchOutcome::Cancelled);
    assert!(report.succeeded < 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_panic_becomes_failure() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default().panicking(&url(2));
    let engine = engine_with(Arc::new(source), 4);
    let mut items = downloads(&dir, 5);

    let report = engine.run(&items, None).await.unwrap();
    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!((report.succeeded, report.failed), (4, 1));

    let crashed = items[2].as_action().unwrap();
    assert!(crashed.is_error());
    let text = crashed.error_text().unwrap();
    assert!(text.starts_with("Worker crashed"), "{}", text);
    assert!(text.contains("scripted panic"));

    finalize(&mut items);
    assert_eq!(items.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_run_is_refused() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(100)));
    let engine = Arc::new(engine_with(source, 1));
    let items = downloads(&dir, 3);

    let batch = items.clone();
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&batch, None).await })
    };
    wait_for_state(&engine, EngineState::Running).await;

    let second = engine.run(&items, None).await;
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.succeeded, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_do_actions_finalizes() {
    let dir = TempDir::new().unwrap();
    let source = ScriptedSource::default().failing(&url(0));
    let engine = engine_with(Arc::new(source), 4);
    let mut items = downloads(&dir, 4);
    items.push(Item::action(ActionKind::DeleteFile {
        path: dir.path().join("never-existed.mkv"),
    }));

    let (report, finalized) = engine.do_actions(&mut items, None).await.unwrap();
    assert_eq!(report.total_actions, 5);
    assert_eq!(finalized.removed, 3);
    assert_eq!(finalized.failed, 2);
    assert_eq!(items.len(), 2);
}

/// Reporter whose state view breaks once the lanes run dry
struct BreaksOnDrain;

impl ProgressReporter for BreaksOnDrain {
    fn state_changed(&self, state: EngineState) {
        if state == EngineState::Draining {
            panic!("lane view crashed");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatcher_fault_aborts_batch() {
    let dir = TempDir::new().unwrap();
    let mut items = downloads(&dir, 3);
    items.push(Item::action(ActionKind::WriteMetadata {
        target: dir.path().join("tvshow.nfo"),
        format: MetadataFormat::KodiNfo,
        body: "<tvshow/>".to_string(),
    }));

    // The metadata action succeeds in an earlier batch
    let earlier: ItemList = items[3..].to_vec();
    let report = ActionEngine::new(EngineConfig::default())
        .run(&earlier, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(300)));
    let engine = engine_with(source, 4);
    let handle = engine.handle();

    let result = engine
        .do_actions(&mut items, Some(Arc::new(BreaksOnDrain)))
        .await;

    match result {
        Err(EngineError::BatchAborted(reason)) => {
            assert!(reason.contains("lane view crashed"), "reason: {}", reason);
        }
        other => panic!(
            "expected an aborted batch, got {:?}",
            other.map(|(report, _)| report.outcome)
        ),
    }
    assert_eq!(handle.state(), EngineState::Aborted);

    // Finalize still ran: the earlier success is gone, the aborted downloads stay
    assert_eq!(items.len(), 3);
    assert!(actions(&items).all(|action| action.is_pending()));
    assert!(!dir.path().join("0.jpg").exists());

    // The engine accepts a new batch afterwards
    let report = engine.run(&items, None).await.unwrap();
    assert_eq!(report.succeeded, 3);
}
