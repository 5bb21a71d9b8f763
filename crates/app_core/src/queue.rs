//! Action queues (lanes)
//!
//! Each lane is an ordered list of actions with its own concurrency limit.
//! Actions are claimed front to back through an atomic cursor; the cursor
//! only moves forward and never passes the end of the list.

use crate::action::Action;
use crate::progress::LaneSnapshot;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const LANE_COUNT: usize = 4;

/// The four independently scheduled categories of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Cross-filesystem moves and all copies (slow)
    MoveCopy,
    /// Renames, same-volume moves and deletions (quick)
    MoveDelete,
    /// Metadata files and date touches
    WriteMetadata,
    /// Images, RSS payloads and download-client checks
    Download,
}

impl Lane {
    pub const ALL: [Lane; LANE_COUNT] = [
        Lane::MoveCopy,
        Lane::MoveDelete,
        Lane::WriteMetadata,
        Lane::Download,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Lane::MoveCopy => "Move/Copy",
            Lane::MoveDelete => "Move/Delete",
            Lane::WriteMetadata => "Write Metadata",
            Lane::Download => "Download",
        }
    }
}

/// One lane: ordered actions, a concurrency limit and live counters
#[derive(Debug)]
pub struct ActionQueue {
    lane: Lane,
    limit: usize,
    actions: Vec<Arc<Action>>,
    cursor: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    finished: AtomicUsize,
}

impl ActionQueue {
    pub fn new(lane: Lane, limit: usize) -> Self {
        Self {
            lane,
            limit: limit.max(1),
            actions: Vec::new(),
            cursor: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&mut self, action: Arc<Action>) {
        self.actions.push(action);
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn name(&self) -> &'static str {
        self.lane.name()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Arc<Action>] {
        &self.actions
    }

    /// Position of the next unclaimed action
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.cursor()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously running actions seen so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Workers that have exited
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Acquire)
    }

    /// Claim the next unclaimed action, advancing the cursor
    pub(crate) fn claim(&self) -> Option<(usize, Arc<Action>)> {
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            if current >= self.actions.len() {
                return None;
            }
            match self.cursor.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some((current, self.actions[current].clone())),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            name: self.name().to_string(),
            limit: self.limit,
            len: self.len(),
            cursor: self.cursor(),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            finished: self.finished(),
        }
    }
}

/// The full set of lanes for one batch, indexed by [`Lane`]
#[derive(Debug)]
pub struct Lanes {
    queues: [ActionQueue; LANE_COUNT],
}

impl Lanes {
    pub(crate) fn new(queues: [ActionQueue; LANE_COUNT]) -> Self {
        Self { queues }
    }

    pub fn get(&self, lane: Lane) -> &ActionQueue {
        &self.queues[lane.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionQueue> {
        self.queues.iter()
    }

    pub fn total_actions(&self) -> usize {
        self.queues.iter().map(ActionQueue::len).sum()
    }

    /// Nothing left to claim and nothing running
    pub fn is_drained(&self) -> bool {
        self.queues.iter().all(|q| q.remaining() == 0 && q.in_flight() == 0)
    }

    pub fn snapshots(&self) -> Vec<LaneSnapshot> {
        self.queues.iter().map(ActionQueue::snapshot).collect()
    }

    /// Mark a worker of `lane` as running until the guard drops
    pub(crate) fn enter(self: &Arc<Self>, lane: Lane) -> InFlight {
        let queue = self.get(lane);
        let now = queue.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        queue.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlight {
            lanes: Arc::clone(self),
            lane,
        }
    }
}

/// Counts a running worker against its lane
pub(crate) struct InFlight {
    lanes: Arc<Lanes>,
    lane: Lane,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let queue = self.lanes.get(self.lane);
        queue.in_flight.fetch_sub(1, Ordering::AcqRel);
        queue.finished.fetch_add(1, Ordering::AcqRel);
    }
}
