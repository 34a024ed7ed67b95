//! Assignment cursors: infinite sequences of processor ids used to pick
//! the next owner for a new job.
//!
//! Both cursors work off a snapshot taken once per scheduling pass and
//! are deliberately allowed to drift from ground truth between passes:
//! approximate balance costs one query per pass instead of one per job.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::store::{ProcessorId, ProcessorLoad};

use super::MonitorError;

/// An infinite sequence of processor ids.
pub trait OwnerCursor {
    /// Picks the processor that should own the next job.
    fn next_owner(&mut self) -> ProcessorId;
}

/// Load-aware cursor: always yields the processor with the fewest open
/// jobs, counting its own assignments as it goes.
///
/// The counts come from a once-per-pass snapshot; the heap tracks only
/// the jobs this cursor hands out, so the balance is session-local and
/// stale with respect to concurrent activity. Ties break toward the
/// lower processor id.
#[derive(Debug)]
pub struct BalancedCursor {
    heap: BinaryHeap<Reverse<(i64, ProcessorId)>>,
}

impl BalancedCursor {
    /// Builds a cursor from a `(processor, open job count)` snapshot.
    ///
    /// An empty snapshot means there is no processor to own new work,
    /// which is the fleet-fatal condition.
    pub fn new(loads: Vec<ProcessorLoad>) -> Result<Self, MonitorError> {
        if loads.is_empty() {
            return Err(MonitorError::NoLiveProcessors);
        }
        let heap = loads
            .into_iter()
            .map(|l| Reverse((l.open_jobs, l.id)))
            .collect();
        Ok(Self { heap })
    }
}

impl OwnerCursor for BalancedCursor {
    fn next_owner(&mut self) -> ProcessorId {
        // The constructor guarantees a non-empty heap.
        let Reverse((count, id)) = self.heap.pop().unwrap_or(Reverse((0, 0)));
        self.heap.push(Reverse((count + 1, id)));
        id
    }
}

/// Round-robin cursor over the live-processor snapshot, without regard
/// to load.
#[derive(Debug)]
pub struct RoundRobinCursor {
    ids: Vec<ProcessorId>,
    next: usize,
}

impl RoundRobinCursor {
    /// Builds a cursor from the live processor ids.
    pub fn new(ids: Vec<ProcessorId>) -> Result<Self, MonitorError> {
        if ids.is_empty() {
            return Err(MonitorError::NoLiveProcessors);
        }
        Ok(Self { ids, next: 0 })
    }
}

impl OwnerCursor for RoundRobinCursor {
    fn next_owner(&mut self) -> ProcessorId {
        let id = self.ids[self.next % self.ids.len()];
        self.next = (self.next + 1) % self.ids.len();
        id
    }
}
