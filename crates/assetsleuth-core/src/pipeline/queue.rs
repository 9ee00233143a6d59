/// Two-lane blocking work queue of record references.
///
/// Workers block in [`WorkQueue::pop_batch`] until work arrives and then take
/// up to `max` refs at once, always draining the high lane first. A ref is
/// queued at most once; re-requesting a low-priority ref at high priority
/// promotes it.
use crate::model::RecordRef;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

/// Scheduling lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Deep-scan trickle feed.
    Low,
    /// Rows the view currently shows.
    High,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<RecordRef>,
    low: VecDeque<RecordRef>,
    pending: HashSet<RecordRef>,
    /// Refs handed to a worker and not yet reported done.
    in_flight: usize,
    closed: bool,
}

impl Lanes {
    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}

#[derive(Default)]
pub struct WorkQueue {
    lanes: Mutex<Lanes>,
    ready: Condvar,
    idle: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `record`. Returns `false` if it was already queued at the same
    /// or a higher priority, or the queue is closed.
    pub fn push(&self, record: RecordRef, priority: Priority) -> bool {
        let mut lanes = self.lanes.lock();
        if lanes.closed {
            return false;
        }
        if lanes.pending.contains(&record) {
            if priority == Priority::High {
                if let Some(pos) = lanes.low.iter().position(|r| *r == record) {
                    lanes.low.remove(pos);
                    lanes.high.push_back(record);
                    return true;
                }
            }
            return false;
        }
        lanes.pending.insert(record.clone());
        match priority {
            Priority::High => lanes.high.push_back(record),
            Priority::Low => lanes.low.push_back(record),
        }
        drop(lanes);
        self.ready.notify_one();
        true
    }

    /// Queue several refs; returns how many were newly queued or promoted.
    pub fn push_many(&self, records: impl IntoIterator<Item = RecordRef>, priority: Priority) -> usize {
        records
            .into_iter()
            .filter(|r| self.push(r.clone(), priority))
            .count()
    }

    /// Block until work is available and take up to `max` refs, high lane
    /// first. Returns `None` once the queue is closed.
    ///
    /// Every ref taken must be reported with [`done`](Self::done).
    pub fn pop_batch(&self, max: usize) -> Option<Vec<(RecordRef, Priority)>> {
        let mut lanes = self.lanes.lock();
        while lanes.is_empty() && !lanes.closed {
            self.ready.wait(&mut lanes);
        }
        if lanes.closed {
            return None;
        }

        let max = max.max(1);
        let mut batch = Vec::with_capacity(max.min(lanes.high.len() + lanes.low.len()));
        while batch.len() < max {
            let next = match lanes.high.pop_front() {
                Some(r) => (r, Priority::High),
                None => match lanes.low.pop_front() {
                    Some(r) => (r, Priority::Low),
                    None => break,
                },
            };
            lanes.pending.remove(&next.0);
            batch.push(next);
        }
        lanes.in_flight += batch.len();
        Some(batch)
    }

    /// Report `n` refs from [`pop_batch`](Self::pop_batch) as finished.
    pub fn done(&self, n: usize) {
        let mut lanes = self.lanes.lock();
        lanes.in_flight = lanes.in_flight.saturating_sub(n);
        if lanes.in_flight == 0 && lanes.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Drop every pending ref of `folder` without processing it.
    pub fn discard_folder(&self, folder: &str) -> usize {
        let mut lanes = self.lanes.lock();
        let before = lanes.high.len() + lanes.low.len();
        lanes.high.retain(|r| r.folder != folder);
        lanes.low.retain(|r| r.folder != folder);
        lanes.pending.retain(|r| r.folder != folder);
        let dropped = before - (lanes.high.len() + lanes.low.len());
        if lanes.in_flight == 0 && lanes.is_empty() {
            self.idle.notify_all();
        }
        dropped
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.high.len() + lanes.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.lock().is_empty()
    }

    /// Refs waiting in the low lane.
    pub fn low_len(&self) -> usize {
        self.lanes.lock().low.len()
    }

    /// `true` when nothing is queued or being processed.
    pub fn is_idle(&self) -> bool {
        let lanes = self.lanes.lock();
        lanes.is_empty() && lanes.in_flight == 0
    }

    /// Block until idle or `deadline`. Returns whether the queue is idle.
    pub fn wait_idle(&self, deadline: Instant) -> bool {
        let mut lanes = self.lanes.lock();
        while !(lanes.is_empty() && lanes.in_flight == 0) && !lanes.closed {
            if self.idle.wait_until(&mut lanes, deadline).timed_out() {
                return lanes.is_empty() && lanes.in_flight == 0;
            }
        }
        true
    }

    /// Wake every blocked worker and make further pops return `None`.
    pub fn close(&self) {
        let mut lanes = self.lanes.lock();
        lanes.closed = true;
        lanes.high.clear();
        lanes.low.clear();
        lanes.pending.clear();
        drop(lanes);
        self.ready.notify_all();
        self.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, RecordKind, RecordStore};
    use compact_str::CompactString;
    use std::sync::Arc;
    use std::time::Duration;

    fn refs(folder: &str, n: usize) -> (RecordStore, Vec<RecordRef>) {
        let store = RecordStore::new();
        store.begin_reset(folder);
        for id in 0..n {
            let path = format!("/{folder}/f{id}.ma");
            let record = Record::new(RecordKind::File, path, CompactString::new("f"));
            store.upsert(folder, RecordKind::File, id, record).unwrap();
        }
        store.end_reset(folder).unwrap();
        let refs = store.refs(folder, RecordKind::File);
        (store, refs)
    }

    #[test]
    fn high_lane_drains_first() {
        let (_store, r) = refs("t", 3);
        let queue = WorkQueue::new();
        queue.push(r[0].clone(), Priority::Low);
        queue.push(r[1].clone(), Priority::High);

        let batch = queue.pop_batch(1).unwrap();
        assert_eq!(batch, vec![(r[1].clone(), Priority::High)]);
        queue.done(1);
    }

    #[test]
    fn duplicates_are_ignored_and_promoted() {
        let (_store, r) = refs("t", 1);
        let queue = WorkQueue::new();
        assert!(queue.push(r[0].clone(), Priority::Low));
        assert!(!queue.push(r[0].clone(), Priority::Low));
        assert!(queue.push(r[0].clone(), Priority::High));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.low_len(), 0);
    }

    #[test]
    fn batch_is_bounded() {
        let (_store, r) = refs("t", 10);
        let queue = WorkQueue::new();
        queue.push_many(r, Priority::Low);
        assert_eq!(queue.pop_batch(4).unwrap().len(), 4);
        assert_eq!(queue.len(), 6);
    }

    #[test]
    fn discard_only_touches_one_folder() {
        let (_s1, a) = refs("a", 3);
        let (_s2, b) = refs("b", 2);
        let queue = WorkQueue::new();
        queue.push_many(a, Priority::High);
        queue.push_many(b.clone(), Priority::Low);

        assert_eq!(queue.discard_folder("a"), 3);
        assert_eq!(queue.len(), 2);
        assert!(!queue.push(b[0].clone(), Priority::Low), "b is still queued");
    }

    #[test]
    fn close_releases_blocked_workers() {
        let queue = Arc::new(WorkQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_batch(8))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(worker.join().unwrap().is_none());
    }

    #[test]
    fn wait_idle_tracks_in_flight_work() {
        let (_store, r) = refs("t", 1);
        let queue = WorkQueue::new();
        queue.push(r[0].clone(), Priority::High);
        let batch = queue.pop_batch(8).unwrap();
        assert!(!queue.wait_idle(Instant::now() + Duration::from_millis(10)));
        queue.done(batch.len());
        assert!(queue.wait_idle(Instant::now() + Duration::from_millis(10)));
    }
}
