/// The canonical table of discovered records.
///
/// Records are grouped into buckets addressed by `(folder_key, kind)`. Each
/// bucket is a small arena: `slots` owns the records and never moves them,
/// `order` maps the dense public id to a slot. Sorting only rewrites `order`,
/// which keeps every outstanding [`RecordRef`] valid across a reindex.
///
/// # Generations
///
/// Every `begin_reset` stamps the folder's buckets with a fresh generation.
/// A `RecordRef` remembers the generation it was taken from, so a ref that
/// outlived a reset is detected as dead with one integer comparison and any
/// write through it is dropped.
///
/// # Locking
///
/// Structural operations (`begin_reset`, `upsert`, `end_reset`, `reindex`)
/// take the bucket-map write lock. Enrichment writes take the map read lock
/// plus the target record's own lock, and only for the field assignment:
/// workers do their I/O before calling in.
use super::event::{ChangeKind, EventHub, StoreEvent};
use super::record::{Record, RecordFlags, RecordKind};
use crate::error::{invariant_violation, StoreError};
use compact_str::CompactString;
use crossbeam_channel::Receiver;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Weak reference to a record.
///
/// Does not keep the record alive. Check it with [`RecordStore::resolve`]
/// before relying on it; writes through a dead ref are silently dropped.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub folder: CompactString,
    pub kind: RecordKind,
    generation: u64,
    slot: u32,
}

impl RecordRef {
    /// The bucket generation this ref was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Progress of the enrichment pass over a populated bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enrichment {
    Partial,
    Complete,
}

/// Lifecycle of one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketState {
    Empty,
    Resetting,
    Populated,
    Enriching(Enrichment),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BucketKey {
    folder: CompactString,
    kind: RecordKind,
}

impl BucketKey {
    fn new(folder: &str, kind: RecordKind) -> Self {
        Self {
            folder: CompactString::new(folder),
            kind,
        }
    }
}

#[derive(Default)]
struct Bucket {
    generation: u64,
    resetting: bool,
    slots: Vec<RwLock<Record>>,
    /// `order[id]` is the slot holding the record with that id.
    order: Vec<u32>,

    staging: Vec<Record>,
    staged_paths: HashSet<CompactString>,
    staged_active: bool,

    info_done: AtomicUsize,
    thumbs_done: AtomicUsize,
}

impl Bucket {
    fn live_slot(&self, generation: u64, slot: u32) -> Option<&RwLock<Record>> {
        if self.resetting || self.generation != generation {
            return None;
        }
        self.slots.get(slot as usize)
    }

    fn slot_for_id(&self, id: usize) -> Option<u32> {
        if self.resetting {
            return None;
        }
        self.order.get(id).copied()
    }

    fn state(&self) -> BucketState {
        if self.resetting {
            return BucketState::Resetting;
        }
        let n = self.order.len();
        let info = self.info_done.load(Ordering::Relaxed);
        let thumbs = self.thumbs_done.load(Ordering::Relaxed);
        if n == 0 || (info == 0 && thumbs == 0) {
            BucketState::Populated
        } else if info >= n && thumbs >= n {
            BucketState::Enriching(Enrichment::Complete)
        } else {
            BucketState::Enriching(Enrichment::Partial)
        }
    }

    /// Keep the completion counters in step with a record's loaded flags.
    fn track_loaded(&self, before: (bool, bool), after: (bool, bool)) {
        fn step(counter: &AtomicUsize, was: bool, is: bool) {
            match (was, is) {
                (false, true) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                (true, false) => {
                    counter.fetch_sub(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
        step(&self.info_done, before.0, after.0);
        step(&self.thumbs_done, before.1, after.1);
    }

    /// `true` if any slot other than `except` carries `ACTIVE`.
    fn other_active(&self, except: usize) -> bool {
        self.slots
            .iter()
            .enumerate()
            .filter(|(slot, _)| *slot != except)
            .any(|(_, cell)| cell.read().flags.contains(RecordFlags::ACTIVE))
    }
}

/// Read-only view over a live bucket, handed out by [`RecordStore::read_bucket`].
pub struct BucketView<'a> {
    slots: &'a [RwLock<Record>],
    order: &'a [u32],
}

impl<'a> BucketView<'a> {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Borrow the record with the given id.
    ///
    /// # Panics
    /// Panics if `id >= len()`.
    pub fn record(&self, id: usize) -> RwLockReadGuard<'a, Record> {
        self.slots[self.order[id] as usize].read()
    }
}

/// Record store shared between the scanner, the workers and the view.
pub struct RecordStore {
    buckets: RwLock<HashMap<BucketKey, Bucket>>,
    next_generation: AtomicU64,
    events: EventHub,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            events: EventHub::new(),
        }
    }

    /// Subscribe to store notifications.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ── Structural operations ────────────────────────────────────────────

    /// Open the reset bracket for both buckets of `folder`.
    ///
    /// Readers see the buckets as empty until [`end_reset`](Self::end_reset).
    /// May be called in any state; an unfinished bracket is simply restarted.
    pub fn begin_reset(&self, folder: &str) {
        let mut buckets = self.buckets.write();
        for kind in RecordKind::ALL {
            let bucket = buckets.entry(BucketKey::new(folder, kind)).or_default();
            bucket.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            bucket.resetting = true;
            bucket.slots.clear();
            bucket.order.clear();
            bucket.staging.clear();
            bucket.staged_paths.clear();
            bucket.staged_active = false;
            bucket.info_done.store(0, Ordering::Relaxed);
            bucket.thumbs_done.store(0, Ordering::Relaxed);
        }
        debug!("Reset begin: {folder}");
        self.events.publish(StoreEvent::ResetBegin {
            folder: CompactString::new(folder),
        });
    }

    /// Stage `record` under `id` while the bucket is being rebuilt.
    ///
    /// `id` must be the next dense id, the path must be new to the bucket and
    /// only one staged record may carry `ACTIVE`.
    pub fn upsert(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
        mut record: Record,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        let bucket = match buckets.get_mut(&BucketKey::new(folder, kind)) {
            Some(b) if b.resetting => b,
            _ => {
                return Err(invariant_violation(format!(
                    "upsert into {folder}/{kind} outside a reset bracket"
                )))
            }
        };
        if id != bucket.staging.len() {
            return Err(invariant_violation(format!(
                "upsert into {folder}/{kind} with id {id}, expected {}",
                bucket.staging.len()
            )));
        }
        if bucket.staged_paths.contains(&record.full_path) {
            return Err(invariant_violation(format!(
                "duplicate path {} in {folder}/{kind}",
                record.full_path
            )));
        }
        if record.flags.contains(RecordFlags::ACTIVE) {
            if bucket.staged_active {
                return Err(invariant_violation(format!(
                    "second active record {} in {folder}/{kind}",
                    record.full_path
                )));
            }
            bucket.staged_active = true;
        }
        bucket.staged_paths.insert(record.full_path.clone());
        record.id = id;
        bucket.staging.push(record);
        Ok(())
    }

    /// Close the reset bracket and swap the staged records in atomically.
    pub fn end_reset(&self, folder: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        let all_resetting = RecordKind::ALL.iter().all(|&kind| {
            buckets
                .get(&BucketKey::new(folder, kind))
                .is_some_and(|b| b.resetting)
        });
        if !all_resetting {
            return Err(invariant_violation(format!(
                "end_reset for {folder} without begin_reset"
            )));
        }

        for kind in RecordKind::ALL {
            if let Some(bucket) = buckets.get_mut(&BucketKey::new(folder, kind)) {
                let staged = std::mem::take(&mut bucket.staging);
                bucket.staged_paths.clear();
                bucket.staged_active = false;

                let mut info = 0;
                let mut thumbs = 0;
                bucket.order = (0..staged.len() as u32).collect();
                bucket.slots = staged
                    .into_iter()
                    .map(|record| {
                        info += usize::from(record.info_loaded);
                        thumbs += usize::from(record.thumbnail_loaded);
                        RwLock::new(record)
                    })
                    .collect();
                bucket.info_done.store(info, Ordering::Relaxed);
                bucket.thumbs_done.store(thumbs, Ordering::Relaxed);
                bucket.resetting = false;
                debug!("Reset end: {folder}/{kind} with {} records", bucket.order.len());
            }
        }
        self.events.publish(StoreEvent::ResetEnd {
            folder: CompactString::new(folder),
        });
        Ok(())
    }

    /// Reorder a live bucket. `ordering[new_id]` is the current id of the
    /// record that should end up at `new_id`; it must be a permutation.
    pub fn reindex(
        &self,
        folder: &str,
        kind: RecordKind,
        ordering: &[usize],
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        let bucket = match buckets.get_mut(&BucketKey::new(folder, kind)) {
            Some(b) if !b.resetting => b,
            _ => {
                return Err(invariant_violation(format!(
                    "reindex of {folder}/{kind} which is not live"
                )))
            }
        };

        Self::apply_ordering(bucket, folder, kind, ordering)?;
        self.events.publish(StoreEvent::Reindexed {
            folder: CompactString::new(folder),
            kind,
        });
        Ok(())
    }

    /// Compute an ordering over a live bucket and apply it in one step.
    ///
    /// `f` runs under the structural lock, so no reset can land between
    /// reading the records and reindexing them. A bucket that is not live
    /// is left alone and `Ok(false)` returned.
    pub fn reorder(
        &self,
        folder: &str,
        kind: RecordKind,
        f: impl FnOnce(&BucketView<'_>) -> Vec<usize>,
    ) -> Result<bool, StoreError> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets
            .get_mut(&BucketKey::new(folder, kind))
            .filter(|b| !b.resetting)
        else {
            return Ok(false);
        };
        let ordering = f(&BucketView {
            slots: &bucket.slots,
            order: &bucket.order,
        });
        Self::apply_ordering(bucket, folder, kind, &ordering)?;
        self.events.publish(StoreEvent::Reindexed {
            folder: CompactString::new(folder),
            kind,
        });
        Ok(true)
    }

    fn apply_ordering(
        bucket: &mut Bucket,
        folder: &str,
        kind: RecordKind,
        ordering: &[usize],
    ) -> Result<(), StoreError> {
        let n = bucket.order.len();
        let mut seen = vec![false; n];
        let is_permutation = ordering.len() == n
            && ordering
                .iter()
                .all(|&id| id < n && !std::mem::replace(&mut seen[id], true));
        if !is_permutation {
            return Err(invariant_violation(format!(
                "reindex of {folder}/{kind} with an ordering that is not a permutation of 0..{n}"
            )));
        }

        let new_order: Vec<u32> = ordering.iter().map(|&id| bucket.order[id]).collect();
        for (new_id, &slot) in new_order.iter().enumerate() {
            bucket.slots[slot as usize].get_mut().id = new_id;
        }
        bucket.order = new_order;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Number of live records in a bucket (0 while resetting).
    pub fn len(&self, folder: &str, kind: RecordKind) -> usize {
        self.buckets
            .read()
            .get(&BucketKey::new(folder, kind))
            .filter(|b| !b.resetting)
            .map_or(0, |b| b.order.len())
    }

    /// Every live id of a bucket in order, i.e. `0..len`.
    pub fn ids(&self, folder: &str, kind: RecordKind) -> Vec<usize> {
        (0..self.len(folder, kind)).collect()
    }

    pub fn state(&self, folder: &str, kind: RecordKind) -> BucketState {
        self.buckets
            .read()
            .get(&BucketKey::new(folder, kind))
            .map_or(BucketState::Empty, Bucket::state)
    }

    /// Current generation of a bucket, if it was ever addressed.
    pub fn generation(&self, folder: &str, kind: RecordKind) -> Option<u64> {
        self.buckets
            .read()
            .get(&BucketKey::new(folder, kind))
            .map(|b| b.generation)
    }

    /// Snapshot of the record with the given id.
    pub fn get(&self, folder: &str, kind: RecordKind, id: usize) -> Result<Record, StoreError> {
        self.with_record(folder, kind, id, Record::clone)
    }

    /// Borrow the record with the given id without cloning it.
    pub fn with_record<R>(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
        f: impl FnOnce(&Record) -> R,
    ) -> Result<R, StoreError> {
        let buckets = self.buckets.read();
        let bucket = buckets
            .get(&BucketKey::new(folder, kind))
            .ok_or_else(|| StoreError::not_found(folder, kind, id))?;
        let slot = bucket
            .slot_for_id(id)
            .ok_or_else(|| StoreError::not_found(folder, kind, id))?;
        let record = bucket.slots[slot as usize].read();
        Ok(f(&record))
    }

    /// Run `f` over a live bucket. Resetting or unknown buckets show as empty.
    pub fn read_bucket<R>(
        &self,
        folder: &str,
        kind: RecordKind,
        f: impl FnOnce(&BucketView<'_>) -> R,
    ) -> R {
        let buckets = self.buckets.read();
        let view = match buckets.get(&BucketKey::new(folder, kind)) {
            Some(b) if !b.resetting => BucketView {
                slots: &b.slots,
                order: &b.order,
            },
            _ => BucketView {
                slots: &[],
                order: &[],
            },
        };
        f(&view)
    }

    /// Take a weak reference to the record currently at `id`.
    pub fn record_ref(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
    ) -> Result<RecordRef, StoreError> {
        let buckets = self.buckets.read();
        let key = BucketKey::new(folder, kind);
        let bucket = buckets
            .get(&key)
            .ok_or_else(|| StoreError::not_found(folder, kind, id))?;
        let slot = bucket
            .slot_for_id(id)
            .ok_or_else(|| StoreError::not_found(folder, kind, id))?;
        Ok(RecordRef {
            folder: key.folder,
            kind,
            generation: bucket.generation,
            slot,
        })
    }

    /// Weak references to every record of a bucket, in id order.
    pub fn refs(&self, folder: &str, kind: RecordKind) -> Vec<RecordRef> {
        let buckets = self.buckets.read();
        let key = BucketKey::new(folder, kind);
        match buckets.get(&key) {
            Some(b) if !b.resetting => b
                .order
                .iter()
                .map(|&slot| RecordRef {
                    folder: key.folder.clone(),
                    kind,
                    generation: b.generation,
                    slot,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Current id of a referenced record, or `None` if the ref is dead.
    pub fn resolve(&self, record: &RecordRef) -> Option<usize> {
        self.with_ref(record, |r| r.id)
    }

    /// Borrow a referenced record if it is still alive.
    pub fn with_ref<R>(&self, record: &RecordRef, f: impl FnOnce(&Record) -> R) -> Option<R> {
        let buckets = self.buckets.read();
        let cell = buckets
            .get(&BucketKey::new(&record.folder, record.kind))?
            .live_slot(record.generation, record.slot)?;
        let guard = cell.read();
        Some(f(&guard))
    }

    // ── In-place mutation ────────────────────────────────────────────────

    /// Apply `f` to the record at `id` and notify subscribers.
    ///
    /// An unknown id is an invariant violation: callers holding ids across
    /// resets should use [`mutate_ref`](Self::mutate_ref) instead.
    pub fn mutate(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
        change: ChangeKind,
        f: impl FnOnce(&mut Record),
    ) -> Result<(), StoreError> {
        let record = match self.record_ref(folder, kind, id) {
            Ok(r) => r,
            Err(_) => {
                return Err(invariant_violation(format!(
                    "mutate of unknown record {id} in {folder}/{kind}"
                )))
            }
        };
        // A reset between the two calls would kill the ref; report it the same way.
        if self.mutate_ref(&record, change, f) {
            Ok(())
        } else {
            Err(invariant_violation(format!(
                "mutate of record {id} in {folder}/{kind} raced a reset"
            )))
        }
    }

    /// Apply `f` to a referenced record if it is still alive.
    ///
    /// Returns `false` and writes nothing when the ref is dead. On success
    /// the `RecordUpdated` event is published before the bucket can be reset,
    /// so no update for a superseded generation follows its `ResetBegin`.
    pub fn mutate_ref(
        &self,
        record: &RecordRef,
        change: ChangeKind,
        f: impl FnOnce(&mut Record),
    ) -> bool {
        let buckets = self.buckets.read();
        let Some(bucket) = buckets.get(&BucketKey::new(&record.folder, record.kind)) else {
            return false;
        };
        let Some(cell) = bucket.live_slot(record.generation, record.slot) else {
            return false;
        };

        let became_active = {
            let mut guard = cell.write();
            let before = (guard.info_loaded, guard.thumbnail_loaded);
            let was_active = guard.flags.contains(RecordFlags::ACTIVE);
            f(&mut guard);
            bucket.track_loaded(before, (guard.info_loaded, guard.thumbnail_loaded));
            !was_active && guard.flags.contains(RecordFlags::ACTIVE)
        };
        // Checked after releasing the slot lock; other slots are read-locked.
        if became_active && bucket.other_active(record.slot as usize) {
            let mut guard = cell.write();
            guard.flags.remove(RecordFlags::ACTIVE);
            let _ = invariant_violation(format!(
                "second active record {} in {}/{}; use set_active",
                guard.full_path, record.folder, record.kind
            ));
        }

        self.events.publish(StoreEvent::RecordUpdated {
            record: record.clone(),
            change,
        });
        true
    }

    /// Make `id` the single active record of the bucket, or clear the
    /// flag everywhere with `None`. Returns the ids whose flags changed.
    pub fn set_active(
        &self,
        folder: &str,
        kind: RecordKind,
        id: Option<usize>,
    ) -> Result<Vec<usize>, StoreError> {
        let buckets = self.buckets.read();
        let key = BucketKey::new(folder, kind);
        let bucket = match buckets.get(&key) {
            Some(b) if !b.resetting => b,
            _ => return Err(StoreError::not_found(folder, kind, id.unwrap_or(0))),
        };
        let target = match id {
            Some(id) => Some(
                bucket
                    .slot_for_id(id)
                    .ok_or_else(|| StoreError::not_found(folder, kind, id))?,
            ),
            None => None,
        };

        let mut changed = Vec::new();
        for (slot, cell) in bucket.slots.iter().enumerate() {
            let mut guard = cell.write();
            let should = target == Some(slot as u32);
            if guard.flags.contains(RecordFlags::ACTIVE) != should {
                guard.flags.set(RecordFlags::ACTIVE, should);
                changed.push((guard.id, slot as u32));
            }
        }
        for &(_, slot) in &changed {
            self.events.publish(StoreEvent::RecordUpdated {
                record: RecordRef {
                    folder: key.folder.clone(),
                    kind,
                    generation: bucket.generation,
                    slot,
                },
                change: ChangeKind::Flags,
            });
        }
        Ok(changed.into_iter().map(|(id, _)| id).collect())
    }
}
