/// Enrichment pipeline: long-lived worker threads that fill in records after
/// the synchronous scan.
///
/// ```text
///  view ──request_visible──▶ info queue (high) ─▶ info workers ─┐
///                                                               ├─▶ thumbnail queue ─▶ thumbnail workers
///  deep-scan thread ──────▶ info queue (low)  ─▶ info workers ─┘
/// ```
///
/// Workers only hold [`RecordRef`]s. A reset of the folder discards its
/// queued refs, and anything already in flight writes to a dead ref and is
/// dropped by the store.
pub mod deep_scan;
pub mod info;
pub mod queue;
pub mod thumbnail;

use crate::collab::{BookmarkDb, ThumbnailCache};
use crate::model::{RecordKind, RecordRef, RecordStore};
use deep_scan::DeepScanHandle;
use parking_lot::Mutex;
use queue::WorkQueue;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use queue::Priority;

/// Knobs for the worker pools.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub info_workers: usize,
    pub thumbnail_workers: usize,
    /// Maximum refs a worker takes per wakeup.
    pub drain_batch: usize,
    /// Refs the deep scan hands over per step.
    pub deep_scan_chunk: usize,
    pub thumbnail_size: u32,
    pub generate_thumbnails: bool,
    /// Sources at or above this size never get a thumbnail.
    pub max_thumbnail_source_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            info_workers: 2,
            thumbnail_workers: 2,
            drain_batch: 32,
            deep_scan_chunk: 256,
            thumbnail_size: 128,
            generate_thumbnails: true,
            max_thumbnail_source_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Shared by every worker thread.
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<RecordStore>,
    pub(crate) db: Arc<dyn BookmarkDb>,
    pub(crate) thumbnails: Arc<dyn ThumbnailCache>,
    pub(crate) config: PipelineConfig,
}

/// Queue sizes, for status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub info_queued: usize,
    pub thumbnails_queued: usize,
    pub deep_scan_idle: bool,
}

pub struct EnrichmentPipeline {
    store: Arc<RecordStore>,
    info: Arc<WorkQueue>,
    thumbnails: Arc<WorkQueue>,
    deep: Mutex<DeepScanHandle>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl EnrichmentPipeline {
    /// Spawn the worker threads.
    pub fn start(
        store: Arc<RecordStore>,
        db: Arc<dyn BookmarkDb>,
        thumbnails: Arc<dyn ThumbnailCache>,
        config: PipelineConfig,
    ) -> Self {
        let info_queue = Arc::new(WorkQueue::new());
        let thumb_queue = Arc::new(WorkQueue::new());
        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&store),
            db,
            thumbnails,
            config: config.clone(),
        });

        let mut workers = Vec::new();
        for i in 0..config.info_workers.max(1) {
            let (ctx, queue, forward) = (
                Arc::clone(&ctx),
                Arc::clone(&info_queue),
                Arc::clone(&thumb_queue),
            );
            workers.push(
                thread::Builder::new()
                    .name(format!("assetsleuth-info-{i}"))
                    .spawn(move || info::run(&ctx, &queue, &forward))
                    .expect("failed to spawn info worker"),
            );
        }
        for i in 0..config.thumbnail_workers.max(1) {
            let (ctx, queue) = (Arc::clone(&ctx), Arc::clone(&thumb_queue));
            workers.push(
                thread::Builder::new()
                    .name(format!("assetsleuth-thumb-{i}"))
                    .spawn(move || thumbnail::run(&ctx, &queue))
                    .expect("failed to spawn thumbnail worker"),
            );
        }

        let deep = DeepScanHandle::start(
            Arc::clone(&store),
            Arc::clone(&info_queue),
            Arc::clone(&thumb_queue),
            config.deep_scan_chunk,
        );
        info!(
            "Enrichment pipeline started: {} info, {} thumbnail workers",
            config.info_workers.max(1),
            config.thumbnail_workers.max(1)
        );

        Self {
            store,
            info: info_queue,
            thumbnails: thumb_queue,
            deep: Mutex::new(deep),
            workers: Mutex::new(workers),
        }
    }

    /// Queue refs for whichever pass they still need. Dead and fully
    /// enriched refs are ignored. Returns how many were queued.
    pub fn request(&self, refs: impl IntoIterator<Item = RecordRef>, priority: Priority) -> usize {
        let mut queued = 0;
        for record in refs {
            let needs = self
                .store
                .with_ref(&record, |r| (r.info_loaded, r.thumbnail_loaded));
            let pushed = match needs {
                Some((false, _)) => self.info.push(record, priority),
                Some((true, false)) => self.thumbnails.push(record, priority),
                _ => false,
            };
            queued += usize::from(pushed);
        }
        queued
    }

    /// Queue the unenriched records of a visible id range at high priority.
    pub fn request_visible(&self, folder: &str, kind: RecordKind, ids: Range<usize>) -> usize {
        let refs: Vec<RecordRef> = ids
            .filter_map(|id| self.store.record_ref(folder, kind, id).ok())
            .collect();
        self.request(refs, Priority::High)
    }

    /// Drop everything queued for `folder`.
    pub fn discard(&self, folder: &str) {
        let dropped = self.info.discard_folder(folder) + self.thumbnails.discard_folder(folder);
        if dropped > 0 {
            debug!("Discarded {dropped} queued refs of {folder}");
        }
    }

    /// Start trickling the rest of `folder` through the low lanes.
    pub fn deep_scan(&self, folder: &str) {
        self.deep.lock().scan(folder);
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            info_queued: self.info.len(),
            thumbnails_queued: self.thumbnails.len(),
            deep_scan_idle: self.deep.lock().is_idle(),
        }
    }

    /// Block until no work is queued, in flight or pending in the deep scan,
    /// or until `timeout` passes. Returns whether the pipeline went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Upstream first: deep scan feeds info, info feeds thumbnails.
            while !self.deep.lock().is_idle() {
                if Instant::now() >= deadline {
                    return false;
                }
                thread::sleep(Duration::from_millis(2));
            }
            if !self.info.wait_idle(deadline) || !self.thumbnails.wait_idle(deadline) {
                return false;
            }
            if self.deep.lock().is_idle() && self.info.is_idle() && self.thumbnails.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    /// Stop every worker and join the threads. Idempotent.
    pub fn shutdown(&self) {
        self.deep.lock().shutdown();
        self.info.close();
        self.thumbnails.close();
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for handle in workers {
            let _ = handle.join();
        }
        info!("Enrichment pipeline stopped");
    }
}

impl Drop for EnrichmentPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
