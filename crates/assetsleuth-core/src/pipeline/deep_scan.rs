/// Deep-scan worker: enriches everything the view never asks for.
///
/// A single thread receives folder commands over a channel and trickles the
/// unenriched refs of both buckets into the low lanes, one chunk at a time.
/// It waits while the low lane is still busy with the previous chunk so that
/// visible-row requests keep jumping ahead, and abandons a folder as soon as
/// its generation changes.
use super::queue::{Priority, WorkQueue};
use crate::model::{RecordKind, RecordRef, RecordStore};
use compact_str::CompactString;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Pause between checks while the low lane is backed up.
const BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub(crate) enum DeepScanCommand {
    Scan(CompactString),
    Shutdown,
}

pub(crate) struct DeepScanHandle {
    tx: Sender<DeepScanCommand>,
    /// Commands sent and not yet finished.
    pending: Arc<AtomicUsize>,
    cancel: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

struct Feeder {
    store: Arc<RecordStore>,
    info: Arc<WorkQueue>,
    thumbnails: Arc<WorkQueue>,
    chunk: usize,
    cancel: Arc<AtomicBool>,
}

impl DeepScanHandle {
    pub(crate) fn start(
        store: Arc<RecordStore>,
        info: Arc<WorkQueue>,
        thumbnails: Arc<WorkQueue>,
        chunk: usize,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = Arc::new(AtomicBool::new(false));
        let feeder = Feeder {
            store,
            info,
            thumbnails,
            chunk: chunk.max(1),
            cancel: Arc::clone(&cancel),
        };
        let pending_clone = Arc::clone(&pending);

        let thread = thread::Builder::new()
            .name("assetsleuth-deep-scan".into())
            .spawn(move || feeder.run(rx, pending_clone))
            .expect("failed to spawn deep-scan thread");

        Self {
            tx,
            pending,
            cancel,
            thread: Some(thread),
        }
    }

    pub(crate) fn scan(&self, folder: &str) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .tx
            .send(DeepScanCommand::Scan(CompactString::new(folder)))
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    pub(crate) fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.tx.send(DeepScanCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Feeder {
    fn run(&self, rx: Receiver<DeepScanCommand>, pending: Arc<AtomicUsize>) {
        loop {
            match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(DeepScanCommand::Scan(folder)) => {
                    self.feed_folder(&folder);
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                Ok(DeepScanCommand::Shutdown) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
        }
        debug!("Deep-scan worker exiting");
    }

    fn feed_folder(&self, folder: &str) {
        let mut queued = 0usize;
        for kind in RecordKind::ALL {
            let Some(generation) = self.store.generation(folder, kind) else {
                continue;
            };
            let refs = self.store.refs(folder, kind);
            for chunk in refs.chunks(self.chunk) {
                if !self.wait_for_room(folder, kind, generation) {
                    debug!("Deep scan of {folder}/{kind} abandoned");
                    return;
                }
                queued += self.feed_chunk(chunk);
            }
        }
        info!("Deep scan of {folder} queued {queued} records");
    }

    /// Route each unenriched ref to the first pass it still needs.
    fn feed_chunk(&self, chunk: &[RecordRef]) -> usize {
        let mut queued = 0;
        for record in chunk {
            let needs = self
                .store
                .with_ref(record, |r| (r.info_loaded, r.thumbnail_loaded));
            let pushed = match needs {
                Some((false, _)) => self.info.push(record.clone(), Priority::Low),
                Some((true, false)) => self.thumbnails.push(record.clone(), Priority::Low),
                _ => false,
            };
            queued += usize::from(pushed);
        }
        queued
    }

    /// Block until the low lane has drained below one chunk. Returns `false`
    /// if the bucket was reset or the pipeline is shutting down.
    fn wait_for_room(&self, folder: &str, kind: RecordKind, generation: u64) -> bool {
        loop {
            if self.cancel.load(Ordering::Relaxed)
                || self.store.generation(folder, kind) != Some(generation)
            {
                return false;
            }
            if self.info.low_len() < self.chunk && self.thumbnails.low_len() < self.chunk {
                return true;
            }
            thread::sleep(BACKOFF);
        }
    }
}
