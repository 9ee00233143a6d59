/// End-to-end enrichment tests.
///
/// The real worker threads run against real files in a temporary directory.
/// The bookmark database and thumbnail cache are small fakes so the tests
/// can slow the info pass down and recognise the thumbnails they produce.
use assetsleuth_core::collab::{BookmarkDb, BookmarkTxn, MemoryBookmarkDb, ThumbnailCache};
use assetsleuth_core::error::{DbError, ThumbnailError};
use assetsleuth_core::model::{BucketState, Enrichment, Rgb, Thumbnail};
use assetsleuth_core::pipeline::{EnrichmentPipeline, PipelineConfig, Priority};
use assetsleuth_core::{Record, RecordKind, RecordStore, StoreEvent};
use compact_str::CompactString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const FOLDER: &str = "renders";
const RED: Rgb = Rgb::new(255, 0, 0);

// ── Fakes ────────────────────────────────────────────────────────────────────

/// In-memory database whose transactions take a while to open.
struct SlowDb {
    inner: MemoryBookmarkDb,
    delay: Duration,
    opened: AtomicUsize,
}

impl BookmarkDb for SlowDb {
    fn transaction(&self) -> Result<Box<dyn BookmarkTxn + '_>, DbError> {
        thread::sleep(self.delay);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.transaction()
    }
}

/// Every source becomes a 2×2 red square.
struct RedThumbnails;

impl ThumbnailCache for RedThumbnails {
    fn make_thumbnail(&self, _source: &Path, _size: u32) -> Result<Thumbnail, ThumbnailError> {
        let pixels: Vec<u8> = [255, 0, 0, 255].repeat(4);
        Ok(Thumbnail {
            width: 2,
            height: 2,
            pixels: pixels.into(),
        })
    }

    fn average_color(&self, _thumbnail: &Thumbnail) -> Rgb {
        RED
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_files(n: usize) -> (TempDir, Vec<PathBuf>) {
    let tmp = tempfile::Builder::new().prefix("pipeline").tempdir().unwrap();
    let paths = (0..n)
        .map(|i| {
            let path = tmp.path().join(format!("shot_{i:03}.mov"));
            fs::write(&path, vec![0u8; 10]).unwrap();
            path
        })
        .collect();
    (tmp, paths)
}

/// Rebuild both buckets of `FOLDER` from `paths`.
fn populate(store: &RecordStore, paths: &[PathBuf]) {
    store.begin_reset(FOLDER);
    for kind in RecordKind::ALL {
        for (id, path) in paths.iter().enumerate() {
            let path = path.to_string_lossy().into_owned();
            let name = CompactString::new(path.rsplit('/').next().unwrap());
            store
                .upsert(FOLDER, kind, id, Record::new(RecordKind::File, path, name))
                .unwrap();
        }
    }
    store.end_reset(FOLDER).unwrap();
}

fn config() -> PipelineConfig {
    PipelineConfig {
        info_workers: 2,
        thumbnail_workers: 2,
        drain_batch: 4,
        deep_scan_chunk: 16,
        ..PipelineConfig::default()
    }
}

fn all_records(store: &RecordStore, kind: RecordKind) -> Vec<Record> {
    store
        .ids(FOLDER, kind)
        .into_iter()
        .map(|id| store.get(FOLDER, kind, id).unwrap())
        .collect()
}

// ── Visible requests ─────────────────────────────────────────────────────────

#[test]
fn visible_range_is_enriched() {
    let (_tmp, paths) = write_files(10);
    let store = Arc::new(RecordStore::new());
    populate(&store, &paths);
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        Arc::new(MemoryBookmarkDb::new()),
        Arc::new(RedThumbnails),
        config(),
    );

    assert_eq!(pipeline.request_visible(FOLDER, RecordKind::File, 0..5), 5);
    assert!(pipeline.wait_idle(Duration::from_secs(30)));

    let records = all_records(&store, RecordKind::File);
    assert!(records[..5].iter().all(Record::is_enriched));
    assert!(records[5..].iter().all(|r| !r.info_loaded));
    assert_eq!(records[0].sort_keys.by_size, 10);
    assert_eq!(records[0].thumbnail_background, Some(RED));
    assert_eq!(
        store.state(FOLDER, RecordKind::File),
        BucketState::Enriching(Enrichment::Partial)
    );

    // Already enriched refs are not queued again.
    assert_eq!(pipeline.request_visible(FOLDER, RecordKind::File, 0..5), 0);
    pipeline.shutdown();
}

#[test]
fn thumbnails_disabled_still_completes() {
    let (_tmp, paths) = write_files(3);
    let store = Arc::new(RecordStore::new());
    populate(&store, &paths);
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        Arc::new(MemoryBookmarkDb::new()),
        Arc::new(RedThumbnails),
        PipelineConfig {
            generate_thumbnails: false,
            ..config()
        },
    );

    pipeline.request(store.refs(FOLDER, RecordKind::Sequence), Priority::High);
    assert!(pipeline.wait_idle(Duration::from_secs(30)));

    for record in all_records(&store, RecordKind::Sequence) {
        assert!(record.is_enriched());
        assert!(record.thumbnail.is_none());
    }
    assert_eq!(
        store.state(FOLDER, RecordKind::Sequence),
        BucketState::Enriching(Enrichment::Complete)
    );
}

// ── Reset while enriching ────────────────────────────────────────────────────

/// 100 refs are queued against a slow database, the folder is reset while
/// some are in flight, and nothing may reach the rebuilt buckets.
#[test]
fn reset_drops_in_flight_work() {
    let (_tmp, paths) = write_files(100);
    let store = Arc::new(RecordStore::new());
    populate(&store, &paths);
    let db = Arc::new(SlowDb {
        inner: MemoryBookmarkDb::new(),
        delay: Duration::from_millis(10),
        opened: AtomicUsize::new(0),
    });
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        Arc::clone(&db) as Arc<dyn BookmarkDb>,
        Arc::new(RedThumbnails),
        config(),
    );

    let old_refs = store.refs(FOLDER, RecordKind::File);
    assert_eq!(pipeline.request(old_refs.clone(), Priority::High), 100);
    while db.opened.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let rx = store.subscribe();
    pipeline.discard(FOLDER);
    populate(&store, &paths);
    assert!(pipeline.wait_idle(Duration::from_secs(30)));

    assert!(db.opened.load(Ordering::SeqCst) < 100, "queued refs were discarded");
    assert!(old_refs.iter().all(|r| store.resolve(r).is_none()));
    for kind in RecordKind::ALL {
        assert!(all_records(&store, kind).iter().all(|r| !r.info_loaded));
        assert_eq!(store.state(FOLDER, kind), BucketState::Populated);
    }

    // Old-generation updates may still land before the reset begins.
    let events: Vec<StoreEvent> = rx.try_iter().collect();
    let begin = events
        .iter()
        .position(|e| matches!(e, StoreEvent::ResetBegin { .. }))
        .unwrap();
    assert!(
        !events[begin..]
            .iter()
            .any(|e| matches!(e, StoreEvent::RecordUpdated { .. })),
        "no update may follow the reset"
    );
}

// ── Deep scan ────────────────────────────────────────────────────────────────

#[test]
fn deep_scan_enriches_everything() {
    let (_tmp, paths) = write_files(120);
    let store = Arc::new(RecordStore::new());
    populate(&store, &paths);
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        Arc::new(MemoryBookmarkDb::new()),
        Arc::new(RedThumbnails),
        config(),
    );

    pipeline.deep_scan(FOLDER);
    assert!(pipeline.wait_idle(Duration::from_secs(60)));

    for kind in RecordKind::ALL {
        assert!(all_records(&store, kind).iter().all(Record::is_enriched));
        assert_eq!(
            store.state(FOLDER, kind),
            BucketState::Enriching(Enrichment::Complete)
        );
    }
    let stats = pipeline.stats();
    assert_eq!(stats.info_queued, 0);
    assert!(stats.deep_scan_idle);
}

#[test]
fn deep_scan_of_reset_folder_stops() {
    let (_tmp, paths) = write_files(200);
    let store = Arc::new(RecordStore::new());
    populate(&store, &paths);
    let db = Arc::new(SlowDb {
        inner: MemoryBookmarkDb::new(),
        delay: Duration::from_millis(2),
        opened: AtomicUsize::new(0),
    });
    let pipeline = EnrichmentPipeline::start(
        Arc::clone(&store),
        Arc::clone(&db) as Arc<dyn BookmarkDb>,
        Arc::new(RedThumbnails),
        config(),
    );

    pipeline.deep_scan(FOLDER);
    thread::sleep(Duration::from_millis(20));
    pipeline.discard(FOLDER);
    populate(&store, &paths);
    assert!(pipeline.wait_idle(Duration::from_secs(60)));

    assert!(db.opened.load(Ordering::SeqCst) < 400);
    for kind in RecordKind::ALL {
        assert!(all_records(&store, kind).iter().all(|r| !r.info_loaded));
    }
}
