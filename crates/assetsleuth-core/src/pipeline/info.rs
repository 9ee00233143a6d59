/// Info worker: file stats, bookmark-database fields and derived strings.
///
/// All I/O happens on a snapshot taken from the store; the result is
/// written back in one `mutate_ref` call. A dead ref at either end means the
/// bucket was reset meanwhile and the work is dropped.
use super::queue::WorkQueue;
use super::WorkerContext;
use crate::collab::{Table, DESCRIPTION_KEY, FLAGS_KEY};
use crate::error::DbError;
use crate::model::{size, ChangeKind, RecordFlags, RecordKind, RecordRef, SequenceParts};
use crate::scanner::sequence;
use compact_str::CompactString;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Flags the database is allowed to contribute.
const PERSISTED_FLAGS: RecordFlags = RecordFlags::FAVOURITE.union(RecordFlags::ARCHIVED);

struct Snapshot {
    kind: RecordKind,
    path: String,
    sources: Vec<String>,
    sequence: Option<SequenceParts>,
    frames: Vec<CompactString>,
}

#[derive(Default)]
struct Stats {
    bytes: u64,
    mtime: i64,
    readable: bool,
}

#[derive(Default)]
struct DbFields {
    description: Option<String>,
    flags: RecordFlags,
}

fn stat_sources(sources: &[String]) -> Stats {
    let mut stats = Stats::default();
    for source in sources {
        match std::fs::metadata(source) {
            Ok(meta) => {
                stats.readable = true;
                stats.bytes += meta.len();
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64);
                stats.mtime = stats.mtime.max(mtime);
            }
            Err(e) => debug!("Cannot stat {source}: {e}"),
        }
    }
    stats
}

fn flags_from(value: Option<serde_json::Value>) -> RecordFlags {
    value
        .and_then(|v| v.as_u64())
        .map_or(RecordFlags::empty(), |bits| {
            RecordFlags::from_bits_truncate(bits as u8) & PERSISTED_FLAGS
        })
}

/// Description from the record's own key, flags from its own key and from
/// the key of the sequence it belongs to.
fn query_db(ctx: &WorkerContext, snap: &Snapshot) -> Result<DbFields, DbError> {
    let proxy = snap.sequence.as_ref().map(sequence::sequence_key);
    let mut txn = ctx.db.transaction()?;
    let description = txn
        .get(&snap.path, DESCRIPTION_KEY, Table::Data)?
        .and_then(|v| v.as_str().map(str::to_owned));
    let mut flags = flags_from(txn.get(&snap.path, FLAGS_KEY, Table::Data)?);
    if let Some(proxy) = proxy.as_deref().filter(|p| *p != snap.path) {
        flags |= flags_from(txn.get(proxy, FLAGS_KEY, Table::Data)?);
    }
    txn.commit()?;
    Ok(DbFields { description, flags })
}

fn read_db(ctx: &WorkerContext, snap: &Snapshot) -> DbFields {
    query_db(ctx, snap).unwrap_or_else(|e| {
        warn!("Bookmark database read failed for {}: {e}", snap.path);
        DbFields::default()
    })
}

/// Enrich one record. Returns `false` if the ref was dead or already done.
pub(crate) fn process(ctx: &WorkerContext, record: &RecordRef) -> bool {
    let snap = ctx.store.with_ref(record, |r| {
        (!r.info_loaded).then(|| Snapshot {
            kind: r.kind,
            path: r.path.clone(),
            sources: r.source_paths(),
            sequence: r.sequence.clone(),
            frames: r.frames.clone(),
        })
    });
    let Some(Some(snap)) = snap else {
        return false;
    };

    let stats = stat_sources(&snap.sources);
    if !stats.readable {
        warn!("No readable source for {}", snap.path);
    }
    let db = read_db(ctx, &snap);

    let is_sequence = snap.kind == RecordKind::Sequence;
    let details = stats.readable.then(|| {
        let frame_count = is_sequence.then_some(snap.frames.len());
        size::format_details(frame_count, stats.mtime, stats.bytes)
    });
    let (range, bounds) = match (&snap.sequence, is_sequence) {
        (Some(parts), true) => (
            Some(sequence::frame_ranges(&snap.frames)),
            sequence::bounding_paths(parts, &snap.frames),
        ),
        _ => (None, None),
    };

    ctx.store.mutate_ref(record, ChangeKind::Info, |r| {
        if let Some(description) = db.description {
            r.description = description;
        }
        r.flags |= db.flags;
        if let Some(details) = details {
            r.file_details = details;
        }
        r.sort_keys.by_mtime = stats.mtime;
        r.sort_keys.by_size = stats.bytes;
        r.frame_range = range;
        if let Some((start, end)) = bounds {
            r.start_path = Some(start);
            r.end_path = Some(end);
        }
        r.info_loaded = true;
    })
}

/// Worker loop: drain batches until the queue closes, forwarding each ref
/// to the thumbnail queue at the priority it arrived with.
pub(crate) fn run(ctx: &WorkerContext, queue: &WorkQueue, forward: &WorkQueue) {
    while let Some(batch) = queue.pop_batch(ctx.config.drain_batch) {
        let n = batch.len();
        for (record, priority) in batch {
            process(ctx, &record);
            if ctx.config.generate_thumbnails {
                forward.push(record, priority);
            } else {
                super::thumbnail::mark_skipped(ctx, &record);
            }
        }
        queue.done(n);
    }
    debug!("Info worker exiting");
}
