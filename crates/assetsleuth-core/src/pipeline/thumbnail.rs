/// Thumbnail worker.
///
/// Runs only after the info pass: the info worker forwards each ref here
/// once it is done. Archived records and oversized sources are marked loaded
/// without an image.
use super::queue::WorkQueue;
use super::WorkerContext;
use crate::model::{ChangeKind, RecordFlags, RecordRef};
use std::path::PathBuf;
use tracing::debug;

enum Plan {
    Skip,
    Decode(PathBuf),
}

/// Mark a record as having no thumbnail.
pub(crate) fn mark_skipped(ctx: &WorkerContext, record: &RecordRef) -> bool {
    ctx.store.mutate_ref(record, ChangeKind::Thumbnail, |r| {
        r.thumbnail_loaded = true;
    })
}

/// Produce the thumbnail for one record. Returns `false` if the ref was
/// dead, its info is still missing, or it already had one.
pub(crate) fn process(ctx: &WorkerContext, record: &RecordRef) -> bool {
    let plan = ctx.store.with_ref(record, |r| {
        if r.thumbnail_loaded || !r.info_loaded {
            return None;
        }
        if !ctx.config.generate_thumbnails || r.flags.contains(RecordFlags::ARCHIVED) {
            return Some(Plan::Skip);
        }
        // Sequences use their first discovered frame.
        let source = r.source_paths().into_iter().next()?;
        Some(Plan::Decode(PathBuf::from(source)))
    });
    let Some(Some(plan)) = plan else {
        return false;
    };

    let source = match plan {
        Plan::Skip => return mark_skipped(ctx, record),
        Plan::Decode(source) => source,
    };

    match std::fs::metadata(&source) {
        Ok(meta) if meta.len() >= ctx.config.max_thumbnail_source_bytes => {
            debug!("Source too large for a thumbnail: {}", source.display());
            return mark_skipped(ctx, record);
        }
        Ok(_) => {}
        Err(e) => {
            debug!("Cannot stat thumbnail source {}: {e}", source.display());
            return mark_skipped(ctx, record);
        }
    }

    match ctx.thumbnails.make_thumbnail(&source, ctx.config.thumbnail_size) {
        Ok(thumbnail) => {
            let background = ctx.thumbnails.average_color(&thumbnail);
            ctx.store.mutate_ref(record, ChangeKind::Thumbnail, |r| {
                r.thumbnail = Some(thumbnail);
                r.thumbnail_background = Some(background);
                r.thumbnail_loaded = true;
            })
        }
        Err(e) => {
            debug!("No thumbnail for {}: {e}", source.display());
            mark_skipped(ctx, record)
        }
    }
}

pub(crate) fn run(ctx: &WorkerContext, queue: &WorkQueue) {
    while let Some(batch) = queue.pop_batch(ctx.config.drain_batch) {
        let n = batch.len();
        for (record, _) in batch {
            process(ctx, &record);
        }
        queue.done(n);
    }
    debug!("Thumbnail worker exiting");
}
