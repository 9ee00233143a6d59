/// The browser facade: one location, its record store and everything that
/// feeds or projects it.
///
/// A view layer talks only to [`Browser`]. Resets run synchronously on the
/// calling thread; enrichment runs on the pipeline's workers and shows up as
/// [`StoreEvent`]s on the receiver returned by [`Browser::subscribe`].
use crate::collab::{BookmarkDb, Table, ThumbnailCache, DESCRIPTION_KEY, FLAGS_KEY};
use crate::config::{BrowserConfig, Settings, KEY_ACTIVE_ASSET, KEY_ACTIVE_FILE, KEY_TEXT_FILTER};
use crate::error::{BrowserError, ConfigError, ScanError};
use crate::filter::{FilterSortEngine, FlagFilter, SortSpec};
use crate::model::{
    BucketState, ChangeKind, Record, RecordFlags, RecordKind, RecordRef, RecordStore,
    StoreEvent,
};
use crate::pipeline::{EnrichmentPipeline, PipelineStats};
use crate::scanner::{self, ScanContext, ScanOptions, ScanOutput, ASSET_FOLDER};
use compact_str::CompactString;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde_json::Value;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Positional address of the listing: `server/job/root`, plus the asset
/// whose task folders are browsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub server: String,
    pub job: String,
    pub root: String,
    pub asset: Option<String>,
}

impl Location {
    pub fn new(server: impl Into<String>, job: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            job: job.into(),
            root: root.into(),
            asset: None,
        }
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    /// Directory holding the assets.
    pub fn root_path(&self) -> PathBuf {
        Path::new(&self.server).join(&self.job).join(&self.root)
    }

    /// Directory scanned for `folder`: the root itself for the asset
    /// listing, `root/asset/folder` for a task folder.
    pub fn folder_path(&self, folder: &str) -> PathBuf {
        let root = self.root_path();
        if folder == ASSET_FOLDER {
            return root;
        }
        match &self.asset {
            Some(asset) => root.join(asset).join(folder),
            None => root.join(folder),
        }
    }

    /// Parent segments records of `folder` inherit.
    fn parent_segments(&self, folder: &str) -> Vec<CompactString> {
        let mut segments = vec![
            CompactString::new(&self.server),
            CompactString::new(&self.job),
            CompactString::new(&self.root),
        ];
        if folder != ASSET_FOLDER {
            if let Some(asset) = &self.asset {
                segments.push(CompactString::new(asset));
            }
        }
        segments
    }
}

pub struct Browser {
    location: Location,
    config: BrowserConfig,
    scan_options: ScanOptions,
    store: Arc<RecordStore>,
    engine: FilterSortEngine,
    pipeline: EnrichmentPipeline,
    db: Arc<dyn BookmarkDb>,
    settings: Settings,
    /// Folders reset at least once, for re-sorting on a sort change.
    folders: Mutex<Vec<CompactString>>,
}

impl Browser {
    /// Build the browser and start its workers. Filter and sort state is
    /// restored from `settings`.
    pub fn new(
        location: Location,
        config: BrowserConfig,
        db: Arc<dyn BookmarkDb>,
        thumbnails: Arc<dyn ThumbnailCache>,
        settings: Settings,
    ) -> Self {
        let store = Arc::new(RecordStore::new());
        let pipeline = EnrichmentPipeline::start(
            Arc::clone(&store),
            Arc::clone(&db),
            thumbnails,
            config.pipeline(),
        );

        let engine = FilterSortEngine::new();
        if let Some(text) = settings.get_str(KEY_TEXT_FILTER) {
            engine.set_text_query(&text);
        }
        let flags = settings.flag_filters();
        engine.set_flag_filter(FlagFilter::Active, flags.active);
        engine.set_flag_filter(FlagFilter::Archived, flags.archived);
        engine.set_flag_filter(FlagFilter::Favourite, flags.favourite);
        engine.set_sort(settings.sort());

        info!("Browser opened at {}", location.root_path().display());
        Self {
            scan_options: config.scan_options(),
            location,
            config,
            store,
            engine,
            pipeline,
            db,
            settings,
            folders: Mutex::new(Vec::new()),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &FilterSortEngine {
        &self.engine
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.store.subscribe()
    }

    // ── Reset ────────────────────────────────────────────────────────────

    /// Rescan `folder` and rebuild both of its buckets.
    ///
    /// Pending enrichment for the folder is discarded first. On a scan
    /// failure the buckets end up live and empty and the error is returned.
    /// Returns the number of files (or assets) listed.
    pub fn request_reset(&self, folder: &str) -> Result<usize, BrowserError> {
        let start = Instant::now();
        self.pipeline.discard(folder);
        self.store.begin_reset(folder);

        let (output, error) = match self.scan(folder) {
            Ok(output) => (output, None),
            Err(e) => {
                warn!("Scan of {folder} failed: {e}");
                (ScanOutput::default(), Some(e))
            }
        };

        // A rejected record is left out; the bracket is always closed.
        let ScanOutput { files, sequences } = output;
        let mut count = 0;
        for (kind, records) in [(RecordKind::File, files), (RecordKind::Sequence, sequences)] {
            let mut next_id = 0;
            for record in records {
                match self.store.upsert(folder, kind, next_id, record) {
                    Ok(()) => next_id += 1,
                    Err(e) => warn!("Dropped a record of {folder}/{kind}: {e}"),
                }
            }
            if kind == RecordKind::File {
                count = next_id;
            }
        }
        self.store.end_reset(folder)?;

        for kind in RecordKind::ALL {
            self.engine.apply_sort(&self.store, folder, kind)?;
        }
        {
            let mut folders = self.folders.lock();
            if !folders.iter().any(|f| f.as_str() == folder) {
                folders.push(CompactString::new(folder));
            }
        }

        if let Some(e) = error {
            return Err(e.into());
        }
        if self.config.deep_scan {
            self.pipeline.deep_scan(folder);
        }
        info!("Reset {folder}: {count} items in {:?}", start.elapsed());
        Ok(count)
    }

    fn scan(&self, folder: &str) -> Result<ScanOutput, ScanError> {
        let root = self.location.folder_path(folder);
        let parent = self.location.parent_segments(folder);
        let favourites = self.settings.favourites();
        let is_assets = folder == ASSET_FOLDER;
        let active = self
            .settings
            .get_str(if is_assets { KEY_ACTIVE_ASSET } else { KEY_ACTIVE_FILE });
        let ctx = ScanContext {
            root: &root,
            parent_path: &parent,
            favourites: &favourites,
            active: active.as_deref(),
        };
        if is_assets {
            scanner::scan_assets(ctx, &self.scan_options)
        } else {
            scanner::scan_task_folder(ctx, folder, &self.scan_options)
        }
    }

    // ── Filtering and sorting ────────────────────────────────────────────

    pub fn set_text_query(&self, query: &str) {
        self.engine.set_text_query(query);
        self.settings.set(KEY_TEXT_FILTER, Value::String(query.to_owned()));
    }

    pub fn set_flag_filter(&self, flag: FlagFilter, enabled: bool) {
        self.engine.set_flag_filter(flag, enabled);
        self.settings.set_flag_filter(flag, enabled);
    }

    /// Change the sort and re-sort every known folder.
    pub fn set_sort(&self, spec: SortSpec) -> Result<(), BrowserError> {
        if !self.engine.set_sort(spec) {
            return Ok(());
        }
        self.settings.set_sort(spec);
        self.resort()
    }

    /// Re-apply the current sort to every known folder, e.g. once
    /// enrichment has filled in sizes and dates.
    pub fn resort(&self) -> Result<(), BrowserError> {
        let folders = self.folders.lock().clone();
        for folder in &folders {
            for kind in RecordKind::ALL {
                self.engine.apply_sort(&self.store, folder, kind)?;
            }
        }
        Ok(())
    }

    pub fn visible_ids(&self, folder: &str, kind: RecordKind) -> Vec<usize> {
        self.engine.visible_ids(&self.store, folder, kind)
    }

    pub fn get(&self, folder: &str, kind: RecordKind, id: usize) -> Result<Record, BrowserError> {
        Ok(self.store.get(folder, kind, id)?)
    }

    pub fn state(&self, folder: &str, kind: RecordKind) -> BucketState {
        self.store.state(folder, kind)
    }

    // ── Enrichment ───────────────────────────────────────────────────────

    /// Ask for the records of a visible id range to be enriched first.
    pub fn request_enrichment(&self, folder: &str, kind: RecordKind, ids: Range<usize>) -> usize {
        self.pipeline.request_visible(folder, kind, ids)
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pipeline.wait_idle(timeout)
    }

    // ── User edits ───────────────────────────────────────────────────────

    /// Toggle one flag on a record and persist it.
    ///
    /// Favourite and archived go to the bookmark database (favourites also
    /// to the settings list). Active is exclusive within the bucket and is
    /// stored in the settings. The record with the same path in the
    /// folder's other bucket is updated too.
    pub fn set_record_flag(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
        flag: RecordFlags,
        enabled: bool,
    ) -> Result<(), BrowserError> {
        let record = self.store.get(folder, kind, id)?;

        if flag == RecordFlags::ACTIVE {
            return self.set_active(folder, &record, enabled);
        }
        if flag != RecordFlags::FAVOURITE && flag != RecordFlags::ARCHIVED {
            return Err(BrowserError::UnsupportedFlag(flag));
        }

        let mut flags = record.flags;
        flags.set(flag, enabled);
        let persisted = flags & (RecordFlags::FAVOURITE | RecordFlags::ARCHIVED);
        let mut txn = self.db.transaction()?;
        txn.set(
            &record.path,
            FLAGS_KEY,
            Value::from(persisted.bits()),
            Table::Data,
        )?;
        txn.commit()?;
        if flag == RecordFlags::FAVOURITE {
            self.settings.set_favourite(&record.path, enabled);
        }

        for target in self.locate(folder, &record.full_path) {
            self.store
                .mutate_ref(&target, ChangeKind::Flags, |r| r.flags.set(flag, enabled));
        }
        Ok(())
    }

    fn set_active(&self, folder: &str, record: &Record, enabled: bool) -> Result<(), BrowserError> {
        for target in self.locate(folder, &record.full_path) {
            // Resolve again: the bucket may have been re-sorted meanwhile.
            if let Some(id) = self.store.resolve(&target) {
                self.store.set_active(folder, target.kind, enabled.then_some(id))?;
            }
        }
        let key = if folder == ASSET_FOLDER {
            KEY_ACTIVE_ASSET
        } else {
            KEY_ACTIVE_FILE
        };
        if enabled {
            let value = if folder == ASSET_FOLDER {
                record.edit_name.to_string()
            } else {
                record.path.clone()
            };
            self.settings.set(key, Value::String(value));
        } else {
            self.settings.remove(key);
        }
        Ok(())
    }

    /// Replace a record's description and persist it.
    pub fn set_description(
        &self,
        folder: &str,
        kind: RecordKind,
        id: usize,
        description: &str,
    ) -> Result<(), BrowserError> {
        let record = self.store.get(folder, kind, id)?;
        let mut txn = self.db.transaction()?;
        txn.set(
            &record.path,
            DESCRIPTION_KEY,
            Value::String(description.to_owned()),
            Table::Data,
        )?;
        txn.commit()?;

        for target in self.locate(folder, &record.full_path) {
            self.store.mutate_ref(&target, ChangeKind::Description, |r| {
                r.description = description.to_owned();
            });
        }
        Ok(())
    }

    /// Refs to every record of `folder` with this path, one per bucket.
    fn locate(&self, folder: &str, full_path: &str) -> Vec<RecordRef> {
        RecordKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let id = self.store.read_bucket(folder, kind, |view| {
                    (0..view.len()).find(|&id| view.record(id).full_path == full_path)
                })?;
                self.store.record_ref(folder, kind, id).ok()
            })
            .collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Stop the workers and flush the settings. Safe to call twice.
    pub fn shutdown(&self) -> Result<(), ConfigError> {
        self.pipeline.shutdown();
        self.settings.save()
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to save settings: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_paths_follow_location() {
        let location = Location::new("/srv", "job", "assets").with_asset("hero");
        assert_eq!(location.folder_path("."), PathBuf::from("/srv/job/assets"));
        assert_eq!(
            location.folder_path("scenes"),
            PathBuf::from("/srv/job/assets/hero/scenes")
        );
        assert_eq!(location.parent_segments(".").len(), 3);
        assert_eq!(location.parent_segments("scenes").len(), 4);
    }
}
