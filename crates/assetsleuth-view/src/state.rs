/// List-view state management.
///
/// Centralises the mutable state a list widget reads: the visible ids of one
/// bucket, the scroll window and the selection. Store notifications arrive
/// over a channel and are applied in `process_events()`, which runs once per
/// frame. Records are never cached here; rows are ids that are re-resolved
/// against the store whenever they are painted.
use assetsleuth_core::filter::{FlagFilter, SortSpec};
use assetsleuth_core::model::BucketState;
use assetsleuth_core::{Browser, Record, RecordKind, RecordRef, StoreEvent};
use compact_str::CompactString;
use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// The current phase of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    /// Nothing opened yet.
    Idle,
    /// The bucket is being rebuilt; show a placeholder.
    Loading,
    /// Rows are live.
    Ready,
}

/// Maximum store events drained from the channel per frame.
///
/// A reset of a big folder followed by a burst of enrichment can queue
/// thousands of updates; the rest wait for the next frame.
pub const MAX_EVENTS_PER_FRAME: usize = 500;

/// Rows per page when no viewport size has been reported yet.
const DEFAULT_VIEWPORT_ROWS: usize = 40;

pub struct ListViewState {
    browser: Arc<Browser>,
    events: Receiver<StoreEvent>,

    // ── Bucket ─────────────────────────────────────────
    pub folder: CompactString,
    pub kind: RecordKind,
    pub phase: ViewPhase,
    /// Visible ids after filtering, in display order.
    pub rows: Vec<usize>,
    /// Error of the most recent reset, if it failed.
    pub last_error: Option<String>,

    // ── Viewport ───────────────────────────────────────
    /// Index into `rows` of the first painted row.
    pub scroll_offset: usize,
    pub viewport_rows: usize,

    // ── Selection ──────────────────────────────────────
    selected: Option<RecordRef>,

    // ── Bookkeeping ────────────────────────────────────
    /// Ids whose records changed since the last `take_updated()`.
    updated: BTreeSet<usize>,
    /// Set when an update may change which rows pass the filter.
    needs_refilter: bool,
    /// Updates dropped because their ref died in a reset.
    pub stale_events: u64,
}

impl ListViewState {
    /// Create the state and subscribe to the browser's store.
    pub fn new(browser: Arc<Browser>, kind: RecordKind) -> Self {
        let events = browser.subscribe();
        Self {
            browser,
            events,
            folder: CompactString::default(),
            kind,
            phase: ViewPhase::Idle,
            rows: Vec::new(),
            last_error: None,
            scroll_offset: 0,
            viewport_rows: DEFAULT_VIEWPORT_ROWS,
            selected: None,
            updated: BTreeSet::new(),
            needs_refilter: false,
            stale_events: 0,
        }
    }

    pub fn browser(&self) -> &Arc<Browser> {
        &self.browser
    }

    /// Open (or rescan) a folder. The reset runs synchronously; the rows
    /// are rebuilt when its events are processed.
    pub fn open_folder(&mut self, folder: &str) {
        if self.folder.as_str() != folder {
            self.selected = None;
            self.scroll_offset = 0;
        }
        self.folder = CompactString::new(folder);
        self.phase = ViewPhase::Loading;
        self.rows.clear();
        self.updated.clear();
        self.last_error = match self.browser.request_reset(folder) {
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to open {folder}: {e}");
                Some(e.to_string())
            }
        };
        self.process_events();
    }

    /// Switch between the flat and the collapsed bucket of the folder.
    pub fn set_kind(&mut self, kind: RecordKind) {
        if self.kind == kind {
            return;
        }
        self.kind = kind;
        self.selected = None;
        self.scroll_offset = 0;
        if self.phase == ViewPhase::Ready {
            self.refresh_rows();
        }
    }

    /// Drain pending store events. Called once per frame.
    ///
    /// Returns `true` if the UI should repaint.
    pub fn process_events(&mut self) -> bool {
        let mut repaint = false;
        let mut refresh = false;
        let mut drained = 0usize;

        while drained < MAX_EVENTS_PER_FRAME {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            drained += 1;
            match event {
                StoreEvent::ResetBegin { folder } if folder == self.folder => {
                    self.phase = ViewPhase::Loading;
                    self.rows.clear();
                    self.updated.clear();
                    refresh = false;
                    repaint = true;
                }
                StoreEvent::ResetEnd { folder } if folder == self.folder => {
                    self.phase = ViewPhase::Ready;
                    refresh = true;
                }
                StoreEvent::Reindexed { folder, kind }
                    if folder == self.folder && kind == self.kind =>
                {
                    if self.phase == ViewPhase::Ready {
                        refresh = true;
                    }
                }
                StoreEvent::RecordUpdated { record, .. }
                    if record.folder == self.folder && record.kind == self.kind =>
                {
                    // Resolve now: the ref may have died since it was sent.
                    match self.browser.store().resolve(&record) {
                        Some(id) => {
                            self.updated.insert(id);
                            self.needs_refilter = true;
                            repaint = true;
                        }
                        None => self.stale_events += 1,
                    }
                }
                _ => {}
            }
        }

        if self.needs_refilter && self.phase == ViewPhase::Ready {
            refresh = true;
        }
        if refresh {
            self.refresh_rows();
            repaint = true;
        }
        repaint
    }

    /// Re-fetch the visible ids and keep the selection and scroll window
    /// inside them.
    fn refresh_rows(&mut self) {
        self.needs_refilter = false;
        let before = self.rows.len();
        self.rows = self.browser.visible_ids(&self.folder, self.kind);
        let max_offset = self.rows.len().saturating_sub(1);
        self.scroll_offset = self.scroll_offset.min(max_offset);

        if let Some(selected) = &self.selected {
            if self.browser.store().resolve(selected).is_none() {
                self.selected = None;
            }
        }
        if before != self.rows.len() {
            debug!("{}/{}: {} visible rows", self.folder, self.kind, self.rows.len());
        }
        self.request_visible_enrichment();
    }

    // ── Viewport ───────────────────────────────────────

    /// Report which rows the widget is painting.
    pub fn set_viewport(&mut self, scroll_offset: usize, viewport_rows: usize) {
        self.scroll_offset = scroll_offset.min(self.rows.len().saturating_sub(1));
        self.viewport_rows = viewport_rows.max(1);
        self.request_visible_enrichment();
    }

    /// Positions into `rows` currently on screen.
    pub fn window(&self) -> Range<usize> {
        let start = self.scroll_offset.min(self.rows.len());
        let end = (start + self.viewport_rows).min(self.rows.len());
        start..end
    }

    /// Ask for the on-screen records to be enriched first. Ids are sent as
    /// contiguous runs. Returns how many records were queued.
    pub fn request_visible_enrichment(&self) -> usize {
        let mut ids: Vec<usize> = self.rows[self.window()].to_vec();
        ids.sort_unstable();
        let mut queued = 0;
        let mut i = 0;
        while i < ids.len() {
            let start = ids[i];
            let mut end = start + 1;
            while i + 1 < ids.len() && ids[i + 1] == end {
                end += 1;
                i += 1;
            }
            queued += self.browser.request_enrichment(&self.folder, self.kind, start..end);
            i += 1;
        }
        queued
    }

    /// Snapshots of the on-screen records. Rows that died since the last
    /// refresh are skipped.
    pub fn visible_records(&self) -> Vec<Record> {
        self.rows[self.window()]
            .iter()
            .filter_map(|&id| self.browser.get(&self.folder, self.kind, id).ok())
            .collect()
    }

    /// Ids updated since the last call.
    pub fn take_updated(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.updated).into_iter().collect()
    }

    // ── Selection ──────────────────────────────────────

    /// Select the record shown at `row`.
    pub fn select_row(&mut self, row: usize) {
        self.selected = self
            .rows
            .get(row)
            .and_then(|&id| self.browser.store().record_ref(&self.folder, self.kind, id).ok());
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Current id of the selection; follows the record across sorts.
    pub fn selected_id(&self) -> Option<usize> {
        self.selected
            .as_ref()
            .and_then(|r| self.browser.store().resolve(r))
    }

    /// Position of the selection in `rows`, if it passes the filter.
    pub fn selected_row(&self) -> Option<usize> {
        let id = self.selected_id()?;
        self.rows.iter().position(|&row| row == id)
    }

    // ── Filter and sort ────────────────────────────────

    pub fn set_text_query(&mut self, query: &str) {
        self.browser.set_text_query(query);
        self.refresh_if_ready();
    }

    pub fn set_flag_filter(&mut self, flag: FlagFilter, enabled: bool) {
        self.browser.set_flag_filter(flag, enabled);
        self.refresh_if_ready();
    }

    /// Re-sort; the rows follow when the `Reindexed` events are processed.
    pub fn set_sort(&mut self, spec: SortSpec) {
        if let Err(e) = self.browser.set_sort(spec) {
            warn!("Sort failed: {e}");
        }
        self.process_events();
    }

    fn refresh_if_ready(&mut self) {
        if self.phase == ViewPhase::Ready {
            self.refresh_rows();
        }
    }

    /// Bucket lifecycle, for a status line.
    pub fn bucket_state(&self) -> BucketState {
        self.browser.state(&self.folder, self.kind)
    }
}
