/// Filter and sort engine: projects a bucket into the ordered list of ids the
/// view shows.
///
/// The engine owns no records. It keeps the current text query, the flag
/// toggles and the sort spec, and evaluates them against the store on
/// demand. Sorting is applied to the store itself through
/// [`RecordStore::reorder`], so ids stay dense and match what the view sees.
pub mod query;
pub mod sort;

use crate::error::StoreError;
use crate::model::{BucketView, Record, RecordFlags, RecordKind, RecordStore};
use parking_lot::RwLock;
use query::Query;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use sort::{SortRole, SortSpec};

/// Buckets at least this large are filtered on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4_096;

/// The three user-facing flag toggles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagFilter {
    /// Show only the active record.
    Active,
    /// Include archived records.
    Archived,
    /// Show only favourites.
    Favourite,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagFilters {
    pub active: bool,
    pub archived: bool,
    pub favourite: bool,
}

impl FlagFilters {
    pub fn get(&self, flag: FlagFilter) -> bool {
        match flag {
            FlagFilter::Active => self.active,
            FlagFilter::Archived => self.archived,
            FlagFilter::Favourite => self.favourite,
        }
    }

    pub fn set(&mut self, flag: FlagFilter, enabled: bool) {
        match flag {
            FlagFilter::Active => self.active = enabled,
            FlagFilter::Archived => self.archived = enabled,
            FlagFilter::Favourite => self.favourite = enabled,
        }
    }

    /// Precedence: the active toggle overrides everything, then archived
    /// records are hidden unless asked for, then the favourite toggle.
    pub fn admits(&self, flags: RecordFlags) -> bool {
        if self.active {
            return flags.contains(RecordFlags::ACTIVE);
        }
        if flags.contains(RecordFlags::ARCHIVED) && !self.archived {
            return false;
        }
        !(self.favourite && !flags.contains(RecordFlags::FAVOURITE))
    }
}

#[derive(Debug, Default)]
struct FilterState {
    raw_query: String,
    query: Query,
    flags: FlagFilters,
    sort: SortSpec,
}

#[derive(Debug, Default)]
pub struct FilterSortEngine {
    state: RwLock<FilterState>,
}

impl FilterSortEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new text query. Parsing never fails.
    pub fn set_text_query(&self, raw: &str) {
        let mut state = self.state.write();
        if state.raw_query == raw {
            return;
        }
        state.raw_query = raw.to_owned();
        state.query = Query::parse(raw);
        debug!("Text filter set to {raw:?}");
    }

    pub fn text_query(&self) -> String {
        self.state.read().raw_query.clone()
    }

    pub fn set_flag_filter(&self, flag: FlagFilter, enabled: bool) {
        self.state.write().flags.set(flag, enabled);
    }

    pub fn flag_filters(&self) -> FlagFilters {
        self.state.read().flags
    }

    /// Returns `true` when the spec changed and the buckets need re-sorting.
    pub fn set_sort(&self, spec: SortSpec) -> bool {
        let mut state = self.state.write();
        let changed = state.sort != spec;
        state.sort = spec;
        changed
    }

    pub fn sort(&self) -> SortSpec {
        self.state.read().sort
    }

    /// Whether one record passes the text query and the flag toggles.
    pub fn accepts(&self, record: &Record) -> bool {
        let state = self.state.read();
        accepts(&state.query, state.flags, record)
    }

    /// Ids of the bucket that pass the current filters, in id order.
    pub fn visible_ids(&self, store: &RecordStore, folder: &str, kind: RecordKind) -> Vec<usize> {
        let (query, flags) = {
            let state = self.state.read();
            (state.query.clone(), state.flags)
        };
        store.read_bucket(folder, kind, |view| filter_view(view, &query, flags))
    }

    /// Re-sort one bucket by the current sort spec. A bucket that is not
    /// live is left alone.
    pub fn apply_sort(
        &self,
        store: &RecordStore,
        folder: &str,
        kind: RecordKind,
    ) -> Result<(), StoreError> {
        let spec = self.sort();
        let applied = store.reorder(folder, kind, |view| sort::ordering(view, spec))?;
        if applied {
            debug!("Sorted {folder}/{kind} by {} (descending: {})", spec.role, spec.descending);
        }
        Ok(())
    }
}

fn accepts(query: &Query, flags: FlagFilters, record: &Record) -> bool {
    if !query.is_empty() && !query.matches(&record.searchable_text()) {
        return false;
    }
    flags.admits(record.flags)
}

fn filter_view(view: &BucketView<'_>, query: &Query, flags: FlagFilters) -> Vec<usize> {
    let passes = |id: usize| accepts(query, flags, &view.record(id));
    if view.len() >= PARALLEL_THRESHOLD {
        (0..view.len()).into_par_iter().filter(|&id| passes(id)).collect()
    } else {
        (0..view.len()).filter(|&id| passes(id)).collect()
    }
}
