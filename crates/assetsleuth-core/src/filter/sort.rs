/// Bucket ordering by one sort role.
///
/// The sort is stable and ties always fall back to the current id, so
/// sorting an already sorted bucket is a no-op and repeated scans give the
/// same order.
use crate::model::{BucketView, Record};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Buckets at least this large are sorted on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4_096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortRole {
    #[default]
    Name,
    Modified,
    Size,
}

impl SortRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Modified => "modified",
            Self::Size => "size",
        }
    }
}

impl fmt::Display for SortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub role: SortRole,
    pub descending: bool,
}

fn compare(role: SortRole, a: &Record, b: &Record) -> Ordering {
    match role {
        SortRole::Name => a.sort_keys.by_name.cmp(&b.sort_keys.by_name),
        SortRole::Modified => a.sort_keys.by_mtime.cmp(&b.sort_keys.by_mtime),
        SortRole::Size => a.sort_keys.by_size.cmp(&b.sort_keys.by_size),
    }
}

/// Ordering of the bucket's current ids under `spec`: `result[new_id]` is
/// the id now holding that position.
pub fn ordering(view: &BucketView<'_>, spec: SortSpec) -> Vec<usize> {
    let n = view.len();
    let records: Vec<_> = (0..n).map(|id| view.record(id)).collect();

    let cmp = |&a: &usize, &b: &usize| {
        let by_key = compare(spec.role, &records[a], &records[b]);
        let by_key = if spec.descending {
            by_key.reverse()
        } else {
            by_key
        };
        by_key.then(a.cmp(&b))
    };

    let mut ids: Vec<usize> = (0..n).collect();
    if n >= PARALLEL_THRESHOLD {
        ids.par_sort_by(cmp);
    } else {
        ids.sort_by(cmp);
    }
    ids
}
