/// Scanner module: turns a folder on disk into the bare records of its two
/// buckets.
///
/// - [`walk`] enumerates the filesystem (`jwalk` for task folders, one
///   `read_dir` for asset listings).
/// - [`sequence`] collapses numbered frames into sequences.
///
/// Scanning is synchronous. The browser runs it inside the store's reset
/// bracket so that readers never observe a half-built listing.
pub mod sequence;
pub mod walk;

use crate::error::ScanError;
use crate::model::{Record, RecordFlags, RecordKind};
use compact_str::CompactString;
use sequence::Grouped;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Folder key addressing the asset-level listing of a location.
pub const ASSET_FOLDER: &str = ".";

/// Listing cap used when none is configured.
pub const DEFAULT_MAX_ITEMS: usize = 999_999;

/// Knobs for one scan.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// Skip entries whose name starts with `.`.
    pub skip_hidden: bool,
    /// Extensions allowed in task folders; `None` allows everything.
    pub valid_extensions: Option<Vec<String>>,
    /// Maximum number of files (or assets) listed.
    pub max_items: usize,
    /// File name that marks a directory as an asset.
    pub asset_identifier: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            valid_extensions: None,
            max_items: DEFAULT_MAX_ITEMS,
            asset_identifier: None,
        }
    }
}

/// Everything a scan needs besides the options.
#[derive(Clone, Copy, Debug)]
pub struct ScanContext<'a> {
    /// Directory the listing is made of.
    pub root: &'a Path,
    /// Positional parent segments the records inherit.
    pub parent_path: &'a [CompactString],
    /// Favourited paths or sequence keys.
    pub favourites: &'a HashSet<String>,
    /// Name (assets) or path (files) of the active item.
    pub active: Option<&'a str>,
}

/// Bare records for both buckets of a folder, in initial (name) order.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub files: Vec<Record>,
    pub sequences: Vec<Record>,
}

/// Beautified asset name: runs of `_` become single spaces.
pub fn asset_display_name(name: &str) -> CompactString {
    let mut out = CompactString::default();
    let mut last_underscore = false;
    for ch in name.trim_matches('_').chars() {
        if ch == '_' {
            if !last_underscore {
                out.push(' ');
            }
            last_underscore = true;
        } else {
            out.push(ch);
            last_underscore = false;
        }
    }
    out
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Scan the asset directories of a location. Both buckets get the same
/// records; assets never form sequences.
pub fn scan_assets(ctx: ScanContext<'_>, options: &ScanOptions) -> Result<ScanOutput, ScanError> {
    let assets = walk::list_assets(ctx.root, options)?;
    let mut records = Vec::with_capacity(assets.len());
    for asset in assets {
        let display = asset_display_name(&asset.name);
        let mut record = Record::new(RecordKind::File, asset.path, display);
        record.parent_path = ctx.parent_path.to_vec();
        record.parent_path.push(asset.name.clone());
        if ctx.favourites.contains(&record.path) {
            record.flags |= RecordFlags::FAVOURITE;
        }
        if ctx.active == Some(asset.name.as_str()) {
            record.flags |= RecordFlags::ACTIVE;
        }
        records.push(record);
    }
    drop_duplicate_paths(&mut records);
    info!("Listed {} assets in {}", records.len(), ctx.root.display());
    Ok(ScanOutput {
        sequences: records.clone(),
        files: records,
    })
}

/// Keep the first record for each lower-cased path. Names differing only
/// by case are distinct on disk but share a store key.
fn drop_duplicate_paths(records: &mut Vec<Record>) {
    let mut seen: HashSet<CompactString> = HashSet::with_capacity(records.len());
    records.retain(|record| {
        let fresh = seen.insert(record.full_path.clone());
        if !fresh {
            warn!("Skipping {}: its path collides with another item", record.path);
        }
        fresh
    });
}

/// Scan a task folder recursively and build both of its buckets.
pub fn scan_task_folder(
    ctx: ScanContext<'_>,
    folder: &str,
    options: &ScanOptions,
) -> Result<ScanOutput, ScanError> {
    let walked = walk::walk_files(ctx.root, options)?;
    let root_prefix = walk::normalise(ctx.root);
    let root_prefix = root_prefix.trim_end_matches('/');

    let parent_for = |path: &str| -> Vec<CompactString> {
        let relative = path.strip_prefix(root_prefix).unwrap_or(path).trim_start_matches('/');
        let subfolder = relative.rsplit_once('/').map_or("", |(dir, _)| dir);
        let mut parent = ctx.parent_path.to_vec();
        parent.push(CompactString::new(folder));
        parent.push(CompactString::new(subfolder));
        parent
    };
    let is_active = |path: &str| ctx.active == Some(path);

    // File bucket: every file on its own.
    let mut files: Vec<Record> = walked
        .iter()
        .map(|file| {
            let mut record = Record::new(
                RecordKind::File,
                file.path.clone(),
                CompactString::new(basename(&file.path)),
            );
            record.sequence = sequence::split(&file.path);
            let key = record.sequence.as_ref().map(sequence::sequence_key);
            if ctx.favourites.contains(&file.path)
                || key.is_some_and(|k| ctx.favourites.contains(&k))
            {
                record.flags |= RecordFlags::FAVOURITE;
            }
            if is_active(&file.path) {
                record.flags |= RecordFlags::ACTIVE;
            }
            record.parent_path = parent_for(&file.path);
            record
        })
        .collect();
    files.sort_by(|a, b| {
        a.sort_keys
            .by_name
            .cmp(&b.sort_keys.by_name)
            .then_with(|| a.path.cmp(&b.path))
    });
    drop_duplicate_paths(&mut files);

    // Sequence bucket: the collapsed view.
    let grouped = sequence::group(walked.iter().map(|f| f.path.as_str()));
    let sequences: Vec<Record> = grouped
        .into_iter()
        .map(|entry| match entry {
            Grouped::Single { path, parts } => {
                let name = CompactString::new(basename(&path));
                let mut record = Record::new(RecordKind::File, path, name);
                record.sequence = parts;
                if ctx.favourites.contains(&record.path) {
                    record.flags |= RecordFlags::FAVOURITE;
                }
                if is_active(&record.path) {
                    record.flags |= RecordFlags::ACTIVE;
                }
                record.parent_path = parent_for(&record.path);
                record
            }
            Grouped::Sequence { key, parts, frames } => {
                let parent_path = parent_for(&key);
                let name = CompactString::new(basename(&key));
                // by_name comes from the key, not from any member frame.
                let mut record = Record::new(RecordKind::Sequence, key, name);
                if ctx.favourites.contains(&record.path) {
                    record.flags |= RecordFlags::FAVOURITE;
                }
                if is_active(&record.path) {
                    record.flags |= RecordFlags::ACTIVE;
                }
                record.sequence = Some(parts);
                record.frames = frames;
                record.parent_path = parent_path;
                record
            }
        })
        .collect();

    info!(
        "Scanned {}: {} files, {} collapsed items",
        ctx.root.display(),
        files.len(),
        sequences.len()
    );
    Ok(ScanOutput { files, sequences })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempdir() -> tempfile::TempDir {
        tempfile::Builder::new().prefix("scan").tempdir().unwrap()
    }

    #[test]
    fn asset_names_are_beautified() {
        assert_eq!(asset_display_name("hero__char_v2"), "hero char v2");
        assert_eq!(asset_display_name("_prop_"), "prop");
        assert_eq!(asset_display_name("plain"), "plain");
    }

    #[test]
    fn favourites_match_file_or_sequence_key() {
        let tmp = tempdir();
        for name in ["a_0001.exr", "a_0002.exr", "notes.txt"] {
            fs::write(tmp.path().join(name), "x").unwrap();
        }
        let root = walk::normalise(tmp.path());
        let favourites: HashSet<String> = [format!("{root}/a_[0].exr")].into_iter().collect();
        let parent = [CompactString::new("srv")];
        let ctx = ScanContext {
            root: tmp.path(),
            parent_path: &parent,
            favourites: &favourites,
            active: None,
        };

        let out = scan_task_folder(ctx, "renders", &ScanOptions::default()).unwrap();

        let fav_files = out
            .files
            .iter()
            .filter(|r| r.flags.contains(RecordFlags::FAVOURITE))
            .count();
        assert_eq!(fav_files, 2, "both frames inherit the sequence favourite");

        let seq = &out.sequences[0];
        assert_eq!(seq.kind, RecordKind::Sequence);
        assert!(seq.flags.contains(RecordFlags::FAVOURITE));
        assert_eq!(seq.parent_path, vec!["srv", "renders", ""]);
    }

    #[test]
    fn active_asset_is_flagged() {
        let tmp = tempdir();
        fs::create_dir_all(tmp.path().join("hero_char")).unwrap();
        fs::create_dir_all(tmp.path().join("villain")).unwrap();
        let favourites = HashSet::new();
        let ctx = ScanContext {
            root: tmp.path(),
            parent_path: &[],
            favourites: &favourites,
            active: Some("villain"),
        };
        let out = scan_assets(ctx, &ScanOptions::default()).unwrap();
        assert_eq!(out.files.len(), 2);
        assert_eq!(out.files[0].display_name, "hero char");
        assert!(out.files[1].flags.contains(RecordFlags::ACTIVE));
        assert_eq!(out.sequences.len(), 2);
    }
}
