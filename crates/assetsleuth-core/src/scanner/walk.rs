/// Filesystem enumeration for the two listing kinds.
///
/// Task folders are walked recursively with `jwalk`'s rayon-backed parallel
/// traversal. Asset listings only look at the immediate children of the
/// location. Paths are normalised to `/` separators here and stay that way
/// for the rest of the crate.
use super::ScanOptions;
use crate::error::ScanError;
use compact_str::CompactString;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// Name fragment of Windows thumbnail caches, never listed.
const THUMBS_DB: &str = "thumbs.db";

/// A regular file found below a task folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkedFile {
    /// Full path with `/` separators.
    pub path: String,
    /// Directory of the file relative to the walk root, `""` at the top.
    pub subfolder: CompactString,
}

/// An asset directory directly below a location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkedAsset {
    pub path: String,
    pub name: CompactString,
}

pub(crate) fn normalise(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn extension_allowed(name: &str, options: &ScanOptions) -> bool {
    let Some(valid) = &options.valid_extensions else {
        return true;
    };
    let ext = name.rsplit('.').next().unwrap_or_default();
    valid.iter().any(|v| v.eq_ignore_ascii_case(ext))
}

/// Recursively list the regular files below `root`.
///
/// Hidden entries and thumbnail caches are skipped, symlinks are not
/// followed. Unreadable directories are logged and skipped. Stops after
/// `options.max_items` files.
pub fn walk_files(root: &Path, options: &ScanOptions) -> Result<Vec<WalkedFile>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root.to_path_buf()));
    }
    let start = Instant::now();
    let root_str = normalise(root);
    let root_prefix = root_str.trim_end_matches('/');

    let walker = jwalk::WalkDir::new(root)
        .skip_hidden(options.skip_hidden)
        .follow_links(false)
        .sort(true)
        .parallelism(jwalk::Parallelism::RayonNewPool(num_cpus::get()));

    let mut files = Vec::new();
    let mut error_count: u64 = 0;

    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                error_count += 1;
                let path = err.path().map(normalise).unwrap_or_default();
                warn!("Skipping unreadable entry {path}: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if options.skip_hidden && is_hidden(&name) {
            continue;
        }
        if name.to_lowercase().contains(THUMBS_DB) {
            continue;
        }
        if !extension_allowed(&name, options) {
            continue;
        }
        if files.len() >= options.max_items {
            debug!("Item cap of {} reached in {root_str}", options.max_items);
            break;
        }

        let path = normalise(&entry.path());
        let relative = path
            .strip_prefix(root_prefix)
            .unwrap_or(&path)
            .trim_start_matches('/');
        let subfolder = relative.rsplit_once('/').map_or("", |(dir, _)| dir);

        files.push(WalkedFile {
            subfolder: CompactString::new(subfolder),
            path,
        });
    }

    debug!(
        "Walked {root_str}: {} files, {error_count} errors in {:?}",
        files.len(),
        start.elapsed()
    );
    Ok(files)
}

/// List the asset directories directly below `root`.
///
/// When `options.asset_identifier` is set, only directories containing a
/// file of that name count as assets.
pub fn list_assets(root: &Path, options: &ScanOptions) -> Result<Vec<WalkedAsset>, ScanError> {
    let read_dir = std::fs::read_dir(root).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ScanError::MissingRoot(root.to_path_buf()),
        _ => ScanError::Io {
            path: root.to_path_buf(),
            source,
        },
    })?;

    let mut assets = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!("Skipping unreadable entry in {}: {err}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if options.skip_hidden && is_hidden(&name) {
            continue;
        }
        let dir = entry.path();
        if let Some(identifier) = &options.asset_identifier {
            if !dir.join(identifier).exists() {
                continue;
            }
        }
        if assets.len() >= options.max_items {
            break;
        }
        assets.push(WalkedAsset {
            path: normalise(&dir),
            name: CompactString::new(name),
        });
    }
    assets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // Default temp dirs start with a dot, which the walker treats as hidden.
    fn tempdir() -> tempfile::TempDir {
        tempfile::Builder::new().prefix("walk").tempdir().unwrap()
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let options = ScanOptions {
            valid_extensions: Some(vec!["exr".into(), "ma".into()]),
            ..ScanOptions::default()
        };
        assert!(extension_allowed("plate.EXR", &options));
        assert!(extension_allowed("scene.ma", &options));
        assert!(!extension_allowed("notes.txt", &options));
        assert!(extension_allowed("notes.txt", &ScanOptions::default()));
    }

    #[test]
    fn walk_skips_hidden_and_thumbs() {
        let tmp = tempdir();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::write(tmp.path().join(".hidden"), "h").unwrap();
        fs::write(tmp.path().join("Thumbs.db"), "t").unwrap();
        fs::write(tmp.path().join("sub/b.txt"), "b").unwrap();

        let files = walk_files(tmp.path(), &ScanOptions::default()).unwrap();
        let mut names: Vec<&str> = files
            .iter()
            .map(|f| f.path.rsplit('/').next().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        let nested = files.iter().find(|f| f.path.ends_with("b.txt")).unwrap();
        assert_eq!(nested.subfolder, "sub");
    }

    #[test]
    fn walk_missing_root_is_an_error() {
        let tmp = tempdir();
        let missing = tmp.path().join("nope");
        assert!(matches!(
            walk_files(&missing, &ScanOptions::default()),
            Err(ScanError::MissingRoot(_))
        ));
    }

    #[test]
    fn assets_require_identifier_when_configured() {
        let tmp = tempdir();
        fs::create_dir_all(tmp.path().join("hero_char")).unwrap();
        fs::create_dir_all(tmp.path().join("scratch")).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("hero_char/workspace.mel"), "").unwrap();

        let all = list_assets(tmp.path(), &ScanOptions::default()).unwrap();
        let names: Vec<&str> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["hero_char", "scratch"]);

        let options = ScanOptions {
            asset_identifier: Some("workspace.mel".into()),
            ..ScanOptions::default()
        };
        let tagged = list_assets(tmp.path(), &options).unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].name, "hero_char");
    }
}
