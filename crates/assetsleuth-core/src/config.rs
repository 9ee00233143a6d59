/// Browser configuration and the persisted settings context.
///
/// [`BrowserConfig`] holds the engine knobs and is read once at startup.
/// [`Settings`] is the mutable key/value store for user state (filters,
/// sort, active and favourite items); the browser writes to it as the user
/// acts and flushes it on shutdown.
use crate::error::ConfigError;
use crate::filter::{FlagFilter, FlagFilters, SortRole, SortSpec};
use crate::pipeline::PipelineConfig;
use crate::scanner::{ScanOptions, DEFAULT_MAX_ITEMS};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}

// ── Engine configuration ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub info_workers: usize,
    pub thumbnail_workers: usize,
    pub drain_batch: usize,
    pub thumbnail_size: u32,
    pub generate_thumbnails: bool,
    /// Enrich whole folders in the background after each reset.
    pub deep_scan: bool,
    pub deep_scan_chunk: usize,
    pub max_items: usize,
    /// Lower-case extensions allowed in task folders; `None` allows all.
    pub valid_extensions: Option<Vec<String>>,
    /// File name marking a directory as an asset.
    pub asset_identifier: Option<String>,
    pub max_thumbnail_source_bytes: u64,
    /// Defaults to a directory under the system temp dir.
    pub thumbnail_cache_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        let pipeline = PipelineConfig::default();
        Self {
            info_workers: (cpus / 2).clamp(1, 8),
            thumbnail_workers: (cpus / 2).clamp(1, 8),
            drain_batch: pipeline.drain_batch,
            thumbnail_size: pipeline.thumbnail_size,
            generate_thumbnails: pipeline.generate_thumbnails,
            deep_scan: true,
            deep_scan_chunk: pipeline.deep_scan_chunk,
            max_items: DEFAULT_MAX_ITEMS,
            valid_extensions: None,
            asset_identifier: None,
            max_thumbnail_source_bytes: pipeline.max_thumbnail_source_bytes,
            thumbnail_cache_dir: None,
        }
    }
}

impl BrowserConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_json(path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, writing the defaults there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(path, self)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            info_workers: self.info_workers.max(1),
            thumbnail_workers: self.thumbnail_workers.max(1),
            drain_batch: self.drain_batch.max(1),
            deep_scan_chunk: self.deep_scan_chunk.max(1),
            thumbnail_size: self.thumbnail_size.max(1),
            generate_thumbnails: self.generate_thumbnails,
            max_thumbnail_source_bytes: self.max_thumbnail_source_bytes,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            valid_extensions: self
                .valid_extensions
                .as_ref()
                .map(|exts| exts.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect()),
            max_items: self.max_items,
            asset_identifier: self.asset_identifier.clone(),
            ..ScanOptions::default()
        }
    }

    pub fn thumbnail_cache_dir(&self) -> PathBuf {
        self.thumbnail_cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("assetsleuth-thumbnails"))
    }
}

// ── Settings context ──────────────────────────────────────────────────────

pub const KEY_TEXT_FILTER: &str = "filter.text";
pub const KEY_FILTER_ACTIVE: &str = "filter.active";
pub const KEY_FILTER_ARCHIVED: &str = "filter.archived";
pub const KEY_FILTER_FAVOURITE: &str = "filter.favourite";
pub const KEY_SORT_ROLE: &str = "sort.role";
pub const KEY_SORT_DESCENDING: &str = "sort.descending";
pub const KEY_ACTIVE_ASSET: &str = "active.asset";
pub const KEY_ACTIVE_FILE: &str = "active.file";
pub const KEY_FAVOURITES: &str = "favourites";

/// Persisted user state. Optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct Settings {
    path: Option<PathBuf>,
    inner: Mutex<SettingsInner>,
}

#[derive(Debug, Default)]
struct SettingsInner {
    values: Map<String, Value>,
    dirty: bool,
}

impl Settings {
    /// Settings that are never written anywhere.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the settings file at `path`. A missing file starts empty; a
    /// corrupt one is logged and replaced on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = if path.exists() {
            match read_json::<Map<String, Value>>(&path) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable settings: {e}");
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Self {
            path: Some(path),
            inner: Mutex::new(SettingsInner {
                values,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock();
        if inner.values.get(key) == Some(&value) {
            return;
        }
        inner.values.insert(key.to_owned(), value);
        inner.dirty = true;
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.values.remove(key).is_some() {
            inner.dirty = true;
        }
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }

    /// Write to disk if anything changed since the last save.
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }
        write_json(path, &inner.values)?;
        inner.dirty = false;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    // Typed accessors for the keys the browser uses.

    pub fn flag_filters(&self) -> FlagFilters {
        FlagFilters {
            active: self.get_bool(KEY_FILTER_ACTIVE),
            archived: self.get_bool(KEY_FILTER_ARCHIVED),
            favourite: self.get_bool(KEY_FILTER_FAVOURITE),
        }
    }

    pub fn set_flag_filter(&self, flag: FlagFilter, enabled: bool) {
        let key = match flag {
            FlagFilter::Active => KEY_FILTER_ACTIVE,
            FlagFilter::Archived => KEY_FILTER_ARCHIVED,
            FlagFilter::Favourite => KEY_FILTER_FAVOURITE,
        };
        self.set(key, Value::Bool(enabled));
    }

    pub fn sort(&self) -> SortSpec {
        let role = self
            .get(KEY_SORT_ROLE)
            .and_then(|v| serde_json::from_value::<SortRole>(v).ok())
            .unwrap_or_default();
        SortSpec {
            role,
            descending: self.get_bool(KEY_SORT_DESCENDING),
        }
    }

    pub fn set_sort(&self, spec: SortSpec) {
        self.set(KEY_SORT_ROLE, Value::String(spec.role.label().to_owned()));
        self.set(KEY_SORT_DESCENDING, Value::Bool(spec.descending));
    }

    pub fn favourites(&self) -> HashSet<String> {
        match self.get(KEY_FAVOURITES) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => HashSet::new(),
        }
    }

    /// Add or remove one favourite path. The list is stored sorted.
    pub fn set_favourite(&self, path: &str, favourite: bool) {
        let mut favourites = self.favourites();
        let changed = if favourite {
            favourites.insert(path.to_owned())
        } else {
            favourites.remove(path)
        };
        if !changed {
            return;
        }
        let mut list: Vec<String> = favourites.into_iter().collect();
        list.sort();
        self.set(
            KEY_FAVOURITES,
            Value::Array(list.into_iter().map(Value::String).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "generate_thumbnails": false, "max_items": 10 }"#).unwrap();
        let config = BrowserConfig::load(&path).unwrap();
        assert!(!config.generate_thumbnails);
        assert_eq!(config.max_items, 10);
        assert_eq!(config.drain_batch, BrowserConfig::default().drain_batch);
    }

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("config.json");
        let config = BrowserConfig::load_or_create(&path).unwrap();
        assert_eq!(config, BrowserConfig::default());
        assert!(path.exists());
        assert_eq!(BrowserConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            BrowserConfig::load(&path),
            Err(ConfigError::Json { .. })
        ));
    }

    #[test]
    fn extensions_are_normalised() {
        let config = BrowserConfig {
            valid_extensions: Some(vec![".EXR".into(), "mp4".into()]),
            ..BrowserConfig::default()
        };
        assert_eq!(
            config.scan_options().valid_extensions,
            Some(vec!["exr".to_string(), "mp4".to_string()])
        );
    }

    #[test]
    fn settings_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        {
            let settings = Settings::open(&path);
            settings.set_sort(SortSpec {
                role: SortRole::Modified,
                descending: true,
            });
            settings.set_favourite("/jobs/a.exr", true);
            settings.set_flag_filter(FlagFilter::Archived, true);
            settings.save().unwrap();
        }
        let settings = Settings::open(&path);
        assert_eq!(settings.sort().role, SortRole::Modified);
        assert!(settings.sort().descending);
        assert!(settings.favourites().contains("/jobs/a.exr"));
        assert!(settings.flag_filters().archived);
        assert!(!settings.flag_filters().favourite);
    }

    #[test]
    fn corrupt_settings_start_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2").unwrap();
        let settings = Settings::open(&path);
        assert!(settings.get(KEY_TEXT_FILTER).is_none());
    }
}
