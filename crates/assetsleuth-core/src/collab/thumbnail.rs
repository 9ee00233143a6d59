/// Thumbnail production.
///
/// [`ImageThumbnailCache`] decodes sources with the `image` crate and keeps
/// one PNG per source path in a cache directory. A cached PNG is reused as
/// long as it is at least as new as its source.
use crate::error::ThumbnailError;
use crate::model::{Rgb, Thumbnail};
use image::{DynamicImage, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub trait ThumbnailCache: Send + Sync {
    /// Produce a thumbnail no larger than `size`×`size` for `source`.
    fn make_thumbnail(&self, source: &Path, size: u32) -> Result<Thumbnail, ThumbnailError>;

    /// Background colour to paint behind `thumbnail`.
    fn average_color(&self, thumbnail: &Thumbnail) -> Rgb;
}

/// Mean colour of the non-transparent pixels of an RGBA8 buffer.
pub fn average_rgba(pixels: &[u8]) -> Rgb {
    let (mut r, mut g, mut b, mut n) = (0u64, 0u64, 0u64, 0u64);
    for px in pixels.chunks_exact(4) {
        if px[3] == 0 {
            continue;
        }
        r += u64::from(px[0]);
        g += u64::from(px[1]);
        b += u64::from(px[2]);
        n += 1;
    }
    if n == 0 {
        return Rgb::default();
    }
    Rgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

pub struct ImageThumbnailCache {
    cache_dir: PathBuf,
}

impl ImageThumbnailCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file for `source`: a blake3 hash of the path, so renames and
    /// moves get their own entry.
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let hash = blake3::hash(source.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{}.png", hash.to_hex()))
    }

    fn cached(&self, source: &Path, cache: &Path) -> Option<DynamicImage> {
        let cache_time = fs::metadata(cache).and_then(|m| m.modified()).ok()?;
        let source_time = fs::metadata(source).and_then(|m| m.modified()).ok()?;
        if cache_time < source_time {
            return None;
        }
        match image::open(cache) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!("Discarding unreadable cache entry {}: {e}", cache.display());
                None
            }
        }
    }

    fn store(&self, cache: &Path, img: &DynamicImage) {
        let result = fs::create_dir_all(&self.cache_dir)
            .map_err(ThumbnailError::from)
            .and_then(|()| img.save(cache).map_err(ThumbnailError::from));
        if let Err(e) = result {
            warn!("Could not write thumbnail cache {}: {e}", cache.display());
        }
    }
}

fn to_thumbnail(rgba: RgbaImage) -> Result<Thumbnail, ThumbnailError> {
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(ThumbnailError::Empty);
    }
    Ok(Thumbnail {
        width,
        height,
        pixels: Arc::from(rgba.into_raw()),
    })
}

impl ThumbnailCache for ImageThumbnailCache {
    fn make_thumbnail(&self, source: &Path, size: u32) -> Result<Thumbnail, ThumbnailError> {
        let cache = self.cache_path(source);
        if let Some(img) = self.cached(source, &cache) {
            let img = if img.width() > size || img.height() > size {
                img.thumbnail(size, size)
            } else {
                img
            };
            return to_thumbnail(img.to_rgba8());
        }

        let img = image::open(source)?.thumbnail(size, size);
        self.store(&cache, &img);
        to_thumbnail(img.to_rgba8())
    }

    fn average_color(&self, thumbnail: &Thumbnail) -> Rgb {
        average_rgba(&thumbnail.pixels)
    }
}
