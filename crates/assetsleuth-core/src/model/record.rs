/// A single discovered item: one file or one collapsed frame sequence.
///
/// Records are created bare by the scanner and filled in place by the
/// enrichment workers. They live in the [`RecordStore`](super::RecordStore)
/// arena; everything else refers to them through [`RecordRef`](super::RecordRef).
use super::name_key::NameKey;
use bitflags::bitflags;
use compact_str::CompactString;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// What a record stands for, and which bucket of a folder it lives in.
///
/// The `File` bucket of a folder lists every file individually. The
/// `Sequence` bucket holds the collapsed view, where `Sequence` records sit
/// next to standalone `File` records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RecordKind {
    File,
    Sequence,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::File, RecordKind::Sequence];

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sequence => "sequence",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags! {
    /// User-visible item flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        const FAVOURITE = 0b001;
        const ARCHIVED  = 0b010;
        /// Exclusive: at most one record per bucket carries it.
        const ACTIVE    = 0b100;
    }
}

/// The four parts a sequence-numbered path splits into.
///
/// `prefix` keeps the directory part of the path, so members of two
/// same-named sequences in different sub-folders never group together.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceParts {
    pub prefix: CompactString,
    pub frame: CompactString,
    pub suffix: CompactString,
    pub extension: CompactString,
}

/// Sort keys, one per sortable role.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortKeys {
    pub by_name: NameKey,
    /// Seconds since the Unix epoch; 0 until info is loaded.
    pub by_mtime: i64,
    /// Bytes (sum of all frames for sequences); 0 until info is loaded.
    pub by_size: u64,
}

/// An 8-bit RGB colour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Opaque thumbnail handle: tightly packed RGBA8 pixels.
///
/// Cloning is a reference-count bump, so records can be handed to the view
/// by value without copying image data.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// One item in a bucket.
#[derive(Clone, Debug)]
pub struct Record {
    /// Dense position inside the bucket. Rewritten by every reindex, so
    /// hold a [`RecordRef`](super::RecordRef) rather than this value.
    pub id: usize,
    pub kind: RecordKind,

    pub display_name: CompactString,
    /// Raw file or folder name.
    pub edit_name: CompactString,
    /// Lower-cased path, the comparison key.
    pub full_path: CompactString,
    /// Original-case path with `/` separators, used for I/O.
    pub path: String,

    pub flags: RecordFlags,
    /// Positional: server, job, root, asset, task folder, sub-folder...
    pub parent_path: Vec<CompactString>,

    pub sequence: Option<SequenceParts>,
    /// Matched frame tokens in discovery order. Only filled for sequences.
    pub frames: Vec<CompactString>,

    pub info_loaded: bool,
    pub thumbnail_loaded: bool,

    pub description: String,
    pub file_details: String,
    pub sort_keys: SortKeys,

    /// Compact range string such as `0001-0010,0012`. Sequences only.
    pub frame_range: Option<String>,
    /// Path of the lowest frame. Sequences only.
    pub start_path: Option<String>,
    /// Path of the highest frame. Sequences only.
    pub end_path: Option<String>,

    pub thumbnail: Option<Thumbnail>,
    pub thumbnail_background: Option<Rgb>,
}

impl Record {
    /// Create a bare record as produced by the scanner.
    pub fn new(kind: RecordKind, path: String, display_name: CompactString) -> Self {
        let edit_name = CompactString::new(path.rsplit('/').next().unwrap_or(&path));
        let full_path = CompactString::new(path.to_lowercase());
        let by_name = NameKey::new(&full_path);
        Self {
            id: 0,
            kind,
            display_name,
            edit_name,
            full_path,
            path,
            flags: RecordFlags::empty(),
            parent_path: Vec::new(),
            sequence: None,
            frames: Vec::new(),
            info_loaded: false,
            thumbnail_loaded: false,
            description: String::new(),
            file_details: String::new(),
            sort_keys: SortKeys {
                by_name,
                ..SortKeys::default()
            },
            frame_range: None,
            start_path: None,
            end_path: None,
            thumbnail: None,
            thumbnail_background: None,
        }
    }

    /// `true` once both enrichment passes have finished.
    pub fn is_enriched(&self) -> bool {
        self.info_loaded && self.thumbnail_loaded
    }

    /// Paths of every file backing this record.
    ///
    /// A sequence expands to one path per frame (discovery order); anything
    /// else is just its own path.
    pub fn source_paths(&self) -> Vec<String> {
        match (&self.kind, &self.sequence) {
            (RecordKind::Sequence, Some(parts)) => self
                .frames
                .iter()
                .map(|frame| crate::scanner::sequence::frame_path(parts, frame))
                .collect(),
            _ => vec![self.path.clone()],
        }
    }

    /// Text searched by the filter engine: path, description and file
    /// details, lower-cased and newline-joined.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(
            self.full_path.len() + self.description.len() + self.file_details.len() + 2,
        );
        text.push_str(&self.full_path);
        text.push('\n');
        text.push_str(&self.description.trim().to_lowercase());
        text.push('\n');
        text.push_str(&self.file_details.trim().to_lowercase());
        text
    }

    /// Display name with the frame range in place of the `[0]` placeholder,
    /// e.g. `a_[0001-0003].exr`. Falls back to `display_name` until the
    /// range has been computed.
    pub fn collapsed_name(&self) -> String {
        match (&self.sequence, &self.frame_range) {
            (Some(parts), Some(range)) if self.kind == RecordKind::Sequence => {
                let prefix = parts.prefix.rsplit('/').next().unwrap_or(&parts.prefix);
                format!("{prefix}[{range}]{}.{}", parts.suffix, parts.extension)
            }
            _ => self.display_name.to_string(),
        }
    }
}
