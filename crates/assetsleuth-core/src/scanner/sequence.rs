/// Frame-sequence detection and grouping.
///
/// A path is split into `prefix`, `frame`, `suffix` and `extension`, where
/// `frame` is the last digit run of the file name that only non-digit text
/// follows before the final extension. `shot_0012.exr` gives
/// `("shot_", "0012", "", "exr")`; `comp_v002.0001.exr` gives frame `0001`.
///
/// Grouping is purely syntactic: version-numbered single files sharing a
/// stem are grouped like frames.
use crate::model::{NameKey, SequenceParts};
use compact_str::CompactString;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::warn;

/// Placeholder standing in for the frame number in a sequence key.
pub const FRAME_PLACEHOLDER: &str = "[0]";

static SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)([0-9]+)([0-9\\/]*|[^0-9\\/]*)\.([^\.]+)$")
        .expect("sequence pattern is valid")
});

/// Bracketed range marker of a collapsed name, e.g. `a_[0001-0010].exr`.
static COLLAPSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\[([^\]]*)\](.*)$")
        .expect("collapsed pattern is valid")
});

/// Split `path` into its sequence parts, or `None` when it holds no frame
/// number. Collapsed names (containing a `[...]` marker) never split.
pub fn split(path: &str) -> Option<SequenceParts> {
    if is_collapsed(path) {
        return None;
    }
    let caps = SEQUENCE_RE.captures(path)?;
    Some(SequenceParts {
        prefix: CompactString::new(&caps[1]),
        frame: CompactString::new(&caps[2]),
        suffix: CompactString::new(&caps[3]),
        extension: CompactString::new(&caps[4]),
    })
}

/// `prefix + "[0]" + suffix + "." + extension`
pub fn sequence_key(parts: &SequenceParts) -> String {
    format!(
        "{}{FRAME_PLACEHOLDER}{}.{}",
        parts.prefix, parts.suffix, parts.extension
    )
}

/// Path of one member of the sequence.
pub fn frame_path(parts: &SequenceParts, frame: &str) -> String {
    format!("{}{frame}{}.{}", parts.prefix, parts.suffix, parts.extension)
}

/// `true` if `name` carries a bracketed range marker.
pub fn is_collapsed(name: &str) -> bool {
    COLLAPSED_RE.is_match(name)
}

/// Compact range string for a set of frame tokens, e.g. `0001-0003,0005`.
///
/// Duplicates are ignored, output is numeric ascending and padded to the
/// widest token. Tokens too long to parse are skipped.
pub fn frame_ranges(frames: &[CompactString]) -> String {
    let parsed = parse_frames(frames);
    let padding = parsed.iter().map(|(_, f)| f.len()).max().unwrap_or(0);
    let mut numbers: Vec<u64> = parsed.iter().map(|&(n, _)| n).collect();
    numbers.sort_unstable();
    numbers.dedup();

    let pad = |n: u64| format!("{n:0padding$}");
    let mut blocks: Vec<String> = Vec::new();
    let mut i = 0;
    while i < numbers.len() {
        let start = numbers[i];
        let mut end = start;
        while i + 1 < numbers.len() && numbers[i + 1] == end + 1 {
            end = numbers[i + 1];
            i += 1;
        }
        blocks.push(if start == end {
            pad(start)
        } else {
            format!("{}-{}", pad(start), pad(end))
        });
        i += 1;
    }
    blocks.join(",")
}

/// First and last member paths of a sequence, by numeric frame value.
///
/// The paths are built from the members' own tokens so they name files that
/// were discovered. Equal values spelled differently resolve to the widest.
pub fn bounding_paths(parts: &SequenceParts, frames: &[CompactString]) -> Option<(String, String)> {
    let parsed = parse_frames(frames);
    let (_, first) = parsed.iter().min_by_key(|(n, f)| (*n, Reverse(f.len())))?;
    let (_, last) = parsed.iter().max_by_key(|(n, f)| (*n, f.len()))?;
    Some((frame_path(parts, first), frame_path(parts, last)))
}

fn parse_frames(frames: &[CompactString]) -> Vec<(u64, &str)> {
    frames
        .iter()
        .filter_map(|f| f.parse().ok().map(|n| (n, f.as_str())))
        .collect()
}

/// One entry of the collapsed listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grouped {
    /// A file that is not part of a sequence. `parts` is set when the name
    /// matched the pattern but no other member was found.
    Single {
        path: String,
        parts: Option<SequenceParts>,
    },
    /// Two or more files sharing a sequence key.
    Sequence {
        key: String,
        parts: SequenceParts,
        /// Frame tokens in input order.
        frames: Vec<CompactString>,
    },
}

impl Grouped {
    /// The path shown for this entry: the file path or the sequence key.
    pub fn path(&self) -> &str {
        match self {
            Self::Single { path, .. } => path,
            Self::Sequence { key, .. } => key,
        }
    }
}

/// Partition `paths` into standalone files and sequences.
///
/// The result is ordered by natural name order of [`Grouped::path`], so it
/// does not depend on the order `paths` were discovered in. Only the frame
/// lists keep input order.
pub fn group<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<Grouped> {
    // key -> (parts of the first member, frames)
    let mut sequences: HashMap<String, (SequenceParts, Vec<CompactString>)> = HashMap::new();
    let mut singles: Vec<String> = Vec::new();

    for path in paths {
        match split(path) {
            Some(parts) => {
                let frame = parts.frame.clone();
                sequences
                    .entry(sequence_key(&parts))
                    .or_insert_with(|| (parts, Vec::new()))
                    .1
                    .push(frame);
            }
            None => singles.push(path.to_owned()),
        }
    }

    let mut out: Vec<Grouped> = singles
        .into_iter()
        .map(|path| Grouped::Single { path, parts: None })
        .collect();
    for (key, (parts, frames)) in sequences {
        if frames.len() == 1 {
            let path = frame_path(&parts, &frames[0]);
            let parts = SequenceParts {
                frame: frames[0].clone(),
                ..parts
            };
            out.push(Grouped::Single {
                path,
                parts: Some(parts),
            });
        } else {
            out.push(Grouped::Sequence { key, parts, frames });
        }
    }

    out.sort_by_cached_key(|g| (NameKey::new(&g.path().to_lowercase()), g.path().to_owned()));
    drop_path_collisions(&mut out);
    out
}

/// Keep one entry per lower-cased path. Sequences are claimed first, so a
/// file literally named like a sequence key loses to the sequence; among
/// entries of the same kind the first in name order wins.
fn drop_path_collisions(out: &mut Vec<Grouped>) {
    let mut taken: HashSet<String> = HashSet::with_capacity(out.len());
    let mut keep = vec![false; out.len()];
    for sequences_first in [true, false] {
        for (i, entry) in out.iter().enumerate() {
            if matches!(entry, Grouped::Sequence { .. }) != sequences_first {
                continue;
            }
            if taken.insert(entry.path().to_lowercase()) {
                keep[i] = true;
            } else {
                warn!("Skipping {}: its path collides with another item", entry.path());
            }
        }
    }
    let mut keep = keep.into_iter();
    out.retain(|_| keep.next().unwrap_or(false));
}
