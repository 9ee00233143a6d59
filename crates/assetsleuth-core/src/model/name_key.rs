/// Natural sort key for paths: digit runs compare by value, text compares
/// lexically, so `shot_2` sorts before `shot_10`.
use compact_str::CompactString;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Chunk {
    /// Digit run with leading zeros stripped (`"0"` for all-zero runs).
    Number(CompactString),
    Text(CompactString),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Longer digit strings are larger numbers once zeros are stripped.
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pre-split natural ordering key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameKey(Vec<Chunk>);

impl NameKey {
    pub fn new(s: &str) -> Self {
        let mut chunks = Vec::new();
        let mut current = CompactString::default();
        let mut in_digits = false;

        for ch in s.chars() {
            let is_digit = ch.is_ascii_digit();
            if !current.is_empty() && is_digit != in_digits {
                chunks.push(Self::finish(std::mem::take(&mut current), in_digits));
            }
            in_digits = is_digit;
            current.push(ch);
        }
        if !current.is_empty() {
            chunks.push(Self::finish(current, in_digits));
        }
        Self(chunks)
    }

    fn finish(run: CompactString, digits: bool) -> Chunk {
        if digits {
            let trimmed = run.trim_start_matches('0');
            Chunk::Number(CompactString::new(if trimmed.is_empty() { "0" } else { trimmed }))
        } else {
            Chunk::Text(run)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_compare_numerically() {
        assert!(NameKey::new("shot_2.ma") < NameKey::new("shot_10.ma"));
        assert!(NameKey::new("v009") < NameKey::new("v010"));
    }

    #[test]
    fn leading_zeros_do_not_change_value_order() {
        assert!(NameKey::new("a_0002") < NameKey::new("a_10"));
    }

    #[test]
    fn text_compares_lexically() {
        assert!(NameKey::new("/a/alpha") < NameKey::new("/a/beta"));
    }

    #[test]
    fn equal_strings_give_equal_keys() {
        assert_eq!(NameKey::new("plate_0001.exr"), NameKey::new("plate_0001.exr"));
    }
}
