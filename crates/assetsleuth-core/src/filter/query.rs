/// Free-text query parsing.
///
/// Whitespace separates tokens. `--token` excludes, `"a phrase"` matches
/// with its inner whitespace, and the two combine as `--"a phrase"`. A quote
/// that is never closed is not an error: the raw word is matched literally.
/// Matching is case-insensitive substring search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Every one of these must occur.
    pub include: Vec<String>,
    /// Any one of these vetoes the record.
    pub exclude: Vec<String>,
}

impl Query {
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let mut query = Query::default();
        let mut rest = lowered.as_str();

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            let (negated, body) = match rest.strip_prefix("--") {
                Some(after) => (true, after),
                None => (false, rest),
            };

            let (token, remaining) = match body.strip_prefix('"') {
                Some(inner) => match inner.find('"') {
                    Some(end) => (&inner[..end], &inner[end + 1..]),
                    // Unterminated: fall back to the raw word.
                    None => split_word(body),
                },
                None => split_word(body),
            };
            rest = remaining;

            if token.is_empty() {
                continue;
            }
            let target = if negated {
                &mut query.exclude
            } else {
                &mut query.include
            };
            target.push(token.to_owned());
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Evaluate against lower-cased searchable text: inclusion first, then
    /// exclusions veto.
    pub fn matches(&self, text: &str) -> bool {
        self.include.iter().all(|t| text.contains(t.as_str()))
            && !self.exclude.iter().any(|t| text.contains(t.as_str()))
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_include_and_exclude() {
        let q = Query::parse("shot --wip Final");
        assert_eq!(q.include, vec!["shot", "final"]);
        assert_eq!(q.exclude, vec!["wip"]);
    }

    #[test]
    fn quoted_phrases_keep_whitespace() {
        let q = Query::parse(r#""shot 010" --"old take""#);
        assert_eq!(q.include, vec!["shot 010"]);
        assert_eq!(q.exclude, vec!["old take"]);
    }

    #[test]
    fn unterminated_quote_degrades_to_raw_word() {
        let q = Query::parse(r#""shot_020 final"#);
        assert_eq!(q.include, vec![r#""shot_020"#, "final"]);
    }

    #[test]
    fn empty_tokens_are_dropped() {
        assert!(Query::parse("  -- \"\"  ").is_empty());
    }

    #[test]
    fn exclusion_vetoes_after_inclusion() {
        let q = Query::parse("shot --wip");
        assert!(q.matches("shot_010 final.mp4"));
        assert!(!q.matches("shot_020 wip.mp4"));
        assert!(!q.matches("plate.exr"));
    }

    #[test]
    fn exclusions_alone_include_everything_else() {
        let q = Query::parse("--wip");
        assert!(q.matches("shot_010 final.mp4"));
        assert!(!q.matches("shot_020 wip.mp4"));
    }
}
