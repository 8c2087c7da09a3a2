use crate::pattern::{CompileOptions, MatchSpan, Matcher};
use regex::{Regex, RegexBuilder};

/// A compiled case-insensitive, Unicode-aware regex that reports character-offset spans.
#[derive(Debug, Clone)]
pub struct RegexPatternMatcher(Regex);

impl RegexPatternMatcher {
    pub fn from(source: &str, options: &CompileOptions) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .unicode(true)
            .size_limit(options.size_limit)
            .build()?;
        Ok(Self(regex))
    }
}

impl Matcher<&str> for RegexPatternMatcher {
    /// Global scan. The regex crate reports byte offsets; we walk the matches in order
    /// and convert to character offsets incrementally. Empty matches are dropped.
    fn find_spans(&self, text: &str) -> Vec<MatchSpan> {
        let mut spans = vec![];
        let mut byte_cursor = 0;
        let mut char_cursor = 0;
        for m in self.0.find_iter(text) {
            if m.start() == m.end() {
                continue;
            }
            char_cursor += text[byte_cursor..m.start()].chars().count();
            let low = char_cursor;
            let high = low + m.as_str().chars().count();
            spans.push(MatchSpan::new(m.as_str(), low, high));
            byte_cursor = m.end();
            char_cursor = high;
        }
        spans
    }

    fn is_match(&self, text: &str) -> bool {
        self.0.find_iter(text).any(|m| m.start() != m.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> RegexPatternMatcher {
        RegexPatternMatcher::from(source, &CompileOptions::default()).expect("Couldn't compile")
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let matcher = compile("bär");
        let spans = matcher.find_spans("Ça va, BÄR? bär!");
        assert_eq!(
            vec![MatchSpan::new("BÄR", 7, 10), MatchSpan::new("bär", 12, 15)],
            spans
        );
    }

    #[test]
    fn test_empty_matches_are_dropped() {
        let matcher = compile("x*");
        let spans = matcher.find_spans("axxbx");
        assert_eq!(
            vec![MatchSpan::new("xx", 1, 3), MatchSpan::new("x", 4, 5)],
            spans
        );
        assert!(!matcher.is_match("abc"));
    }

    #[test]
    fn test_size_limit_is_enforced() {
        let tiny = CompileOptions { size_limit: 16 };
        assert!(RegexPatternMatcher::from(r"\w{50}", &tiny).is_err());
    }
}
