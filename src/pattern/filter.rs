use crate::config::StoredFilter;
use crate::error::{FilterError, Result};
use crate::pattern::{CompileMatcher, CompileOptions, MatchSpan, Matcher, RegexPatternMatcher};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a filter's pattern is interpreted.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Verbatim substring, anywhere.
    Literal,
    /// Whole word, surrounded by word boundaries.
    Word,
    /// User-supplied regular expression.
    Regex,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Word => "word",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = String;

    /// `contains` is what older data calls a literal filter.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "literal" | "contains" => Ok(Self::Literal),
            "word" => Ok(Self::Word),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("Unknown filter kind: {s}")),
        }
    }
}

/// A compiled filter. Immutable once built; two filters are the same filter iff their
/// kind and pattern are equal.
#[derive(Debug, Clone)]
pub enum FilterMatcher {
    Literal {
        literal: String,
        regex: RegexPatternMatcher,
    },
    Word {
        word: String,
        regex: RegexPatternMatcher,
    },
    Regex {
        source: String,
        regex: RegexPatternMatcher,
    },
}

impl FilterMatcher {
    /// Compile a filter. Fails with [`FilterError::InvalidPattern`] for empty patterns
    /// and for user regexes that don't compile.
    pub fn new(kind: FilterKind, pattern: &str, options: &CompileOptions) -> Result<Self> {
        let invalid = |message: String| FilterError::InvalidPattern {
            kind,
            pattern: pattern.to_string(),
            message,
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty".to_string()));
        }

        let source = match kind {
            FilterKind::Literal => regex::escape(pattern),
            FilterKind::Word => format!(r"\b{word}\b", word = regex::escape(pattern)),
            FilterKind::Regex => pattern.to_string(),
        };
        let regex =
            RegexPatternMatcher::from(&source, options).map_err(|e| invalid(e.to_string()))?;

        Ok(match kind {
            FilterKind::Literal => Self::Literal {
                literal: pattern.to_string(),
                regex,
            },
            FilterKind::Word => Self::Word {
                word: pattern.to_string(),
                regex,
            },
            FilterKind::Regex => Self::Regex {
                source: pattern.to_string(),
                regex,
            },
        })
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::Literal { .. } => FilterKind::Literal,
            Self::Word { .. } => FilterKind::Word,
            Self::Regex { .. } => FilterKind::Regex,
        }
    }

    /// The pattern as the administrator entered it.
    pub fn pattern(&self) -> &str {
        match self {
            Self::Literal { literal, .. } => literal,
            Self::Word { word, .. } => word,
            Self::Regex { source, .. } => source,
        }
    }

    fn regex(&self) -> &RegexPatternMatcher {
        match self {
            Self::Literal { regex, .. } | Self::Word { regex, .. } | Self::Regex { regex, .. } => {
                regex
            }
        }
    }

    pub fn is(&self, kind: FilterKind, pattern: &str) -> bool {
        self.kind() == kind && self.pattern() == pattern
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Literal { literal, .. } => format!("Contains `{literal}`"),
            Self::Word { word, .. } => {
                format!("Contains `{word}` surrounded by word boundaries")
            }
            Self::Regex { source, .. } => format!("Matches `/{source}/`"),
        }
    }

    pub fn serialize(&self) -> StoredFilter {
        StoredFilter {
            kind: self.kind().to_string(),
            pattern: self.pattern().to_string(),
        }
    }

    /// Unknown kinds come back as `None` so that records written by a newer version
    /// are skipped instead of failing the whole collection.
    pub fn deserialize(stored: &StoredFilter, options: &CompileOptions) -> Result<Option<Self>> {
        stored.compile(options)
    }
}

impl PartialEq for FilterMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.is(other.kind(), other.pattern())
    }
}

impl Eq for FilterMatcher {}

impl Matcher<&str> for FilterMatcher {
    fn find_spans(&self, text: &str) -> Vec<MatchSpan> {
        self.regex().find_spans(text)
    }

    fn is_match(&self, text: &str) -> bool {
        self.regex().is_match(text)
    }
}

impl StoredFilter {
    /// Same filter, under any name its kind has been stored as.
    pub fn is(&self, kind: FilterKind, pattern: &str) -> bool {
        self.kind.parse::<FilterKind>() == Ok(kind) && self.pattern == pattern
    }
}

impl CompileMatcher<Option<FilterMatcher>> for StoredFilter {
    fn compile(&self, options: &CompileOptions) -> Result<Option<FilterMatcher>> {
        match self.kind.parse::<FilterKind>() {
            Ok(kind) => FilterMatcher::new(kind, &self.pattern, options).map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(kind: FilterKind, pattern: &str) -> FilterMatcher {
        FilterMatcher::new(kind, pattern, &CompileOptions::default()).expect("Couldn't compile")
    }

    fn matched(matcher: &FilterMatcher, text: &str) -> Vec<(String, usize, usize)> {
        matcher
            .find_spans(text)
            .into_iter()
            .map(|span| (span.text().to_string(), span.low(), span.high()))
            .collect()
    }

    #[test]
    fn test_literal_is_case_insensitive() {
        let matcher = compile(FilterKind::Literal, "foo");
        for text in ["FOO", "Foo", "fOO", "foo"] {
            assert!(matcher.is_match(text), "{text} should match");
        }
        assert_eq!(
            vec![("FOO".to_string(), 3, 6), ("foo".to_string(), 7, 10)],
            matched(&matcher, "xx FOO foo")
        );
    }

    #[test]
    fn test_literal_escapes_metacharacters() {
        let matcher = compile(FilterKind::Literal, "a.b*");
        assert!(matcher.is_match("see a.b* here"));
        assert!(!matcher.is_match("axbbb"));
    }

    #[test]
    fn test_word_respects_boundaries() {
        let matcher = compile(FilterKind::Word, "ass");
        assert!(matcher.is_match("ass"));
        assert!(matcher.is_match("the ass is"));
        assert!(matcher.is_match("the ASS, is"));
        assert!(!matcher.is_match("class"));
        assert!(!matcher.is_match("assume"));
    }

    #[test]
    fn test_word_boundaries_are_unicode_aware() {
        let matcher = compile(FilterKind::Word, "bad");
        assert!(!matcher.is_match("badé"));
        assert!(matcher.is_match("très bad!"));
    }

    #[test]
    fn test_regex_global_scan() {
        let matcher = compile(FilterKind::Regex, "b.d");
        assert_eq!(
            vec![
                ("bad".to_string(), 0, 3),
                ("bud".to_string(), 4, 7),
                ("bed".to_string(), 8, 11)
            ],
            matched(&matcher, "bad bud bed")
        );
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let result = FilterMatcher::new(FilterKind::Regex, "[unclosed", &CompileOptions::default());
        match result {
            Err(FilterError::InvalidPattern { kind, pattern, .. }) => {
                assert_eq!(FilterKind::Regex, kind);
                assert_eq!("[unclosed", pattern);
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        for kind in [FilterKind::Literal, FilterKind::Word, FilterKind::Regex] {
            assert!(FilterMatcher::new(kind, "", &CompileOptions::default()).is_err());
        }
    }

    #[test]
    fn test_descriptions() {
        assert_eq!("Contains `spam`", compile(FilterKind::Literal, "spam").describe());
        assert_eq!(
            "Contains `spam` surrounded by word boundaries",
            compile(FilterKind::Word, "spam").describe()
        );
        assert_eq!("Matches `/sp+am/`", compile(FilterKind::Regex, "sp+am").describe());
    }

    #[test]
    fn test_round_trip_preserves_behavior() {
        let text = "Spam, SPAMMY spam! class ass b4d s.p.a.m";
        for (kind, pattern) in [
            (FilterKind::Literal, "s.p"),
            (FilterKind::Word, "spam"),
            (FilterKind::Regex, r"b\wd"),
        ] {
            let original = compile(kind, pattern);
            let restored = FilterMatcher::deserialize(&original.serialize(), &CompileOptions::default())
                .expect("Couldn't deserialize")
                .expect("Kind should be known");
            assert_eq!(original, restored);
            assert_eq!(original.find_spans(text), restored.find_spans(text));
        }
    }

    #[test]
    fn test_unknown_kind_deserializes_to_none() {
        let stored = StoredFilter {
            kind: "phonetic".to_string(),
            pattern: "spam".to_string(),
        };
        assert!(FilterMatcher::deserialize(&stored, &CompileOptions::default())
            .expect("Unknown kinds aren't errors")
            .is_none());
    }

    #[test]
    fn test_legacy_contains_kind() {
        let stored = StoredFilter {
            kind: "contains".to_string(),
            pattern: "spam".to_string(),
        };
        let matcher = FilterMatcher::deserialize(&stored, &CompileOptions::default())
            .expect("Couldn't deserialize")
            .expect("Kind should be known");
        assert_eq!(FilterKind::Literal, matcher.kind());
        assert_eq!("literal", matcher.serialize().kind);
    }
}
