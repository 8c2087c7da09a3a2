mod filter;
mod regex;

use crate::config::Settings;
use crate::error::Result;
use serde::Serialize;

pub use self::filter::{FilterKind, FilterMatcher};
pub use self::regex::RegexPatternMatcher;

/// Scans text for every non-overlapping occurrence of something.
pub trait Matcher<T> {
    fn find_spans(&self, t: T) -> Vec<MatchSpan>;

    fn is_match(&self, t: T) -> bool {
        !self.find_spans(t).is_empty()
    }
}

pub trait CompileMatcher<M> {
    fn compile(&self, options: &CompileOptions) -> Result<M>;
}

/// Default cap on the compiled size of a single filter's regex.
pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Knobs applied to every filter regex we compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub size_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_REGEX_SIZE_LIMIT,
        }
    }
}

impl From<&Settings> for CompileOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            size_limit: settings.regex_size_limit,
        }
    }
}

/// One match occurrence: the matched text and its half-open `[low, high)` interval,
/// in characters, over the text that was scanned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MatchSpan {
    text: String,
    low: usize,
    high: usize,
}

impl MatchSpan {
    pub(crate) fn new(text: impl Into<String>, low: usize, high: usize) -> Self {
        debug_assert!(low < high, "match spans are never empty");
        Self {
            text: text.into(),
            low,
            high,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn low(&self) -> usize {
        self.low
    }

    pub fn high(&self) -> usize {
        self.high
    }

    /// Half-open intervals overlap iff each starts before the other ends.
    pub fn overlaps(&self, other: &MatchSpan) -> bool {
        self.low < other.high && other.low < self.high
    }
}
