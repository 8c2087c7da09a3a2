use crate::pattern::{FilterMatcher, MatchSpan};

/// A span together with the filter that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterMatch {
    pub filter: FilterMatcher,
    pub span: MatchSpan,
}

/// Answers "does this interval overlap any indexed interval?" in O(log n).
///
/// Intervals are sorted by `low`, and `max_high[i]` is the largest `high` among the first
/// `i + 1` of them. The candidates for overlapping `[low, high)` are exactly the intervals
/// starting before `high`, a prefix of the sorted list; one of them overlaps iff the
/// largest `high` in that prefix is past `low`.
#[derive(Clone, Debug, Default)]
pub struct IntervalIndex {
    lows: Vec<usize>,
    max_high: Vec<usize>,
}

impl IntervalIndex {
    pub fn new<'a>(spans: impl IntoIterator<Item = &'a MatchSpan>) -> Self {
        let mut intervals = spans
            .into_iter()
            .map(|span| (span.low(), span.high()))
            .collect::<Vec<_>>();
        intervals.sort_unstable();

        let mut lows = Vec::with_capacity(intervals.len());
        let mut max_high = Vec::with_capacity(intervals.len());
        let mut running = 0;
        for (low, high) in intervals {
            running = running.max(high);
            lows.push(low);
            max_high.push(running);
        }

        Self { lows, max_high }
    }

    pub fn len(&self) -> usize {
        self.lows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lows.is_empty()
    }

    pub fn overlaps_any(&self, span: &MatchSpan) -> bool {
        let candidates = self.lows.partition_point(|&low| low < span.high());
        candidates > 0 && self.max_high[candidates - 1] > span.low()
    }
}

/// The forbidden matches that no allowed match overlaps, in their original order.
/// Forbidden matches that overlap each other are all kept.
pub fn resolve(allowed: &[FilterMatch], forbidden: &[FilterMatch]) -> Vec<FilterMatch> {
    let index = IntervalIndex::new(allowed.iter().map(|m| &m.span));
    forbidden
        .iter()
        .filter(|m| !index.overlaps_any(&m.span))
        .cloned()
        .collect()
}
