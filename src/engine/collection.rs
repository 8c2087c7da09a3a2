use crate::config::{StoredFilter, StoredFilters};
use crate::error::{FilterError, Result};
use crate::pattern::{CompileMatcher, CompileOptions, FilterKind, FilterMatcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Which of a guild's two filter sets an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSet {
    /// Matches here suppress overlapping forbidden matches.
    Allowed,
    /// Matches here are violations unless an allowed match overlaps them.
    Forbidden,
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allowed => "allowed",
            Self::Forbidden => "forbidden",
        })
    }
}

/// A guild's allowed and forbidden filters, each in insertion order.
/// Order only matters for display; every filter in a set is always evaluated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterCollection {
    allowed: Vec<FilterMatcher>,
    forbidden: Vec<FilterMatcher>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Default::default()
    }

    /// Compile stored filters. Records of unknown kind, or whose pattern no longer
    /// compiles, are left out rather than failing the whole collection. They stay in
    /// storage.
    pub fn from_stored(stored: &StoredFilters, options: &CompileOptions) -> Self {
        Self {
            allowed: compile_set(FilterSet::Allowed, &stored.allowed, options),
            forbidden: compile_set(FilterSet::Forbidden, &stored.forbidden, options),
        }
    }

    pub fn list(&self, set: FilterSet) -> &[FilterMatcher] {
        match set {
            FilterSet::Allowed => &self.allowed,
            FilterSet::Forbidden => &self.forbidden,
        }
    }

    fn list_mut(&mut self, set: FilterSet) -> &mut Vec<FilterMatcher> {
        match set {
            FilterSet::Allowed => &mut self.allowed,
            FilterSet::Forbidden => &mut self.forbidden,
        }
    }

    pub fn allowed(&self) -> &[FilterMatcher] {
        &self.allowed
    }

    pub fn forbidden(&self) -> &[FilterMatcher] {
        &self.forbidden
    }

    pub fn contains(&self, set: FilterSet, kind: FilterKind, pattern: &str) -> bool {
        self.list(set).iter().any(|f| f.is(kind, pattern))
    }

    /// Compile and append a filter. The duplicate check comes first, so re-adding an
    /// existing filter is a [`FilterError::DuplicateFilter`] even if it wouldn't compile.
    pub fn add(
        &mut self,
        set: FilterSet,
        kind: FilterKind,
        pattern: &str,
        options: &CompileOptions,
    ) -> Result<&FilterMatcher> {
        if self.contains(set, kind, pattern) {
            return Err(duplicate(set, kind, pattern));
        }
        let matcher = FilterMatcher::new(kind, pattern, options)?;
        let filters = self.list_mut(set);
        filters.push(matcher);
        Ok(&filters[filters.len() - 1])
    }

    /// Remove every filter with this kind and pattern. Returns how many went away,
    /// which is never zero: nothing to remove is [`FilterError::NotFound`].
    pub fn remove(&mut self, set: FilterSet, kind: FilterKind, pattern: &str) -> Result<usize> {
        let filters = self.list_mut(set);
        let before = filters.len();
        filters.retain(|f| !f.is(kind, pattern));
        let removed = before - filters.len();
        if removed == 0 {
            return Err(not_found(set, kind, pattern));
        }
        Ok(removed)
    }
}

/// Configuration changes edit the persisted records directly, so records that this
/// version can't compile (unknown kinds, patterns over the size limit) survive them.
impl StoredFilters {
    fn records(&self, set: FilterSet) -> &[StoredFilter] {
        match set {
            FilterSet::Allowed => &self.allowed,
            FilterSet::Forbidden => &self.forbidden,
        }
    }

    fn records_mut(&mut self, set: FilterSet) -> &mut Vec<StoredFilter> {
        match set {
            FilterSet::Allowed => &mut self.allowed,
            FilterSet::Forbidden => &mut self.forbidden,
        }
    }

    /// Compile only the new filter and append its record. Duplicates are checked first,
    /// as in [`FilterCollection::add`].
    pub fn add(
        &mut self,
        set: FilterSet,
        kind: FilterKind,
        pattern: &str,
        options: &CompileOptions,
    ) -> Result<FilterMatcher> {
        if self.records(set).iter().any(|r| r.is(kind, pattern)) {
            return Err(duplicate(set, kind, pattern));
        }
        let matcher = FilterMatcher::new(kind, pattern, options)?;
        self.records_mut(set).push(matcher.serialize());
        Ok(matcher)
    }

    pub fn remove(&mut self, set: FilterSet, kind: FilterKind, pattern: &str) -> Result<usize> {
        let records = self.records_mut(set);
        let before = records.len();
        records.retain(|r| !r.is(kind, pattern));
        let removed = before - records.len();
        if removed == 0 {
            return Err(not_found(set, kind, pattern));
        }
        Ok(removed)
    }
}

fn duplicate(set: FilterSet, kind: FilterKind, pattern: &str) -> FilterError {
    FilterError::DuplicateFilter {
        set,
        kind,
        pattern: pattern.to_string(),
    }
}

fn not_found(set: FilterSet, kind: FilterKind, pattern: &str) -> FilterError {
    FilterError::NotFound {
        what: format!("{set} {kind} filter `{pattern}`"),
    }
}

fn compile_set(
    set: FilterSet,
    stored: &[StoredFilter],
    options: &CompileOptions,
) -> Vec<FilterMatcher> {
    stored
        .iter()
        .filter_map(|record| match record.compile(options) {
            Ok(Some(matcher)) => Some(matcher),
            Ok(None) => {
                warn!(
                    "Skipping {set} filter of unknown kind {kind}: {pattern}",
                    kind = record.kind,
                    pattern = record.pattern
                );
                None
            }
            Err(e) => {
                warn!("Skipping {set} filter: {e}");
                None
            }
        })
        .collect()
}
