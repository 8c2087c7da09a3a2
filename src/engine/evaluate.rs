use crate::engine::collection::FilterCollection;
use crate::engine::exemption::{ExemptionSet, MessageMeta};
use crate::engine::overlap::{resolve, FilterMatch};
use crate::error::{FilterError, Result};
use crate::normalize::{NormalizedText, Normalizer};
use crate::pattern::{FilterMatcher, Matcher};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Everything evaluation needs to know about one guild, read once per message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub enabled: bool,
    pub filters: FilterCollection,
    pub exemptions: ExemptionSet,
}

/// Why a message wasn't evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The guild turned filtering off.
    Disabled,
    /// The guild has no forbidden filters.
    NoFilters,
    /// An exemption matched the message.
    Exempt,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::NoFilters => "no-filters",
            Self::Exempt => "exempt",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Evaluation {
    Skipped(SkipReason),
    Evaluated(Verdict),
}

impl Evaluation {
    /// Violations, if the message was evaluated at all.
    pub fn violations(&self) -> &[FilterMatch] {
        match self {
            Self::Skipped(_) => &[],
            Self::Evaluated(verdict) => verdict.violations(),
        }
    }
}

/// Full triage of one text. Every span's offsets refer to [`Verdict::text`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    text: NormalizedText,
    allowed_matches: Vec<FilterMatch>,
    forbidden_matches: Vec<FilterMatch>,
    violations: Vec<FilterMatch>,
}

impl Verdict {
    pub fn text(&self) -> &NormalizedText {
        &self.text
    }

    pub fn allowed_matches(&self) -> &[FilterMatch] {
        &self.allowed_matches
    }

    /// All forbidden matches, before allowed matches suppress any.
    pub fn forbidden_matches(&self) -> &[FilterMatch] {
        &self.forbidden_matches
    }

    /// Forbidden matches that no allowed match overlaps.
    pub fn violations(&self) -> &[FilterMatch] {
        &self.violations
    }

    pub fn is_violation(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Distinct filters with at least one violation, in order of first violation.
    pub fn applied_filters(&self) -> Vec<&FilterMatcher> {
        let mut first_violations: Vec<&FilterMatch> = self.violations.iter().collect();
        first_violations.sort_by_key(|violation| violation.span.low());
        let mut applied: Vec<&FilterMatcher> = vec![];
        for violation in first_violations {
            if !applied.contains(&&violation.filter) {
                applied.push(&violation.filter);
            }
        }
        applied
    }
}

/// Evaluate a message against a guild's configuration. Cheap checks run first:
/// disabled guilds, guilds without forbidden filters and exempt messages are skipped
/// without normalizing or matching anything.
pub fn evaluate(
    snapshot: &GuildSnapshot,
    raw: &str,
    message: &MessageMeta,
    normalizer: &dyn Normalizer,
) -> Result<Evaluation> {
    if !snapshot.enabled {
        debug!("Skipping message: filtering disabled");
        return Ok(Evaluation::Skipped(SkipReason::Disabled));
    }
    if snapshot.filters.forbidden().is_empty() {
        return Ok(Evaluation::Skipped(SkipReason::NoFilters));
    }
    if snapshot.exemptions.test(message) {
        debug!(
            "Skipping message by {author} in {channel}: exempt",
            author = message.author_id,
            channel = message.channel_id
        );
        return Ok(Evaluation::Skipped(SkipReason::Exempt));
    }

    dry_run(&snapshot.filters, raw, normalizer).map(Evaluation::Evaluated)
}

/// Run every filter over the text regardless of guild state or exemptions, so that an
/// administrator can preview what a configuration would do.
pub fn dry_run(
    filters: &FilterCollection,
    raw: &str,
    normalizer: &dyn Normalizer,
) -> Result<Verdict> {
    let text = normalizer.normalize(raw).map_err(FilterError::Normalize)?;
    Ok(apply(filters, text))
}

fn apply(filters: &FilterCollection, text: NormalizedText) -> Verdict {
    let allowed_matches = find_all(filters.allowed(), text.as_str());
    let forbidden_matches = find_all(filters.forbidden(), text.as_str());
    let violations = resolve(&allowed_matches, &forbidden_matches);
    Verdict {
        text,
        allowed_matches,
        forbidden_matches,
        violations,
    }
}

fn find_all(filters: &[FilterMatcher], text: &str) -> Vec<FilterMatch> {
    filters
        .iter()
        .flat_map(|filter| {
            filter.find_spans(text).into_iter().map(|span| FilterMatch {
                filter: filter.clone(),
                span,
            })
        })
        .collect()
}
