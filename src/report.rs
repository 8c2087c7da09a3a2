//! Human-readable text for administrators: filter and exemption lists, dry-run reports,
//! and the note posted to a guild's logging channel.

use crate::engine::{Exemption, FilterMatch, FilterSet, Verdict};
use crate::pattern::FilterMatcher;
use crate::Snowflake;

const NONE: &str = "*None*";

fn bullet(line: impl AsRef<str>) -> String {
    format!(" • {}", line.as_ref())
}

fn bulleted<T>(items: &[T], describe: impl Fn(&T) -> String) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(
            items
                .iter()
                .map(|item| bullet(describe(item)))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

pub fn filter_list(set: FilterSet, filters: &[FilterMatcher]) -> String {
    match bulleted(filters, FilterMatcher::describe) {
        Some(list) => {
            format!("Currently, messages are being explicitly {set} based on these filters:\n{list}")
        }
        None => format!("Currently, no messages are explicitly {set}."),
    }
}

pub fn exemption_list(exemptions: &[Exemption]) -> String {
    match bulleted(exemptions, Exemption::describe) {
        Some(list) => {
            format!("Currently, the following targets are exempt from message filters:\n{list}")
        }
        None => "Currently, no targets are exempt from message filters.".to_string(),
    }
}

fn describe_match(found: &FilterMatch) -> String {
    format!(
        "`{text}` (`{low}-{high}`, {filter})",
        text = found.span.text().replace('\n', ""),
        low = found.span.low(),
        high = found.span.high(),
        filter = found.filter.describe()
    )
}

fn applied_filters(verdict: &Verdict) -> Option<String> {
    bulleted(&verdict.applied_filters(), |filter| filter.describe())
}

/// What a dry run found, section by section.
pub fn test_report(verdict: &Verdict) -> String {
    let forbidden = bulleted(verdict.forbidden_matches(), describe_match);
    let allowed = bulleted(verdict.allowed_matches(), describe_match);
    let applied = applied_filters(verdict);
    format!(
        "**Filter Result for**\n```\n{text}\n```\n\
        **Forbidden Matches**\n{forbidden}\n\n\
        **Allowed Matches**\n{allowed}\n\n\
        **Applied Filters**\n{applied}",
        text = verdict.text().as_str(),
        forbidden = forbidden.as_deref().unwrap_or(NONE),
        allowed = allowed.as_deref().unwrap_or(NONE),
        applied = applied.as_deref().unwrap_or(NONE),
    )
}

/// The note for a guild's logging channel when a message is filtered.
pub fn filtered_message(
    author_id: Snowflake,
    channel_id: Snowflake,
    after_edit: bool,
    verdict: &Verdict,
) -> String {
    let after_edit = if after_edit { " after edit" } else { "" };
    format!(
        "Message by <@{author_id}> deleted from <#{channel_id}>{after_edit}.\n\nApplied filters:\n{applied}",
        applied = applied_filters(verdict).as_deref().unwrap_or(NONE),
    )
}
