//! Message pipeline adapter: newline-delimited JSON messages in, one JSON outcome per
//! message out. Whatever forwards gateway events can pipe them through this and act on
//! the `violation` records (delete, notify the author, post to the logging channel).

use crate::config::snowflake;
use crate::engine::{Evaluation, FilterMatch, MessageMeta, SkipReason};
use crate::report;
use crate::service::FilterService;
use crate::store::GuildStore;
use crate::Snowflake;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    /// Echoed back so the caller can correlate outcomes with messages.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(deserialize_with = "snowflake::deserialize")]
    pub guild_id: Snowflake,
    #[serde(deserialize_with = "snowflake::deserialize")]
    pub author_id: Snowflake,
    /// Display form of the author, for logs.
    #[serde(default)]
    pub author_tag: Option<String>,
    #[serde(deserialize_with = "snowflake::deserialize")]
    pub channel_id: Snowflake,
    #[serde(default, deserialize_with = "snowflake::deserialize_list")]
    pub role_ids: Vec<Snowflake>,
    pub content: String,
    /// True if this is an edit of an earlier message.
    #[serde(default)]
    pub edited: bool,
}

impl InboundMessage {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            author_id: self.author_id,
            role_ids: self.role_ids.iter().copied().collect(),
            channel_id: self.channel_id,
        }
    }

    fn author(&self) -> String {
        self.author_tag
            .clone()
            .unwrap_or_else(|| self.author_id.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(with = "snowflake")]
    pub guild_id: Snowflake,
    #[serde(flatten)]
    pub outcome: ScanOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Skipped {
        reason: SkipReason,
    },
    Clean,
    Violation {
        violations: Vec<ViolationRecord>,
        applied_filters: Vec<String>,
        after_edit: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        logging_channel: Option<String>,
        /// Ready-made note for the logging channel.
        report: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    pub kind: String,
    pub pattern: String,
    pub text: String,
    pub low: usize,
    pub high: usize,
}

impl From<&FilterMatch> for ViolationRecord {
    fn from(found: &FilterMatch) -> Self {
        Self {
            kind: found.filter.kind().to_string(),
            pattern: found.filter.pattern().to_string(),
            text: found.span.text().to_string(),
            low: found.span.low(),
            high: found.span.high(),
        }
    }
}

/// Evaluate one message against its guild's configuration.
pub fn scan_message<S: GuildStore>(
    service: &FilterService<S>,
    message: &InboundMessage,
) -> Result<ScanRecord> {
    let guild_id = message.guild_id;
    let outcome = match service.evaluate(guild_id, &message.content, &message.meta())? {
        Evaluation::Skipped(reason) => ScanOutcome::Skipped { reason },
        Evaluation::Evaluated(verdict) if !verdict.is_violation() => ScanOutcome::Clean,
        Evaluation::Evaluated(verdict) => {
            info!(
                "Filtered out message by {author} in {channel} on {guild_id}{after_edit}",
                author = message.author(),
                channel = message.channel_id,
                after_edit = if message.edited { " after edit" } else { "" }
            );
            ScanOutcome::Violation {
                violations: verdict.violations().iter().map(ViolationRecord::from).collect(),
                applied_filters: verdict
                    .applied_filters()
                    .into_iter()
                    .map(|filter| filter.describe())
                    .collect(),
                after_edit: message.edited,
                logging_channel: service
                    .logging_channel(guild_id)?
                    .map(|channel_id| channel_id.to_string()),
                report: report::filtered_message(
                    message.author_id,
                    message.channel_id,
                    message.edited,
                    &verdict,
                ),
            }
        }
    };
    Ok(ScanRecord {
        message_id: message.message_id.clone(),
        guild_id,
        outcome,
    })
}

/// Process a stream of messages, one JSON object per line. Unparseable lines and messages
/// that can't be evaluated are logged and skipped. Returns the number of records written.
pub fn scan<S: GuildStore>(
    service: &FilterService<S>,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<usize> {
    let mut written = 0;
    for (line_number, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping unparseable line {number}: {e}", number = line_number + 1);
                continue;
            }
        };
        let record = match scan_message(service, &message) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Skipping message on line {number} for guild {guild_id}: {e}",
                    number = line_number + 1,
                    guild_id = message.guild_id
                );
                continue;
            }
        };
        serde_json::to_writer(&mut output, &record)?;
        output.write_all(b"\n")?;
        written += 1;
    }
    output.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Exemption, FilterSet};
    use crate::normalize::MarkdownNormalizer;
    use crate::pattern::{CompileOptions, FilterKind};
    use crate::config::GuildConfig;
    use crate::store::MemoryStore;
    use anyhow::bail;
    use serde_json::{json, Value};

    /// Storage that fails for one guild.
    struct Unreadable {
        inner: MemoryStore,
        guild_id: Snowflake,
    }

    impl GuildStore for Unreadable {
        fn load(&self, guild_id: Snowflake) -> Result<GuildConfig> {
            if guild_id == self.guild_id {
                bail!("Storage unavailable for {guild_id}");
            }
            self.inner.load(guild_id)
        }

        fn save(&self, config: &GuildConfig) -> Result<()> {
            self.inner.save(config)
        }
    }

    async fn service() -> FilterService<MemoryStore> {
        let service = FilterService::new(
            MemoryStore::new(),
            MarkdownNormalizer,
            CompileOptions::default(),
        );
        service
            .add_filter(1, FilterSet::Forbidden, FilterKind::Literal, "ass")
            .await
            .expect("Couldn't add");
        service
            .add_filter(1, FilterSet::Allowed, FilterKind::Word, "class")
            .await
            .expect("Couldn't add");
        service
            .add_exemption(1, Exemption::role(9))
            .await
            .expect("Couldn't add");
        service
            .set_logging_channel(1, 77)
            .await
            .expect("Couldn't set");
        service
    }

    fn run<S: GuildStore>(service: &FilterService<S>, input: &str) -> Vec<Value> {
        let mut output = vec![];
        scan(service, input.as_bytes(), &mut output).expect("Couldn't scan");
        String::from_utf8(output)
            .expect("Output wasn't UTF-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("Output wasn't JSON"))
            .collect()
    }

    #[tokio::test]
    async fn test_outcomes() {
        let service = service().await;
        let input = [
            r#"{"message_id": "a", "guild_id": "1", "author_id": "2", "channel_id": "3", "content": "first class"}"#,
            r#"{"message_id": "b", "guild_id": "1", "author_id": "2", "channel_id": "3", "role_ids": ["9"], "content": "kick ass"}"#,
            r#"{"message_id": "c", "guild_id": 2, "author_id": 2, "channel_id": 3, "content": "kick ass"}"#,
            r#"{"message_id": "d", "guild_id": "1", "author_id": "2", "channel_id": "3", "content": "kick **a**ss", "edited": true}"#,
        ]
        .join("\n");
        let records = run(&service, &input);
        assert_eq!(
            vec![
                json!({"message_id": "a", "guild_id": "1", "outcome": "clean"}),
                json!({"message_id": "b", "guild_id": "1", "outcome": "skipped", "reason": "exempt"}),
                json!({"message_id": "c", "guild_id": "2", "outcome": "skipped", "reason": "no-filters"}),
                json!({
                    "message_id": "d",
                    "guild_id": "1",
                    "outcome": "violation",
                    "violations": [
                        {"kind": "literal", "pattern": "ass", "text": "ass", "low": 5, "high": 8}
                    ],
                    "applied_filters": ["Contains `ass`"],
                    "after_edit": true,
                    "logging_channel": "77",
                    "report": "Message by <@2> deleted from <#3> after edit.\n\nApplied filters:\n • Contains `ass`"
                }),
            ],
            records
        );
    }

    #[tokio::test]
    async fn test_bad_lines_are_skipped() {
        let service = service().await;
        let input = "not json\n\n{\"guild_id\": \"1\"}\n\
            {\"guild_id\": \"1\", \"author_id\": \"2\", \"channel_id\": \"3\", \"content\": \"ass\"}\n";
        let records = run(&service, input);
        assert_eq!(1, records.len());
        assert_eq!("violation", records[0]["outcome"]);
        assert!(records[0].get("message_id").is_none());
    }

    #[tokio::test]
    async fn test_storage_failures_skip_only_that_message() {
        let service = FilterService::new(
            Unreadable {
                inner: MemoryStore::new(),
                guild_id: 13,
            },
            MarkdownNormalizer,
            CompileOptions::default(),
        );
        service
            .add_filter(1, FilterSet::Forbidden, FilterKind::Literal, "ass")
            .await
            .expect("Couldn't add");
        let input = [
            r#"{"message_id": "a", "guild_id": "13", "author_id": "2", "channel_id": "3", "content": "ass"}"#,
            r#"{"message_id": "b", "guild_id": "1", "author_id": "2", "channel_id": "3", "content": "ass"}"#,
        ]
        .join("\n");
        let records = run(&service, &input);
        assert_eq!(1, records.len());
        assert_eq!("b", records[0]["message_id"]);
        assert_eq!("violation", records[0]["outcome"]);
    }
}
