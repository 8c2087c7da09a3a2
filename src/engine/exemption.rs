use crate::config::StoredExemption;
use crate::error::{FilterError, Result};
use crate::Snowflake;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptionKind {
    User,
    Role,
    Channel,
}

impl fmt::Display for ExemptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Channel => "channel",
        })
    }
}

impl FromStr for ExemptionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "role" => Ok(Self::Role),
            "channel" => Ok(Self::Channel),
            _ => Err(format!("Unknown exemption kind: {s}")),
        }
    }
}

/// What the exemption check needs to know about a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageMeta {
    pub author_id: Snowflake,
    /// Roles the author holds in the message's guild.
    pub role_ids: HashSet<Snowflake>,
    pub channel_id: Snowflake,
}

/// Messages by this user, from members with this role, or in this channel bypass filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Exemption {
    pub kind: ExemptionKind,
    pub target: Snowflake,
}

impl Exemption {
    pub fn user(target: Snowflake) -> Self {
        Self {
            kind: ExemptionKind::User,
            target,
        }
    }

    pub fn role(target: Snowflake) -> Self {
        Self {
            kind: ExemptionKind::Role,
            target,
        }
    }

    pub fn channel(target: Snowflake) -> Self {
        Self {
            kind: ExemptionKind::Channel,
            target,
        }
    }

    pub fn test(&self, message: &MessageMeta) -> bool {
        match self.kind {
            ExemptionKind::User => message.author_id == self.target,
            ExemptionKind::Role => message.role_ids.contains(&self.target),
            ExemptionKind::Channel => message.channel_id == self.target,
        }
    }

    pub fn describe(&self) -> String {
        let target = self.target;
        match self.kind {
            ExemptionKind::User => format!("User <@{target}>"),
            ExemptionKind::Role => format!("Role <@&{target}>"),
            ExemptionKind::Channel => format!("Channel <#{target}>"),
        }
    }

    pub fn serialize(&self) -> StoredExemption {
        StoredExemption {
            kind: self.kind.to_string(),
            target: self.target,
        }
    }

    /// Unknown kinds come back as `None`.
    pub fn deserialize(stored: &StoredExemption) -> Option<Self> {
        let kind = stored.kind.parse().ok()?;
        Some(Self {
            kind,
            target: stored.target,
        })
    }
}

/// A guild's exemptions. A set by `(kind, target)`; insertion order is kept for display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExemptionSet(Vec<Exemption>);

impl ExemptionSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_stored(stored: &[StoredExemption]) -> Self {
        Self(
            stored
                .iter()
                .filter_map(|record| {
                    let exemption = Exemption::deserialize(record);
                    if exemption.is_none() {
                        warn!(
                            "Skipping exemption of unknown kind {kind}: {target}",
                            kind = record.kind,
                            target = record.target
                        );
                    }
                    exemption
                })
                .collect(),
        )
    }

    pub fn list(&self) -> &[Exemption] {
        &self.0
    }

    pub fn add(&mut self, exemption: Exemption) -> Result<()> {
        if self.0.contains(&exemption) {
            return Err(duplicate(exemption));
        }
        self.0.push(exemption);
        Ok(())
    }

    pub fn remove(&mut self, exemption: Exemption) -> Result<usize> {
        let before = self.0.len();
        self.0.retain(|e| *e != exemption);
        let removed = before - self.0.len();
        if removed == 0 {
            return Err(not_found(exemption));
        }
        Ok(removed)
    }

    /// True if any exemption applies to the message.
    pub fn test(&self, message: &MessageMeta) -> bool {
        self.0.iter().any(|e| e.test(message))
    }
}

/// Add to a guild's persisted exemption records, leaving records of unknown kinds alone.
pub fn add_exemption_record(
    records: &mut Vec<StoredExemption>,
    exemption: Exemption,
) -> Result<()> {
    if records.iter().any(|r| Exemption::deserialize(r) == Some(exemption)) {
        return Err(duplicate(exemption));
    }
    records.push(exemption.serialize());
    Ok(())
}

pub fn remove_exemption_record(
    records: &mut Vec<StoredExemption>,
    exemption: Exemption,
) -> Result<usize> {
    let before = records.len();
    records.retain(|r| Exemption::deserialize(r) != Some(exemption));
    let removed = before - records.len();
    if removed == 0 {
        return Err(not_found(exemption));
    }
    Ok(removed)
}

fn duplicate(exemption: Exemption) -> FilterError {
    FilterError::DuplicateExemption {
        kind: exemption.kind,
        target: exemption.target,
    }
}

fn not_found(exemption: Exemption) -> FilterError {
    FilterError::NotFound {
        what: format!(
            "exemption for {kind} {target}",
            kind = exemption.kind,
            target = exemption.target
        ),
    }
}
