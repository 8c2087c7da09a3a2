//! Per-guild message content filtering for a Discord moderation bot.
//!
//! Guilds keep a set of forbidden filters and a set of allowed filters. A message violates
//! the guild's policy if a forbidden filter matches somewhere that no allowed filter match
//! overlaps. Exemptions by user, role or channel bypass filtering entirely.

pub mod config;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod pattern;
pub mod report;
pub mod scan;
pub mod service;
pub mod setup;
pub mod store;

/// Discord ID of a guild, user, role or channel.
pub type Snowflake = u64;

pub use crate::engine::{Evaluation, Exemption, ExemptionKind, FilterSet, MessageMeta, Verdict};
pub use crate::error::{FilterError, Result};
pub use crate::pattern::{FilterKind, FilterMatcher};
pub use crate::service::FilterService;
