//! The pure part of message filtering: filter sets, exemptions, overlap resolution and
//! evaluation. Nothing in here does I/O or holds shared mutable state.

mod collection;
mod evaluate;
mod exemption;
mod overlap;

pub use collection::{FilterCollection, FilterSet};
pub use evaluate::{dry_run, evaluate, Evaluation, GuildSnapshot, SkipReason, Verdict};
pub use exemption::{
    add_exemption_record, remove_exemption_record, Exemption, ExemptionKind, ExemptionSet,
    MessageMeta,
};
pub use overlap::{resolve, FilterMatch, IntervalIndex};
