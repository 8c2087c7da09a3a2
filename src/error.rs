//! Error types for the filtering engine.

use crate::engine::{ExemptionKind, FilterSet};
use crate::pattern::FilterKind;
use crate::Snowflake;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid {kind} filter `{pattern}`: {message}")]
    InvalidPattern {
        kind: FilterKind,
        pattern: String,
        message: String,
    },

    #[error("This {kind} filter already exists in the {set} set: `{pattern}`")]
    DuplicateFilter {
        set: FilterSet,
        kind: FilterKind,
        pattern: String,
    },

    #[error("There already exists an exemption for {kind} {target}")]
    DuplicateExemption { kind: ExemptionKind, target: Snowflake },

    #[error("No {what} found")]
    NotFound { what: String },

    /// Persistence collaborator failure, passed through as-is.
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    /// Text normalizer failure, passed through as-is.
    #[error(transparent)]
    Normalize(anyhow::Error),
}

impl FilterError {
    /// Expected, caller-visible conditions that reject an administrative request.
    /// Anything else is a collaborator failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::DuplicateFilter { .. }
                | Self::DuplicateExemption { .. }
                | Self::NotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
