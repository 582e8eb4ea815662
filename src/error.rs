//! Error types for the grant pipeline.
//!
//! Only a missing input source is fatal. Coercion failures and join
//! mismatches are recovered where they happen; their variants exist so the
//! recovering code can log and count them uniformly.

use crate::loader::SourceKind;
use std::path::PathBuf;

/// Main pipeline error type.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An input source could not be located or read.
    #[error("{kind} source unavailable at {}: {cause}", path.display())]
    SourceUnavailable {
        kind: SourceKind,
        path: PathBuf,
        cause: String,
    },

    /// A single cell failed to parse as its expected type.
    #[error("column '{column}': cannot read {value:?} as {expected}")]
    FieldCoercion {
        column: String,
        value: String,
        expected: &'static str,
    },

    /// The cross-reference join could not match anything.
    #[error("cross-reference join degraded: {0}")]
    JoinMismatch(String),

    /// A lexicon pattern could not be compiled.
    #[error("invalid lexicon pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl PipelineError {
    /// Whether the error aborts the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable { .. } | PipelineError::InvalidPattern(_)
        )
    }
}

/// Result alias used across the pipeline stages.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
