//! Error taxonomy for the scoring pipeline.
//!
//! Row-level data problems are not errors here: they are counted in
//! [`DropCounts`](crate::types::transaction::DropCounts) and the run continues.

/// Fatal errors raised by pipeline stages and the anomaly model.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A source cannot be mapped onto the canonical schema.
    #[error("schema error in source '{source_name}': {reason}")]
    Schema { source_name: String, reason: String },

    /// The ensemble could not be fitted. Any previously fitted state is untouched.
    #[error("fit error: {reason}")]
    Fit { reason: String },

    /// The model was called with input it cannot accept.
    #[error("contract error: {reason}")]
    Contract { reason: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl PipelineError {
    pub fn schema(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn fit(reason: impl Into<String>) -> Self {
        Self::Fit {
            reason: reason.into(),
        }
    }

    pub fn contract(reason: impl Into<String>) -> Self {
        Self::Contract {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
