//! Error types for Govscope Core

use thiserror::Error;

/// Defects detected while folding vote records into the matrix. These can
/// only arise from a broken upstream dedup step, so callers should treat
/// them as fatal: summaries built over such input are untrustworthy.
#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("duplicate vote by {delegate} on proposal {proposal}")]
    DuplicateVote { delegate: String, proposal: String },

    #[error("negative vote weight by {delegate} on proposal {proposal}")]
    NegativeWeight { delegate: String, proposal: String },
}

pub type MatrixResult<T> = Result<T, MatrixError>;
