//! Consolidation pass errors

use crate::reviewer::ReviewerError;
use thiserror::Error;
use uuid::Uuid;

pub type ConsolidationResult<T> = std::result::Result<T, ConsolidationError>;

#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// Keyspace or locality source failure; stores hold the last committed step
    #[error("Storage failure: {0}")]
    Storage(#[from] locmerge_common::Error),

    /// Reviewer went away or failed mid-decision; the region was not committed
    #[error("Review aborted: {0}")]
    Reviewer(#[from] ReviewerError),

    #[error("Pass cancelled")]
    Cancelled,

    #[error("Pass {0} is still in progress; resume or abandon it first")]
    PassInProgress(Uuid),

    #[error("No pass to resume")]
    NoResumablePass,

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
}

impl ConsolidationError {
    /// True when the persisted pass can be resumed after this failure
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            ConsolidationError::Storage(_)
                | ConsolidationError::Reviewer(_)
                | ConsolidationError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumable_classification() {
        assert!(ConsolidationError::Cancelled.is_resumable());
        assert!(ConsolidationError::from(ReviewerError::Disconnected).is_resumable());
        assert!(
            ConsolidationError::from(locmerge_common::Error::Internal("io".to_string()))
                .is_resumable()
        );
        assert!(!ConsolidationError::NoResumablePass.is_resumable());
        assert!(!ConsolidationError::InvalidDomain("x".to_string()).is_resumable());
    }
}
