use skein_core::VersionHistoryError;
use skein_storage::StorageError;

use crate::resend::RetryReplication;

/// Failure classes the replication layer distinguishes when deciding what to
/// do with a failed resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local history lacks the base point; ask the peer to resend.
    BranchDivergence,
    /// A fork or read against the history store failed.
    StoreFailure,
    /// The replayed event stream has a gap, is out of order, or does not
    /// describe a valid run.
    ReplayCorruption,
    /// The run's context lock could not be acquired in time.
    LockTimeout,
    /// The call was abandoned before it finished.
    Cancelled,
    NotFound,
    Internal,
}

/// All errors surfaced by the conflict resolver and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NdcError {
    /// Branch divergence: the peer must resend the described event range.
    #[error("{0}")]
    RetryReplication(Box<RetryReplication>),

    #[error("history store failure: {0}")]
    Store(#[from] StorageError),

    #[error("replay corruption at event {event_id} of {workflow}: {message}")]
    ReplayCorruption {
        workflow: String,
        event_id: i64,
        message: String,
    },

    #[error("timed out after {timeout_ms}ms acquiring context lock of {workflow}")]
    LockTimeout { workflow: String, timeout_ms: u64 },

    #[error("operation cancelled before completion")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid version history: {0}")]
    InvalidVersionHistory(#[from] VersionHistoryError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NdcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NdcError::RetryReplication(_) => ErrorKind::BranchDivergence,
            NdcError::Store(_) => ErrorKind::StoreFailure,
            NdcError::ReplayCorruption { .. } => ErrorKind::ReplayCorruption,
            NdcError::LockTimeout { .. } => ErrorKind::LockTimeout,
            NdcError::Cancelled => ErrorKind::Cancelled,
            NdcError::NotFound(_) => ErrorKind::NotFound,
            NdcError::InvalidVersionHistory(_) | NdcError::Config(_) | NdcError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether retrying the whole resolve call can succeed without outside
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StoreFailure | ErrorKind::LockTimeout | ErrorKind::Cancelled
        )
    }

    /// The resend request carried by a branch-divergence error.
    pub fn as_retry_replication(&self) -> Option<&RetryReplication> {
        match self {
            NdcError::RetryReplication(resend) => Some(resend),
            _ => None,
        }
    }
}

impl From<RetryReplication> for NdcError {
    fn from(resend: RetryReplication) -> Self {
        NdcError::RetryReplication(Box::new(resend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let resend = RetryReplication::reset_workflow("ns", "wf", "run-2", 5, 1);
        assert_eq!(NdcError::from(resend).kind(), ErrorKind::BranchDivergence);
        assert_eq!(
            NdcError::Store(StorageError::Backend("down".to_string())).kind(),
            ErrorKind::StoreFailure
        );
        assert_eq!(
            NdcError::ReplayCorruption {
                workflow: "ns/wf/run".to_string(),
                event_id: 3,
                message: "gap".to_string(),
            }
            .kind(),
            ErrorKind::ReplayCorruption
        );
        // a store that lost the branch is still a store failure; only the
        // rebuilder reports unknown branches as not found
        assert_eq!(
            NdcError::Store(StorageError::BranchNotFound {
                branch_id: "b".to_string()
            })
            .kind(),
            ErrorKind::StoreFailure
        );
        assert_eq!(
            NdcError::NotFound("history branch b".to_string()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(NdcError::Store(StorageError::Backend("down".to_string())).is_retryable());
        assert!(NdcError::LockTimeout {
            workflow: "ns/wf/run".to_string(),
            timeout_ms: 10,
        }
        .is_retryable());
        assert!(NdcError::Cancelled.is_retryable());
        assert!(!NdcError::ReplayCorruption {
            workflow: "ns/wf/run".to_string(),
            event_id: 1,
            message: "order".to_string(),
        }
        .is_retryable());
        let resend = RetryReplication::reset_workflow("ns", "wf", "run-2", 5, 1);
        assert!(!NdcError::from(resend).is_retryable());
    }
}
