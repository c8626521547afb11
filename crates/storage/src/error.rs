/// All errors that can be returned by a history or child-execution store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The branch named by a token is not (or no longer) known to the store.
    #[error("history branch not found: {branch_id}")]
    BranchNotFound { branch_id: String },

    /// The token bytes could not be interpreted by this store.
    #[error("invalid branch token: {0}")]
    InvalidBranchToken(String),

    /// Forks must happen after the root node and no further than one past
    /// the branch tip.
    #[error("invalid fork point {fork_node_id}: branch tip is node {last_node_id}")]
    InvalidForkPoint { fork_node_id: i64, last_node_id: i64 },

    /// Appended events do not continue the branch tip.
    #[error("append conflict: expected event {expected_event_id}, got {actual_event_id}")]
    AppendConflict {
        expected_event_id: i64,
        actual_event_id: i64,
    },

    /// `min_node_id` must be at least the root and below `max_node_id`.
    #[error("invalid read range [{min_node_id}, {max_node_id})")]
    InvalidReadRange { min_node_id: i64, max_node_id: i64 },

    /// The pagination token was not issued by this store.
    #[error("invalid page token")]
    InvalidPageToken,

    /// Encoding or decoding a stored payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend-specific storage error (DB connection, timeouts, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::BranchNotFound { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
