use async_trait::async_trait;
use skein_core::BranchToken;

use crate::error::StorageError;
use crate::record::{
    AppendHistoryNodesRequest, AppendHistoryNodesResponse, ChildExecutionInfoMapsAllFilter,
    ChildExecutionInfoMapsFilter, ChildExecutionInfoMapsRow, ForkHistoryBranchRequest,
    ForkHistoryBranchResponse, HistoryBranchDetail, ReadHistoryBranchRequest,
    ReadHistoryBranchResponse,
};

/// The durable, forkable event log.
///
/// ## Tree and branch model
///
/// Every run's history is a tree identified by a `tree_id`. A tree starts with
/// one root branch ([`new_history_branch`](HistoryStore::new_history_branch));
/// [`fork_history_branch`](HistoryStore::fork_history_branch) creates a new
/// branch that shares the source branch's nodes below the fork point and
/// grows independently above it. Node ids equal event ids.
///
/// ## Ordering
///
/// Appends must continue the branch tip without gaps. Reads return events in
/// ascending id order across ancestor boundaries.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static`. Concurrent forks from
/// different (or the same) source branches must each yield a distinct branch.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Create an empty root branch for a new history tree.
    async fn new_history_branch(&self, tree_id: &str) -> Result<BranchToken, StorageError>;

    /// Append events at the branch tip.
    ///
    /// Returns `Err(StorageError::AppendConflict)` if the first event does not
    /// immediately follow the current tip or the batch itself has a gap.
    async fn append_history_nodes(
        &self,
        request: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, StorageError>;

    /// Fork a new branch at `fork_node_id`.
    ///
    /// Returns `Err(StorageError::BranchNotFound)` if the source branch is
    /// unknown and `Err(StorageError::InvalidForkPoint)` if the fork node is
    /// the root or lies beyond one past the tip.
    async fn fork_history_branch(
        &self,
        request: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, StorageError>;

    /// Read one page of events in `[min_node_id, max_node_id)`.
    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, StorageError>;

    /// List the live branches of a tree (garbage-collection surface).
    async fn get_history_tree(&self, tree_id: &str)
        -> Result<Vec<HistoryBranchDetail>, StorageError>;

    /// Delete a branch. Nodes still shared with other live branches survive.
    async fn delete_history_branch(&self, branch_token: &BranchToken)
        -> Result<(), StorageError>;
}

/// Persisted child-execution maps. Plain CRUD, keyed by
/// `(shard_id, namespace_id, workflow_id, run_id, initiated_id)`.
#[async_trait]
pub trait ChildExecutionStore: Send + Sync + 'static {
    /// Insert or replace rows. Returns the number of rows written.
    async fn replace_into_child_execution_info_maps(
        &self,
        rows: Vec<ChildExecutionInfoMapsRow>,
    ) -> Result<u64, StorageError>;

    /// All rows of one run, ordered by initiated id.
    async fn select_all_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsAllFilter,
    ) -> Result<Vec<ChildExecutionInfoMapsRow>, StorageError>;

    /// Delete the listed initiated ids of one run. Returns rows removed.
    async fn delete_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsFilter,
    ) -> Result<u64, StorageError>;

    /// Delete every row of one run. Returns rows removed.
    async fn delete_all_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsAllFilter,
    ) -> Result<u64, StorageError>;
}
