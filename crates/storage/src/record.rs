use serde::{Deserialize, Serialize};
use skein_core::{BranchToken, HistoryEvent};

/// Append a contiguous run of events to the tip of a branch.
#[derive(Debug, Clone)]
pub struct AppendHistoryNodesRequest {
    pub branch_token: BranchToken,
    pub events: Vec<HistoryEvent>,
    /// Monotonic id of the writing transaction. Durable backends persist it
    /// with each node; the in-memory store only logs it.
    pub transaction_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendHistoryNodesResponse {
    /// Bytes written for this batch.
    pub size: usize,
}

/// Fork `fork_branch_token` so the new branch shares nodes
/// `[FIRST_EVENT_ID, fork_node_id)` and grows independently from
/// `fork_node_id` on.
#[derive(Debug, Clone)]
pub struct ForkHistoryBranchRequest {
    pub fork_branch_token: BranchToken,
    pub fork_node_id: i64,
    /// Garbage-collection tag, see [`build_history_garbage_cleanup_info`].
    pub info: String,
    pub shard_id: i32,
    pub namespace_id: String,
    pub new_run_id: String,
}

#[derive(Debug, Clone)]
pub struct ForkHistoryBranchResponse {
    pub new_branch_token: BranchToken,
}

/// Read nodes `[min_node_id, max_node_id)` of a branch, walking ancestors.
#[derive(Debug, Clone)]
pub struct ReadHistoryBranchRequest {
    pub shard_id: i32,
    pub branch_token: BranchToken,
    pub min_node_id: i64,
    pub max_node_id: i64,
    /// Maximum events per page (0 = no limit).
    pub page_size: usize,
    /// Token from the previous page; `None` starts at `min_node_id`.
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ReadHistoryBranchResponse {
    /// Events of this page in ascending event id order.
    pub events: Vec<HistoryEvent>,
    /// Stored bytes of the events in this page.
    pub size: usize,
    /// `None` once the range is exhausted.
    pub next_page_token: Option<Vec<u8>>,
}

/// One live branch of a history tree, as listed for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBranchDetail {
    pub tree_id: String,
    pub branch_id: String,
    pub branch_token: BranchToken,
    pub info: String,
}

/// Tag recorded on a forked branch so orphaned forks can be traced back to
/// the run that created them and swept if that run never materializes.
pub fn build_history_garbage_cleanup_info(
    namespace_id: &str,
    workflow_id: &str,
    run_id: &str,
) -> String {
    format!("{namespace_id}:{workflow_id}:{run_id}")
}

// ── Child execution map rows ─────────────────────────────────────────────────

/// A row of a run's child-execution map: one pending child workflow keyed by
/// the event id that initiated it. `data` is an opaque encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExecutionInfoMapsRow {
    pub shard_id: i32,
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub initiated_id: i64,
    pub data: Vec<u8>,
    pub data_encoding: String,
}

/// Selects specific rows of one run by initiated id.
#[derive(Debug, Clone)]
pub struct ChildExecutionInfoMapsFilter {
    pub shard_id: i32,
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub initiated_ids: Vec<i64>,
}

/// Selects every row of one run.
#[derive(Debug, Clone)]
pub struct ChildExecutionInfoMapsAllFilter {
    pub shard_id: i32,
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
}
