//! skein-storage: durable-storage boundaries for Skein.
//!
//! Two stores sit behind async traits:
//!
//! - [`HistoryStore`]: a forkable, append-only event log. Branches are named
//!   by opaque [`BranchToken`](skein_core::BranchToken)s; forking a branch at
//!   a node shares every earlier node with the new branch.
//! - [`ChildExecutionStore`]: the per-run child-execution map rows (plain
//!   CRUD keyed by initiated event id).
//!
//! [`memory`] holds the in-process reference backend and [`conformance`] a
//! backend-agnostic test suite every implementation is expected to pass.

pub mod conformance;
mod error;
pub mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use record::{
    build_history_garbage_cleanup_info, AppendHistoryNodesRequest, AppendHistoryNodesResponse,
    ChildExecutionInfoMapsAllFilter, ChildExecutionInfoMapsFilter, ChildExecutionInfoMapsRow,
    ForkHistoryBranchRequest, ForkHistoryBranchResponse, HistoryBranchDetail,
    ReadHistoryBranchRequest, ReadHistoryBranchResponse,
};
pub use traits::{ChildExecutionStore, HistoryStore};
