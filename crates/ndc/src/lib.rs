//! skein-ndc: replication conflict resolution.
//!
//! When events replicated from a peer cluster fork from a different point
//! than this cluster's current branch, the [`Resetter`]:
//!
//! 1. locks the base run through a [`TransactionManager`],
//! 2. finds the local lineage containing the base point (or asks the peer to
//!    resend with [`RetryReplication`]),
//! 3. forks the history right after that point,
//! 4. rebuilds the new run's [`MutableState`] with the [`StateRebuilder`],
//! 5. clears any stale cached context of the new run,
//!
//! and releases the base run's lock with the outcome on every path.

mod cache;
mod child_rows;
mod config;
mod error;
mod execution_store;
mod mutable_state;
mod resend;
mod resetter;
mod shard;
mod state_builder;
mod state_rebuilder;
mod transaction;

pub use cache::ExecutionCache;
pub use child_rows::{
    child_execution_rows, decode_child_execution_row, CHILD_EXECUTION_DATA_ENCODING,
};
pub use config::NdcConfig;
pub use error::{ErrorKind, NdcError};
pub use execution_store::{ExecutionStore, InMemoryExecutionStore};
pub use mutable_state::{
    ActivityInfo, ChildExecutionInfo, ExecutionInfo, ExpirationTask, MutableState, TimerInfo,
    WorkflowStatus,
};
pub use resend::{RetryReplication, RESEND_ON_RESET_WORKFLOW_MESSAGE};
pub use resetter::{BaseBranch, Resetter};
pub use shard::Shard;
pub use state_rebuilder::{RebuildRequest, StateRebuilder};
pub use transaction::{LockedWorkflow, ReleaseFn, TransactionManager, WorkflowContext};
