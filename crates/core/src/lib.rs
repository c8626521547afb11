//! skein-core: value types shared by the history store and the
//! replication conflict resolver.
//!
//! Nothing in this crate performs I/O. It defines how a workflow run is
//! addressed ([`WorkflowKey`]), how a forkable history branch is referenced
//! ([`BranchToken`]), the per-branch version lineage used to detect
//! cross-region divergence ([`VersionHistory`], [`VersionHistories`]) and the
//! event records stored on a branch ([`HistoryEvent`]).

pub mod branch;
pub mod event;
pub mod key;
pub mod version_history;

/// Sentinel event id meaning "no event". Used as the open start of a
/// resend range.
pub const EMPTY_EVENT_ID: i64 = 0;
/// Sentinel version meaning "no version".
pub const EMPTY_VERSION: i64 = 0;
/// Id of the first event of every run; also the root node of every branch.
pub const FIRST_EVENT_ID: i64 = 1;

// ── Convenience re-exports ───────────────────────────────────────────

pub use branch::BranchToken;
pub use event::{EventAttributes, HistoryEvent};
pub use key::WorkflowKey;
pub use version_history::{
    VersionHistories, VersionHistory, VersionHistoryError, VersionHistoryItem,
};
