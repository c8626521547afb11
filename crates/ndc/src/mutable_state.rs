//! Derived execution state ("mutable state") of one run.
//!
//! A `MutableState` is only ever produced by replaying history
//! (see [`StateRebuilder`](crate::StateRebuilder)); nothing in this crate
//! patches an old run's state into a new one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skein_core::{VersionHistories, WorkflowKey};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
    TimedOut,
    ContinuedAsNew,
}

impl WorkflowStatus {
    pub fn is_open(self) -> bool {
        self == WorkflowStatus::Running
    }
}

/// Run-level attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionInfo {
    pub key: WorkflowKey,
    pub workflow_type: String,
    pub task_queue: String,
    pub start_time: OffsetDateTime,
    pub close_time: Option<OffsetDateTime>,
    pub run_timeout: Option<Duration>,
    /// `start_time + run_timeout`; `None` when the run never expires.
    pub run_expiration_time: Option<OffsetDateTime>,
    pub version_histories: VersionHistories,
    /// Accumulated serialized size of the run's history, in bytes.
    pub history_size: u64,
    pub last_write_version: i64,
    pub signal_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub scheduled_event_id: i64,
    pub version: i64,
    pub activity_id: String,
    pub activity_type: String,
    pub scheduled_time: OffsetDateTime,
    pub started_event_id: Option<i64>,
    pub started_time: Option<OffsetDateTime>,
    pub attempt: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub timer_id: String,
    pub version: i64,
    pub started_event_id: i64,
    pub expiry_time: OffsetDateTime,
}

/// A pending child execution. This is the payload persisted in the
/// child-execution map rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExecutionInfo {
    pub initiated_event_id: i64,
    pub version: i64,
    pub workflow_id: String,
    pub workflow_type: String,
    pub started_event_id: Option<i64>,
    pub started_run_id: Option<String>,
}

/// Run expiry timer scheduled by
/// [`MutableState::refresh_expiration_timeout_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationTask {
    pub fire_at: OffsetDateTime,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutableState {
    pub(crate) execution_info: ExecutionInfo,
    pub(crate) status: WorkflowStatus,
    pub(crate) pending_activities: BTreeMap<i64, ActivityInfo>,
    pub(crate) pending_timers: BTreeMap<String, TimerInfo>,
    pub(crate) pending_children: BTreeMap<i64, ChildExecutionInfo>,
    pub(crate) next_event_id: i64,
    pub(crate) expiration_task: Option<ExpirationTask>,
}

impl MutableState {
    pub fn key(&self) -> &WorkflowKey {
        &self.execution_info.key
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn version_histories(&self) -> &VersionHistories {
        &self.execution_info.version_histories
    }

    /// Lineages of the run, for recording branches created while applying
    /// replicated events.
    pub fn version_histories_mut(&mut self) -> &mut VersionHistories {
        &mut self.execution_info.version_histories
    }

    pub fn pending_activities(&self) -> &BTreeMap<i64, ActivityInfo> {
        &self.pending_activities
    }

    pub fn pending_timers(&self) -> &BTreeMap<String, TimerInfo> {
        &self.pending_timers
    }

    pub fn pending_children(&self) -> &BTreeMap<i64, ChildExecutionInfo> {
        &self.pending_children
    }

    /// Id the next appended event must carry.
    pub fn next_event_id(&self) -> i64 {
        self.next_event_id
    }

    pub fn history_size(&self) -> u64 {
        self.execution_info.history_size
    }

    pub fn expiration_task(&self) -> Option<&ExpirationTask> {
        self.expiration_task.as_ref()
    }

    pub fn add_history_size(&mut self, bytes: u64) {
        self.execution_info.history_size = self.execution_info.history_size.saturating_add(bytes);
    }

    /// Reschedule the run expiry relative to `now`.
    ///
    /// An open run with a timeout fires at its expiration time, or
    /// immediately if that already passed. Closed runs and runs without a
    /// timeout carry no expiry task.
    pub fn refresh_expiration_timeout_task(&mut self, now: OffsetDateTime) {
        self.expiration_task = match (self.status, self.execution_info.run_expiration_time) {
            (WorkflowStatus::Running, Some(expiration)) => Some(ExpirationTask {
                fire_at: expiration.max(now),
                version: self.execution_info.last_write_version,
            }),
            _ => None,
        };
    }
}
