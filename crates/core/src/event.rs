//! History events: the immutable, ordered facts appended to a run's branch.
//!
//! Every event carries its position (`event_id`), the cluster version that
//! produced it, and a typed payload. Replaying a branch's events in order
//! reconstructs the run's derived execution state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One event on a history branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub version: i64,
    #[serde(with = "time::serde::timestamp")]
    pub event_time: OffsetDateTime,
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(
        event_id: i64,
        version: i64,
        event_time: OffsetDateTime,
        attributes: EventAttributes,
    ) -> Self {
        HistoryEvent {
            event_id,
            version,
            event_time,
            attributes,
        }
    }

    /// Serialized size in bytes. This is the unit history size accounting
    /// is done in.
    pub fn encoded_size(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }
}

/// Typed event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_type: String,
        task_queue: String,
        /// Run timeout in seconds; `None` means the run never expires.
        run_timeout_secs: Option<i64>,
    },
    WorkflowExecutionSignaled {
        signal_name: String,
    },
    ActivityTaskScheduled {
        activity_id: String,
        activity_type: String,
    },
    ActivityTaskStarted {
        scheduled_event_id: i64,
        attempt: i32,
    },
    ActivityTaskCompleted {
        scheduled_event_id: i64,
    },
    ActivityTaskFailed {
        scheduled_event_id: i64,
        reason: String,
    },
    ActivityTaskTimedOut {
        scheduled_event_id: i64,
    },
    ActivityTaskCanceled {
        scheduled_event_id: i64,
    },
    TimerStarted {
        timer_id: String,
        fire_after_secs: i64,
    },
    TimerFired {
        timer_id: String,
    },
    TimerCanceled {
        timer_id: String,
    },
    StartChildWorkflowExecutionInitiated {
        workflow_id: String,
        workflow_type: String,
    },
    ChildWorkflowExecutionStarted {
        initiated_event_id: i64,
        run_id: String,
    },
    ChildWorkflowExecutionCompleted {
        initiated_event_id: i64,
    },
    ChildWorkflowExecutionFailed {
        initiated_event_id: i64,
    },
    ChildWorkflowExecutionCanceled {
        initiated_event_id: i64,
    },
    ChildWorkflowExecutionTimedOut {
        initiated_event_id: i64,
    },
    ChildWorkflowExecutionTerminated {
        initiated_event_id: i64,
    },
    WorkflowExecutionCompleted {},
    WorkflowExecutionFailed {
        reason: String,
    },
    WorkflowExecutionCanceled {},
    WorkflowExecutionTerminated {
        reason: String,
    },
    WorkflowExecutionTimedOut {},
    WorkflowExecutionContinuedAsNew {
        new_run_id: String,
    },
}

impl EventAttributes {
    /// Stable snake_case name, matching the serialized `event_type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventAttributes::WorkflowExecutionStarted { .. } => "workflow_execution_started",
            EventAttributes::WorkflowExecutionSignaled { .. } => "workflow_execution_signaled",
            EventAttributes::ActivityTaskScheduled { .. } => "activity_task_scheduled",
            EventAttributes::ActivityTaskStarted { .. } => "activity_task_started",
            EventAttributes::ActivityTaskCompleted { .. } => "activity_task_completed",
            EventAttributes::ActivityTaskFailed { .. } => "activity_task_failed",
            EventAttributes::ActivityTaskTimedOut { .. } => "activity_task_timed_out",
            EventAttributes::ActivityTaskCanceled { .. } => "activity_task_canceled",
            EventAttributes::TimerStarted { .. } => "timer_started",
            EventAttributes::TimerFired { .. } => "timer_fired",
            EventAttributes::TimerCanceled { .. } => "timer_canceled",
            EventAttributes::StartChildWorkflowExecutionInitiated { .. } => {
                "start_child_workflow_execution_initiated"
            }
            EventAttributes::ChildWorkflowExecutionStarted { .. } => {
                "child_workflow_execution_started"
            }
            EventAttributes::ChildWorkflowExecutionCompleted { .. } => {
                "child_workflow_execution_completed"
            }
            EventAttributes::ChildWorkflowExecutionFailed { .. } => {
                "child_workflow_execution_failed"
            }
            EventAttributes::ChildWorkflowExecutionCanceled { .. } => {
                "child_workflow_execution_canceled"
            }
            EventAttributes::ChildWorkflowExecutionTimedOut { .. } => {
                "child_workflow_execution_timed_out"
            }
            EventAttributes::ChildWorkflowExecutionTerminated { .. } => {
                "child_workflow_execution_terminated"
            }
            EventAttributes::WorkflowExecutionCompleted {} => "workflow_execution_completed",
            EventAttributes::WorkflowExecutionFailed { .. } => "workflow_execution_failed",
            EventAttributes::WorkflowExecutionCanceled {} => "workflow_execution_canceled",
            EventAttributes::WorkflowExecutionTerminated { .. } => {
                "workflow_execution_terminated"
            }
            EventAttributes::WorkflowExecutionTimedOut {} => "workflow_execution_timed_out",
            EventAttributes::WorkflowExecutionContinuedAsNew { .. } => {
                "workflow_execution_continued_as_new"
            }
        }
    }

    /// True for events that close the run. Nothing may follow them.
    pub fn is_close_event(&self) -> bool {
        matches!(
            self,
            EventAttributes::WorkflowExecutionCompleted {}
                | EventAttributes::WorkflowExecutionFailed { .. }
                | EventAttributes::WorkflowExecutionCanceled {}
                | EventAttributes::WorkflowExecutionTerminated { .. }
                | EventAttributes::WorkflowExecutionTimedOut {}
                | EventAttributes::WorkflowExecutionContinuedAsNew { .. }
        )
    }
}
