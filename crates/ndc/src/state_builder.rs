//! Event application: folds an ordered event stream into a [`MutableState`].

use std::collections::BTreeMap;

use skein_core::{
    BranchToken, EventAttributes, HistoryEvent, VersionHistories, VersionHistory,
    VersionHistoryItem, WorkflowKey, FIRST_EVENT_ID,
};
use time::Duration;

use crate::error::NdcError;
use crate::mutable_state::{
    ActivityInfo, ChildExecutionInfo, ExecutionInfo, MutableState, TimerInfo, WorkflowStatus,
};

/// Incrementally replays events for one target run.
///
/// Events must arrive in strictly increasing id order with no gaps,
/// starting at [`FIRST_EVENT_ID`] and never exceeding `upto_event_id`.
pub(crate) struct StateBuilder {
    key: WorkflowKey,
    branch_token: BranchToken,
    upto_event_id: i64,
    last_event_id: i64,
    state: Option<MutableState>,
}

impl StateBuilder {
    pub(crate) fn new(key: WorkflowKey, branch_token: BranchToken, upto_event_id: i64) -> Self {
        StateBuilder {
            key,
            branch_token,
            upto_event_id,
            last_event_id: FIRST_EVENT_ID - 1,
            state: None,
        }
    }

    pub(crate) fn last_event_id(&self) -> i64 {
        self.last_event_id
    }

    pub(crate) fn apply_events(&mut self, events: &[HistoryEvent]) -> Result<(), NdcError> {
        for event in events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    fn apply_event(&mut self, event: &HistoryEvent) -> Result<(), NdcError> {
        let expected = self.last_event_id + 1;
        if event.event_id != expected {
            let message = if event.event_id > expected {
                format!("gap in history: expected event {expected}")
            } else {
                format!("out of order: expected event {expected}")
            };
            return Err(self.corruption(event.event_id, message));
        }
        if event.event_id > self.upto_event_id {
            return Err(self.corruption(
                event.event_id,
                format!("event beyond requested end {}", self.upto_event_id),
            ));
        }

        match self.state.as_mut() {
            None => {
                let state = self.start(event)?;
                self.state = Some(state);
            }
            Some(state) => {
                if !state.status.is_open() {
                    return Err(self.corruption(
                        event.event_id,
                        format!("{} after the run closed", event.attributes.name()),
                    ));
                }
                let item = VersionHistoryItem::new(event.event_id, event.version);
                if let Err(e) = state
                    .execution_info
                    .version_histories
                    .current_mut()
                    .add_or_update_item(item)
                {
                    return Err(self.corruption(event.event_id, e.to_string()));
                }
                if let Err(message) = apply_to_state(state, event) {
                    return Err(self.corruption(event.event_id, message));
                }
                state.execution_info.last_write_version = event.version;
            }
        }
        self.last_event_id = event.event_id;
        Ok(())
    }

    fn start(&self, event: &HistoryEvent) -> Result<MutableState, NdcError> {
        let EventAttributes::WorkflowExecutionStarted {
            workflow_type,
            task_queue,
            run_timeout_secs,
        } = &event.attributes
        else {
            return Err(self.corruption(
                event.event_id,
                format!(
                    "history must start with workflow_execution_started, found {}",
                    event.attributes.name()
                ),
            ));
        };

        let history = VersionHistory::new(
            self.branch_token.clone(),
            vec![VersionHistoryItem::new(event.event_id, event.version)],
        );
        let version_histories = VersionHistories::new(history)
            .map_err(|e| self.corruption(event.event_id, e.to_string()))?;
        let run_timeout = run_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::seconds);

        Ok(MutableState {
            execution_info: ExecutionInfo {
                key: self.key.clone(),
                workflow_type: workflow_type.clone(),
                task_queue: task_queue.clone(),
                start_time: event.event_time,
                close_time: None,
                run_timeout,
                run_expiration_time: run_timeout.map(|timeout| event.event_time + timeout),
                version_histories,
                history_size: 0,
                last_write_version: event.version,
                signal_count: 0,
            },
            status: WorkflowStatus::Running,
            pending_activities: BTreeMap::new(),
            pending_timers: BTreeMap::new(),
            pending_children: BTreeMap::new(),
            next_event_id: event.event_id + 1,
            expiration_task: None,
        })
    }

    /// Finish replay. The history must have reached `upto_event_id`, and
    /// when `upto_version` is given the current lineage must end exactly at
    /// `(upto_event_id, upto_version)`.
    pub(crate) fn finish(self, upto_version: Option<i64>) -> Result<MutableState, NdcError> {
        let Some(mut state) = self.state else {
            return Err(self.corruption(FIRST_EVENT_ID, "no events replayed".to_string()));
        };
        if self.last_event_id != self.upto_event_id {
            let message = format!(
                "history ended at event {}, expected {}",
                self.last_event_id, self.upto_event_id
            );
            return Err(NdcError::ReplayCorruption {
                workflow: self.key.to_string(),
                event_id: self.last_event_id,
                message,
            });
        }
        if let Some(version) = upto_version {
            let expected = VersionHistoryItem::new(self.upto_event_id, version);
            let last = state.execution_info.version_histories.current().last_item()?;
            if last != expected {
                return Err(NdcError::ReplayCorruption {
                    workflow: self.key.to_string(),
                    event_id: self.upto_event_id,
                    message: format!("replayed lineage ends at {last}, expected {expected}"),
                });
            }
        }
        state.next_event_id = self.last_event_id + 1;
        Ok(state)
    }

    fn corruption(&self, event_id: i64, message: String) -> NdcError {
        NdcError::ReplayCorruption {
            workflow: self.key.to_string(),
            event_id,
            message,
        }
    }
}

/// Apply one non-start event. Errors describe the inconsistency.
fn apply_to_state(state: &mut MutableState, event: &HistoryEvent) -> Result<(), String> {
    let event_id = event.event_id;
    match &event.attributes {
        EventAttributes::WorkflowExecutionStarted { .. } => {
            return Err("duplicate workflow_execution_started".to_string());
        }
        EventAttributes::WorkflowExecutionSignaled { .. } => {
            state.execution_info.signal_count += 1;
        }

        EventAttributes::ActivityTaskScheduled {
            activity_id,
            activity_type,
        } => {
            if state
                .pending_activities
                .values()
                .any(|a| &a.activity_id == activity_id)
            {
                return Err(format!("activity {activity_id:?} already scheduled"));
            }
            state.pending_activities.insert(
                event_id,
                ActivityInfo {
                    scheduled_event_id: event_id,
                    version: event.version,
                    activity_id: activity_id.clone(),
                    activity_type: activity_type.clone(),
                    scheduled_time: event.event_time,
                    started_event_id: None,
                    started_time: None,
                    attempt: 0,
                },
            );
        }
        EventAttributes::ActivityTaskStarted {
            scheduled_event_id,
            attempt,
        } => {
            let activity = state
                .pending_activities
                .get_mut(scheduled_event_id)
                .ok_or_else(|| format!("unknown activity scheduled at {scheduled_event_id}"))?;
            if activity.started_event_id.is_some() {
                return Err(format!(
                    "activity scheduled at {scheduled_event_id} already started"
                ));
            }
            activity.started_event_id = Some(event_id);
            activity.started_time = Some(event.event_time);
            activity.attempt = *attempt;
        }
        EventAttributes::ActivityTaskCompleted { scheduled_event_id }
        | EventAttributes::ActivityTaskFailed {
            scheduled_event_id, ..
        }
        | EventAttributes::ActivityTaskTimedOut { scheduled_event_id }
        | EventAttributes::ActivityTaskCanceled { scheduled_event_id } => {
            state
                .pending_activities
                .remove(scheduled_event_id)
                .ok_or_else(|| format!("unknown activity scheduled at {scheduled_event_id}"))?;
        }

        EventAttributes::TimerStarted {
            timer_id,
            fire_after_secs,
        } => {
            if state.pending_timers.contains_key(timer_id) {
                return Err(format!("timer {timer_id:?} already started"));
            }
            state.pending_timers.insert(
                timer_id.clone(),
                TimerInfo {
                    timer_id: timer_id.clone(),
                    version: event.version,
                    started_event_id: event_id,
                    expiry_time: event.event_time + Duration::seconds(*fire_after_secs),
                },
            );
        }
        EventAttributes::TimerFired { timer_id } | EventAttributes::TimerCanceled { timer_id } => {
            state
                .pending_timers
                .remove(timer_id)
                .ok_or_else(|| format!("unknown timer {timer_id:?}"))?;
        }

        EventAttributes::StartChildWorkflowExecutionInitiated {
            workflow_id,
            workflow_type,
        } => {
            state.pending_children.insert(
                event_id,
                ChildExecutionInfo {
                    initiated_event_id: event_id,
                    version: event.version,
                    workflow_id: workflow_id.clone(),
                    workflow_type: workflow_type.clone(),
                    started_event_id: None,
                    started_run_id: None,
                },
            );
        }
        EventAttributes::ChildWorkflowExecutionStarted {
            initiated_event_id,
            run_id,
        } => {
            let child = state
                .pending_children
                .get_mut(initiated_event_id)
                .ok_or_else(|| format!("unknown child initiated at {initiated_event_id}"))?;
            if child.started_event_id.is_some() {
                return Err(format!(
                    "child initiated at {initiated_event_id} already started"
                ));
            }
            child.started_event_id = Some(event_id);
            child.started_run_id = Some(run_id.clone());
        }
        EventAttributes::ChildWorkflowExecutionCompleted { initiated_event_id }
        | EventAttributes::ChildWorkflowExecutionFailed { initiated_event_id }
        | EventAttributes::ChildWorkflowExecutionCanceled { initiated_event_id }
        | EventAttributes::ChildWorkflowExecutionTimedOut { initiated_event_id }
        | EventAttributes::ChildWorkflowExecutionTerminated { initiated_event_id } => {
            state
                .pending_children
                .remove(initiated_event_id)
                .ok_or_else(|| format!("unknown child initiated at {initiated_event_id}"))?;
        }

        EventAttributes::WorkflowExecutionCompleted {} => {
            close(state, event, WorkflowStatus::Completed)
        }
        EventAttributes::WorkflowExecutionFailed { .. } => {
            close(state, event, WorkflowStatus::Failed)
        }
        EventAttributes::WorkflowExecutionCanceled {} => {
            close(state, event, WorkflowStatus::Canceled)
        }
        EventAttributes::WorkflowExecutionTerminated { .. } => {
            close(state, event, WorkflowStatus::Terminated)
        }
        EventAttributes::WorkflowExecutionTimedOut {} => {
            close(state, event, WorkflowStatus::TimedOut)
        }
        EventAttributes::WorkflowExecutionContinuedAsNew { .. } => {
            close(state, event, WorkflowStatus::ContinuedAsNew)
        }
    }
    Ok(())
}

fn close(state: &mut MutableState, event: &HistoryEvent, status: WorkflowStatus) {
    state.status = status;
    state.execution_info.close_time = Some(event.event_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn at(offset_secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000 + offset_secs).unwrap()
    }

    fn event(event_id: i64, version: i64, attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent::new(event_id, version, at(event_id), attributes)
    }

    fn started(run_timeout_secs: Option<i64>) -> HistoryEvent {
        event(
            1,
            0,
            EventAttributes::WorkflowExecutionStarted {
                workflow_type: "order".to_string(),
                task_queue: "default".to_string(),
                run_timeout_secs,
            },
        )
    }

    fn builder(upto: i64) -> StateBuilder {
        StateBuilder::new(
            WorkflowKey::new("ns", "wf", "run-2"),
            BranchToken::new(b"target".to_vec()),
            upto,
        )
    }

    fn replay(upto: i64, events: Vec<HistoryEvent>) -> Result<MutableState, NdcError> {
        let mut b = builder(upto);
        b.apply_events(&events)?;
        b.finish(None)
    }

    fn corruption_message(err: NdcError) -> String {
        match err {
            NdcError::ReplayCorruption { message, .. } => message,
            other => panic!("expected replay corruption, got {other:?}"),
        }
    }

    #[test]
    fn replays_pending_work() {
        let state = replay(
            6,
            vec![
                started(Some(60)),
                event(
                    2,
                    0,
                    EventAttributes::ActivityTaskScheduled {
                        activity_id: "a1".to_string(),
                        activity_type: "charge".to_string(),
                    },
                ),
                event(
                    3,
                    0,
                    EventAttributes::ActivityTaskStarted {
                        scheduled_event_id: 2,
                        attempt: 1,
                    },
                ),
                event(
                    4,
                    1,
                    EventAttributes::TimerStarted {
                        timer_id: "t1".to_string(),
                        fire_after_secs: 30,
                    },
                ),
                event(
                    5,
                    1,
                    EventAttributes::StartChildWorkflowExecutionInitiated {
                        workflow_id: "child".to_string(),
                        workflow_type: "ship".to_string(),
                    },
                ),
                event(
                    6,
                    1,
                    EventAttributes::WorkflowExecutionSignaled {
                        signal_name: "poke".to_string(),
                    },
                ),
            ],
        )
        .unwrap();

        assert!(state.is_open());
        assert_eq!(state.next_event_id(), 7);
        assert_eq!(state.pending_activities()[&2].started_event_id, Some(3));
        assert_eq!(state.pending_activities()[&2].attempt, 1);
        assert_eq!(state.pending_timers()["t1"].expiry_time, at(4 + 30));
        assert_eq!(state.pending_children()[&5].workflow_id, "child");
        assert_eq!(state.execution_info().signal_count, 1);
        assert_eq!(state.execution_info().last_write_version, 1);
        assert_eq!(state.execution_info().run_expiration_time, Some(at(1 + 60)));

        let history = state.version_histories().current();
        assert_eq!(history.branch_token(), &BranchToken::new(b"target".to_vec()));
        assert_eq!(
            history.items(),
            &[VersionHistoryItem::new(3, 0), VersionHistoryItem::new(6, 1)]
        );
    }

    #[test]
    fn completions_remove_pending_entries() {
        let state = replay(
            5,
            vec![
                started(None),
                event(
                    2,
                    0,
                    EventAttributes::ActivityTaskScheduled {
                        activity_id: "a1".to_string(),
                        activity_type: "charge".to_string(),
                    },
                ),
                event(
                    3,
                    0,
                    EventAttributes::ActivityTaskFailed {
                        scheduled_event_id: 2,
                        reason: "boom".to_string(),
                    },
                ),
                event(
                    4,
                    0,
                    EventAttributes::TimerStarted {
                        timer_id: "t1".to_string(),
                        fire_after_secs: 5,
                    },
                ),
                event(
                    5,
                    0,
                    EventAttributes::TimerCanceled {
                        timer_id: "t1".to_string(),
                    },
                ),
            ],
        )
        .unwrap();
        assert!(state.pending_activities().is_empty());
        assert!(state.pending_timers().is_empty());
        assert_eq!(state.execution_info().run_expiration_time, None);
    }

    #[test]
    fn first_event_must_be_started() {
        let err = replay(
            1,
            vec![event(
                1,
                0,
                EventAttributes::TimerFired {
                    timer_id: "t".to_string(),
                },
            )],
        )
        .unwrap_err();
        assert!(corruption_message(err).contains("must start with"));
    }

    #[test]
    fn gap_is_corruption() {
        let signal = EventAttributes::WorkflowExecutionSignaled {
            signal_name: "s".to_string(),
        };
        let err = replay(3, vec![started(None), event(3, 0, signal)]).unwrap_err();
        assert!(corruption_message(err).contains("gap"));
    }

    #[test]
    fn repeated_event_is_corruption() {
        let err = replay(2, vec![started(None), started(None)]).unwrap_err();
        assert!(corruption_message(err).contains("out of order"));
    }

    #[test]
    fn truncated_history_is_corruption() {
        let err = replay(4, vec![started(None)]).unwrap_err();
        assert!(corruption_message(err).contains("ended at event 1"));
    }

    #[test]
    fn event_past_end_is_corruption() {
        let signal = EventAttributes::WorkflowExecutionSignaled {
            signal_name: "s".to_string(),
        };
        let err = replay(1, vec![started(None), event(2, 0, signal)]).unwrap_err();
        assert!(corruption_message(err).contains("beyond requested end"));
    }

    #[test]
    fn unknown_references_are_corruption() {
        let err = replay(
            2,
            vec![
                started(None),
                event(
                    2,
                    0,
                    EventAttributes::ActivityTaskCompleted {
                        scheduled_event_id: 9,
                    },
                ),
            ],
        )
        .unwrap_err();
        assert!(corruption_message(err).contains("unknown activity"));

        let err = replay(
            2,
            vec![
                started(None),
                event(
                    2,
                    0,
                    EventAttributes::ChildWorkflowExecutionCompleted {
                        initiated_event_id: 9,
                    },
                ),
            ],
        )
        .unwrap_err();
        assert!(corruption_message(err).contains("unknown child"));
    }

    #[test]
    fn event_after_close_is_corruption() {
        let err = replay(
            3,
            vec![
                started(None),
                event(2, 0, EventAttributes::WorkflowExecutionCompleted {}),
                event(
                    3,
                    0,
                    EventAttributes::WorkflowExecutionSignaled {
                        signal_name: "late".to_string(),
                    },
                ),
            ],
        )
        .unwrap_err();
        assert!(corruption_message(err).contains("after the run closed"));
    }

    #[test]
    fn decreasing_version_is_corruption() {
        let err = replay(
            2,
            vec![
                event(
                    1,
                    3,
                    EventAttributes::WorkflowExecutionStarted {
                        workflow_type: "order".to_string(),
                        task_queue: "default".to_string(),
                        run_timeout_secs: None,
                    },
                ),
                event(
                    2,
                    2,
                    EventAttributes::WorkflowExecutionSignaled {
                        signal_name: "s".to_string(),
                    },
                ),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, NdcError::ReplayCorruption { event_id: 2, .. }));
    }

    #[test]
    fn finish_checks_end_version() {
        let mut b = builder(1);
        b.apply_events(&[started(None)]).unwrap();
        let err = b.finish(Some(7)).unwrap_err();
        assert!(corruption_message(err).contains("expected (event 1, version 7)"));

        let mut b = builder(1);
        b.apply_events(&[started(None)]).unwrap();
        assert!(b.finish(Some(0)).is_ok());
    }

    #[test]
    fn empty_history_is_corruption() {
        let err = builder(1).finish(None).unwrap_err();
        assert!(corruption_message(err).contains("no events"));
    }

    #[test]
    fn expiration_refresh() {
        let mut state = replay(1, vec![started(Some(60))]).unwrap();

        state.refresh_expiration_timeout_task(at(10));
        assert_eq!(state.expiration_task().unwrap().fire_at, at(61));

        // already past the deadline: fire now
        state.refresh_expiration_timeout_task(at(500));
        assert_eq!(state.expiration_task().unwrap().fire_at, at(500));

        let mut closed = replay(
            2,
            vec![
                started(Some(60)),
                event(2, 0, EventAttributes::WorkflowExecutionCompleted {}),
            ],
        )
        .unwrap();
        closed.refresh_expiration_timeout_task(at(10));
        assert!(closed.expiration_task().is_none());
        assert_eq!(closed.execution_info().close_time, Some(at(2)));
    }

    #[test]
    fn history_size_accumulates() {
        let mut state = replay(1, vec![started(None)]).unwrap();
        state.add_history_size(100);
        state.add_history_size(23);
        assert_eq!(state.history_size(), 123);
    }
}
