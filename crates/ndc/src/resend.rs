//! Resend signal sent back to a peer cluster when local history cannot
//! resolve a conflict.

use std::fmt;

use serde::{Deserialize, Serialize};
use skein_core::{EMPTY_EVENT_ID, EMPTY_VERSION};

pub const RESEND_ON_RESET_WORKFLOW_MESSAGE: &str = "Resend events due to reset workflow";

/// Ask the peer to resend events `(start, end)` of a run.
///
/// The start bound is exclusive and the end bound is exclusive: the peer
/// sends what lies strictly between them. `EMPTY_EVENT_ID`/`EMPTY_VERSION`
/// as the start means "from the beginning of the incoming branch".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReplication {
    pub message: String,
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub start_event_id: i64,
    pub start_event_version: i64,
    pub end_event_id: i64,
    pub end_event_version: i64,
}

impl RetryReplication {
    /// Resend everything on the incoming branch before
    /// `(end_event_id, end_event_version)`.
    pub fn reset_workflow(
        namespace_id: &str,
        workflow_id: &str,
        run_id: &str,
        end_event_id: i64,
        end_event_version: i64,
    ) -> Self {
        RetryReplication {
            message: RESEND_ON_RESET_WORKFLOW_MESSAGE.to_string(),
            namespace_id: namespace_id.to_string(),
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            start_event_id: EMPTY_EVENT_ID,
            start_event_version: EMPTY_VERSION,
            end_event_id,
            end_event_version,
        }
    }
}

impl fmt::Display for RetryReplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{}/{} events after ({}, v{}) up to ({}, v{})",
            self.message,
            self.namespace_id,
            self.workflow_id,
            self.run_id,
            self.start_event_id,
            self.start_event_version,
            self.end_event_id,
            self.end_event_version
        )
    }
}
