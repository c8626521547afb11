use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one execution run: namespace + workflow id + run id.
///
/// Used as the addressing key for both the history store and the
/// transaction manager's context cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowKey {
    pub fn new(
        namespace_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        WorkflowKey {
            namespace_id: namespace_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }

    /// Same namespace and workflow, different run.
    pub fn with_run_id(&self, run_id: impl Into<String>) -> Self {
        WorkflowKey {
            namespace_id: self.namespace_id.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace_id, self.workflow_id, self.run_id)
    }
}
