use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use skein_core::WorkflowKey;

use crate::error::NdcError;
use crate::mutable_state::MutableState;

/// Persisted executions, read by the transaction manager on a cache miss.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    async fn get_workflow_execution(
        &self,
        key: &WorkflowKey,
    ) -> Result<Option<MutableState>, NdcError>;

    /// Insert or replace the execution addressed by `state.key()`.
    async fn put_workflow_execution(&self, state: MutableState) -> Result<(), NdcError>;
}

/// Thread-safe in-memory [`ExecutionStore`]. Cloning shares the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    inner: Arc<Mutex<HashMap<WorkflowKey, MutableState>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<WorkflowKey, MutableState>>, NdcError> {
        self.inner
            .lock()
            .map_err(|_| NdcError::Internal("execution store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn get_workflow_execution(
        &self,
        key: &WorkflowKey,
    ) -> Result<Option<MutableState>, NdcError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn put_workflow_execution(&self, state: MutableState) -> Result<(), NdcError> {
        self.lock()?.insert(state.key().clone(), state);
        Ok(())
    }
}
