//! In-process [`TransactionManager`] with per-run locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use skein_core::WorkflowKey;

use crate::config::NdcConfig;
use crate::error::NdcError;
use crate::execution_store::ExecutionStore;
use crate::transaction::{LockedWorkflow, TransactionManager, WorkflowContext};

type Slot = Arc<tokio::sync::Mutex<WorkflowContext>>;

/// Caches one [`WorkflowContext`] per run, each behind its own async lock.
///
/// The map lock is only held to look up or insert a slot, never across an
/// await, so runs with different keys never wait on each other. Contexts
/// released with an error are cleared and re-read from the
/// [`ExecutionStore`] on the next load.
pub struct ExecutionCache<E> {
    store: Arc<E>,
    config: NdcConfig,
    slots: Mutex<HashMap<WorkflowKey, Slot>>,
}

impl<E: ExecutionStore> ExecutionCache<E> {
    pub fn new(store: Arc<E>, config: NdcConfig) -> Self {
        ExecutionCache {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &E {
        &self.store
    }

    /// Number of resident contexts.
    pub fn len(&self) -> usize {
        self.slots().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<WorkflowKey, Slot>>, NdcError> {
        self.slots
            .lock()
            .map_err(|_| NdcError::Internal("execution cache lock poisoned".to_string()))
    }

    fn slot(&self, key: &WorkflowKey) -> Result<Slot, NdcError> {
        let mut slots = self.slots()?;
        if let Some(slot) = slots.get(key) {
            return Ok(Arc::clone(slot));
        }
        if slots.len() >= self.config.max_cached_contexts {
            // Only the map references an idle slot; anything locked or
            // waiting holds its own clone.
            let before = slots.len();
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            tracing::debug!(evicted = before - slots.len(), "evicted idle workflow contexts");
        }
        let slot = Arc::new(tokio::sync::Mutex::new(WorkflowContext::new(key.clone())));
        slots.insert(key.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    fn lock_timeout_error(&self, key: &WorkflowKey) -> NdcError {
        NdcError::LockTimeout {
            workflow: key.to_string(),
            timeout_ms: self.config.lock_timeout_ms,
        }
    }
}

#[async_trait]
impl<E: ExecutionStore> TransactionManager for ExecutionCache<E> {
    async fn load_workflow(&self, key: &WorkflowKey) -> Result<LockedWorkflow, NdcError> {
        let slot = self.slot(key)?;
        let mut context = tokio::time::timeout(self.config.lock_timeout(), slot.lock_owned())
            .await
            .map_err(|_| self.lock_timeout_error(key))?;

        if context.mutable_state().is_none() {
            match self.store.get_workflow_execution(key).await? {
                Some(state) => context.set_mutable_state(state),
                None => return Err(NdcError::NotFound(format!("workflow execution {key}"))),
            }
        }

        Ok(LockedWorkflow::new(
            context,
            Box::new(|context: &mut WorkflowContext, outcome: Option<&NdcError>| {
                if let Some(err) = outcome {
                    tracing::warn!(
                        workflow = %context.key(),
                        error = %err,
                        "context released after failure, evicting cached state"
                    );
                    context.clear();
                }
            }),
        ))
    }

    async fn clear_cache(&self, key: &WorkflowKey) -> Result<(), NdcError> {
        let slot = self.slots()?.get(key).cloned();
        if let Some(slot) = slot {
            let mut context = tokio::time::timeout(self.config.lock_timeout(), slot.lock())
                .await
                .map_err(|_| self.lock_timeout_error(key))?;
            context.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use skein_core::{BranchToken, EventAttributes, HistoryEvent};
    use time::OffsetDateTime;

    use super::*;
    use crate::execution_store::InMemoryExecutionStore;
    use crate::mutable_state::MutableState;
    use crate::state_builder::StateBuilder;

    fn state(key: &WorkflowKey, task_queue: &str) -> MutableState {
        let mut builder = StateBuilder::new(key.clone(), BranchToken::new(b"b".to_vec()), 1);
        builder
            .apply_events(&[HistoryEvent::new(
                1,
                0,
                OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
                EventAttributes::WorkflowExecutionStarted {
                    workflow_type: "order".to_string(),
                    task_queue: task_queue.to_string(),
                    run_timeout_secs: None,
                },
            )])
            .unwrap();
        builder.finish(Some(0)).unwrap()
    }

    fn cache(config: NdcConfig) -> ExecutionCache<InMemoryExecutionStore> {
        ExecutionCache::new(Arc::new(InMemoryExecutionStore::new()), config)
    }

    fn short_timeout() -> NdcConfig {
        NdcConfig {
            lock_timeout_ms: 20,
            ..NdcConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_execution_is_not_found() {
        let cache = cache(NdcConfig::default());
        let err = cache
            .load_workflow(&WorkflowKey::new("ns", "wf", "nope"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NdcError::NotFound(_)));
    }

    #[tokio::test]
    async fn loads_persisted_execution() {
        let cache = cache(NdcConfig::default());
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q1")).await.unwrap();

        let workflow = cache.load_workflow(&key).await.unwrap();
        assert_eq!(workflow.mutable_state().unwrap().execution_info().task_queue, "q1");
        workflow.release(None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn same_key_waits_and_times_out() {
        let cache = cache(short_timeout());
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q1")).await.unwrap();

        let held = cache.load_workflow(&key).await.unwrap();
        let err = cache.load_workflow(&key).await.err().unwrap();
        assert!(matches!(err, NdcError::LockTimeout { timeout_ms: 20, .. }));
        assert!(err.is_retryable());

        held.release(None);
        cache.load_workflow(&key).await.unwrap().release(None);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let cache = cache(short_timeout());
        let a = WorkflowKey::new("ns", "wf", "a");
        let b = WorkflowKey::new("ns", "wf", "b");
        cache.store().put_workflow_execution(state(&a, "q")).await.unwrap();
        cache.store().put_workflow_execution(state(&b, "q")).await.unwrap();

        let held_a = cache.load_workflow(&a).await.unwrap();
        let held_b = cache.load_workflow(&b).await.unwrap();
        held_a.release(None);
        held_b.release(None);
    }

    #[tokio::test]
    async fn error_release_evicts_cached_state() {
        let cache = cache(NdcConfig::default());
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q1")).await.unwrap();

        cache.load_workflow(&key).await.unwrap().release(None);
        cache.store().put_workflow_execution(state(&key, "q2")).await.unwrap();

        // still served from cache
        let workflow = cache.load_workflow(&key).await.unwrap();
        assert_eq!(workflow.mutable_state().unwrap().execution_info().task_queue, "q1");
        workflow.release(Some(&NdcError::Internal("boom".to_string())));

        let workflow = cache.load_workflow(&key).await.unwrap();
        assert_eq!(workflow.mutable_state().unwrap().execution_info().task_queue, "q2");
        workflow.release(None);
    }

    #[tokio::test]
    async fn dropped_guard_unlocks_and_evicts() {
        let cache = cache(short_timeout());
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q1")).await.unwrap();

        drop(cache.load_workflow(&key).await.unwrap());
        cache.store().put_workflow_execution(state(&key, "q2")).await.unwrap();

        let workflow = cache.load_workflow(&key).await.unwrap();
        assert_eq!(workflow.mutable_state().unwrap().execution_info().task_queue, "q2");
        workflow.release(None);
    }

    #[tokio::test]
    async fn clear_cache_forces_reload() {
        let cache = cache(NdcConfig::default());
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q1")).await.unwrap();
        cache.load_workflow(&key).await.unwrap().release(None);

        cache.store().put_workflow_execution(state(&key, "q2")).await.unwrap();
        cache.clear_cache(&key).await.unwrap();

        let workflow = cache.load_workflow(&key).await.unwrap();
        assert_eq!(workflow.mutable_state().unwrap().execution_info().task_queue, "q2");
        workflow.release(None);

        // unknown keys are a no-op
        cache
            .clear_cache(&WorkflowKey::new("ns", "wf", "other"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_contexts_are_evicted_past_bound() {
        let cache = cache(NdcConfig {
            max_cached_contexts: 2,
            ..NdcConfig::default()
        });
        let keys: Vec<_> = (0..3)
            .map(|i| WorkflowKey::new("ns", "wf", format!("run-{i}")))
            .collect();
        for key in &keys {
            cache.store().put_workflow_execution(state(key, "q")).await.unwrap();
        }

        let held = cache.load_workflow(&keys[0]).await.unwrap();
        cache.load_workflow(&keys[1]).await.unwrap().release(None);
        cache.load_workflow(&keys[2]).await.unwrap().release(None);

        // run-1 was idle and evicted; run-0 is locked and stays
        assert_eq!(cache.len(), 2);
        held.release(None);
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let cache = Arc::new(cache(NdcConfig::default()));
        let key = WorkflowKey::new("ns", "wf", "run");
        cache.store().put_workflow_execution(state(&key, "q")).await.unwrap();

        let held = cache.load_workflow(&key).await.unwrap();
        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                let workflow = cache.load_workflow(&key).await?;
                workflow.release(None);
                Ok::<_, NdcError>(())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        held.release(None);
        waiter.await.unwrap().unwrap();
    }
}
