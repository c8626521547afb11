//! Transaction-manager boundary: locked access to a run's in-memory context.

use async_trait::async_trait;
use skein_core::WorkflowKey;
use tokio::sync::OwnedMutexGuard;

use crate::error::NdcError;
use crate::mutable_state::MutableState;

/// In-memory context of one run, guarded by that run's lock.
#[derive(Debug)]
pub struct WorkflowContext {
    key: WorkflowKey,
    mutable_state: Option<MutableState>,
}

impl WorkflowContext {
    pub fn new(key: WorkflowKey) -> Self {
        WorkflowContext {
            key,
            mutable_state: None,
        }
    }

    pub fn key(&self) -> &WorkflowKey {
        &self.key
    }

    pub fn mutable_state(&self) -> Option<&MutableState> {
        self.mutable_state.as_ref()
    }

    pub fn set_mutable_state(&mut self, state: MutableState) {
        self.mutable_state = Some(state);
    }

    /// Drop cached state so the next load re-reads it.
    pub fn clear(&mut self) {
        self.mutable_state = None;
    }
}

/// Invoked exactly once when a [`LockedWorkflow`] is released, with the
/// outcome of the work done under the lock.
pub type ReleaseFn = Box<dyn FnOnce(&mut WorkflowContext, Option<&NdcError>) + Send + Sync>;

/// Exclusive, scoped access to a run's context.
///
/// The lock is held until [`release`](LockedWorkflow::release) is called or
/// the guard is dropped. Dropping an unreleased guard (for example when the
/// owning future is cancelled) releases it with [`NdcError::Cancelled`].
pub struct LockedWorkflow {
    guard: OwnedMutexGuard<WorkflowContext>,
    release: Option<ReleaseFn>,
}

impl LockedWorkflow {
    pub fn new(guard: OwnedMutexGuard<WorkflowContext>, release: ReleaseFn) -> Self {
        LockedWorkflow {
            guard,
            release: Some(release),
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.guard
    }

    pub fn key(&self) -> &WorkflowKey {
        self.guard.key()
    }

    /// The loaded state. A context handed out by a transaction manager
    /// always carries one.
    pub fn mutable_state(&self) -> Result<&MutableState, NdcError> {
        self.guard
            .mutable_state()
            .ok_or_else(|| NdcError::Internal(format!("context of {} has no state", self.key())))
    }

    /// Release the lock, reporting `outcome` to the release callback.
    pub fn release(mut self, outcome: Option<&NdcError>) {
        if let Some(release) = self.release.take() {
            release(&mut *self.guard, outcome);
        }
    }
}

impl Drop for LockedWorkflow {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::warn!(workflow = %self.guard.key(), "workflow context dropped without release");
            release(&mut *self.guard, Some(&NdcError::Cancelled));
        }
    }
}

#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Lock and load a run's context.
    ///
    /// Returns `Err(NdcError::NotFound)` when no such run exists and
    /// `Err(NdcError::LockTimeout)` when the lock is not acquired in time.
    async fn load_workflow(&self, key: &WorkflowKey) -> Result<LockedWorkflow, NdcError>;

    /// Discard any cached context of `key`.
    async fn clear_cache(&self, key: &WorkflowKey) -> Result<(), NdcError>;
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    type Calls = Arc<Mutex<Vec<Option<String>>>>;

    fn locked(calls: &Calls) -> LockedWorkflow {
        let mutex = Arc::new(tokio::sync::Mutex::new(WorkflowContext::new(
            WorkflowKey::new("ns", "wf", "run"),
        )));
        let guard = mutex.try_lock_owned().unwrap();
        let calls = Arc::clone(calls);
        LockedWorkflow::new(
            guard,
            Box::new(move |_: &mut WorkflowContext, outcome: Option<&NdcError>| {
                calls
                    .lock()
                    .unwrap()
                    .push(outcome.map(|e| e.to_string()));
            }),
        )
    }

    #[test]
    fn release_invokes_callback_once() {
        let calls = Calls::default();
        locked(&calls).release(None);
        assert_eq!(*calls.lock().unwrap(), vec![None]);
    }

    #[test]
    fn release_passes_outcome() {
        let calls = Calls::default();
        locked(&calls).release(Some(&NdcError::Internal("boom".to_string())));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Some("internal error: boom".to_string())]
        );
    }

    #[test]
    fn drop_releases_as_cancelled() {
        let calls = Calls::default();
        drop(locked(&calls));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![Some(NdcError::Cancelled.to_string())]
        );
    }

    #[test]
    fn empty_context_has_no_state() {
        let calls = Calls::default();
        let workflow = locked(&calls);
        assert!(matches!(workflow.mutable_state(), Err(NdcError::Internal(_))));
        workflow.release(None);
    }

    #[tokio::test]
    async fn lock_is_held_until_release() {
        let mutex = Arc::new(tokio::sync::Mutex::new(WorkflowContext::new(
            WorkflowKey::new("ns", "wf", "run"),
        )));
        let workflow = LockedWorkflow::new(
            Arc::clone(&mutex).lock_owned().await,
            Box::new(|_: &mut WorkflowContext, _: Option<&NdcError>| {}),
        );
        assert!(mutex.try_lock().is_err());
        workflow.release(None);
        assert!(mutex.try_lock().is_ok());
    }
}
