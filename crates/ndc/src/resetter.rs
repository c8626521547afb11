//! Conflict resolution by resetting onto a fresh branch.
//!
//! When a peer's events fork from a point this cluster knows, the
//! [`Resetter`] forks the base run's history right after that point and
//! rebuilds a new run's state from the shared prefix. When the point is
//! unknown it asks the peer to resend instead.

use std::sync::Arc;

use skein_core::{BranchToken, VersionHistoryItem, WorkflowKey};
use skein_storage::{build_history_garbage_cleanup_info, ForkHistoryBranchRequest, HistoryStore};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NdcError;
use crate::mutable_state::MutableState;
use crate::resend::RetryReplication;
use crate::shard::Shard;
use crate::state_rebuilder::{RebuildRequest, StateRebuilder};
use crate::transaction::{LockedWorkflow, TransactionManager};

/// Outcome of searching the base run's lineages for the base point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseBranch {
    Found(BranchToken),
    Diverged,
}

/// Resets one base run onto a new run id.
pub struct Resetter<T, H> {
    shard: Shard<H>,
    transaction_mgr: Arc<T>,
    state_rebuilder: StateRebuilder<H>,
    base_key: WorkflowKey,
    new_key: WorkflowKey,
}

impl<T: TransactionManager, H: HistoryStore> Resetter<T, H> {
    pub fn new(
        shard: &Shard<H>,
        transaction_mgr: Arc<T>,
        base_key: WorkflowKey,
        new_run_id: impl Into<String>,
    ) -> Self {
        let new_key = base_key.with_run_id(new_run_id);
        Resetter {
            shard: shard.clone(),
            transaction_mgr,
            state_rebuilder: StateRebuilder::new(shard.clone()),
            base_key,
            new_key,
        }
    }

    pub fn base_key(&self) -> &WorkflowKey {
        &self.base_key
    }

    pub fn new_key(&self) -> &WorkflowKey {
        &self.new_key
    }

    /// Build the new run's state from the base run's history up to
    /// `(base_last_event_id, base_last_event_version)`.
    ///
    /// Fails with [`NdcError::RetryReplication`] when the base run or the
    /// base point is unknown locally; the resend range ends at the incoming
    /// event. The base run stays locked for the whole call and is released
    /// exactly once with the outcome.
    pub async fn reset_workflow(
        &self,
        now: OffsetDateTime,
        base_last_event_id: i64,
        base_last_event_version: i64,
        incoming_first_event_id: i64,
        incoming_first_event_version: i64,
    ) -> Result<MutableState, NdcError> {
        tracing::debug!(
            namespace_id = %self.base_key.namespace_id,
            workflow_id = %self.base_key.workflow_id,
            base_run_id = %self.base_key.run_id,
            new_run_id = %self.new_key.run_id,
            base_last_event_id,
            base_last_event_version,
            incoming_first_event_id,
            incoming_first_event_version,
            "resetting workflow"
        );

        let base_workflow = match self.transaction_mgr.load_workflow(&self.base_key).await {
            Ok(workflow) => workflow,
            Err(NdcError::NotFound(what)) => {
                tracing::info!(
                    workflow = %self.base_key,
                    missing = %what,
                    "base run not found, requesting resend"
                );
                return Err(
                    self.resend(incoming_first_event_id, incoming_first_event_version)
                );
            }
            Err(e) => return Err(e),
        };

        let result = self
            .reset_locked(
                &base_workflow,
                now,
                base_last_event_id,
                base_last_event_version,
                incoming_first_event_id,
                incoming_first_event_version,
            )
            .await;
        base_workflow.release(result.as_ref().err());
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn reset_locked(
        &self,
        base_workflow: &LockedWorkflow,
        now: OffsetDateTime,
        base_last_event_id: i64,
        base_last_event_version: i64,
        incoming_first_event_id: i64,
        incoming_first_event_version: i64,
    ) -> Result<MutableState, NdcError> {
        let base_branch_token =
            match self.base_branch(base_workflow, base_last_event_id, base_last_event_version)? {
                BaseBranch::Found(token) => token,
                BaseBranch::Diverged => {
                    tracing::info!(
                        workflow = %self.base_key,
                        base_last_event_id,
                        base_last_event_version,
                        "base event not on any local branch, requesting resend"
                    );
                    return Err(
                        self.resend(incoming_first_event_id, incoming_first_event_version)
                    );
                }
            };

        let reset_branch_token = self
            .fork_reset_branch(&base_branch_token, base_last_event_id)
            .await?;

        let request = RebuildRequest {
            source_key: self.base_key.clone(),
            source_branch: base_branch_token,
            upto_event_id: base_last_event_id,
            upto_version: Some(base_last_event_version),
            target_key: self.new_key.clone(),
            target_branch: reset_branch_token,
            request_id: Uuid::new_v4().to_string(),
        };
        let (mut state, rebuilt_history_size) = self.state_rebuilder.rebuild(now, &request).await?;
        state.add_history_size(rebuilt_history_size);
        state.refresh_expiration_timeout_task(now);

        self.transaction_mgr.clear_cache(&self.new_key).await?;

        tracing::debug!(
            workflow = %self.new_key,
            next_event_id = state.next_event_id(),
            history_size = state.history_size(),
            "reset workflow rebuilt"
        );
        Ok(state)
    }

    /// First lineage of the base run containing the base point.
    pub fn base_branch(
        &self,
        base_workflow: &LockedWorkflow,
        base_last_event_id: i64,
        base_last_event_version: i64,
    ) -> Result<BaseBranch, NdcError> {
        let histories = base_workflow.mutable_state()?.version_histories();
        let item = VersionHistoryItem::new(base_last_event_id, base_last_event_version);
        match histories.find_first_index_by_item(item) {
            Some(index) => Ok(BaseBranch::Found(histories.get(index)?.branch_token().clone())),
            None => Ok(BaseBranch::Diverged),
        }
    }

    /// Fork the base branch right after the base point. The new branch is
    /// tagged with the new run so an abandoned fork can be swept.
    async fn fork_reset_branch(
        &self,
        base_branch_token: &BranchToken,
        base_last_event_id: i64,
    ) -> Result<BranchToken, NdcError> {
        let fork_node_id = base_last_event_id.checked_add(1).ok_or_else(|| {
            NdcError::Internal(format!(
                "fork point after event {base_last_event_id} out of range"
            ))
        })?;
        let response = self
            .shard
            .history_store()
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: base_branch_token.clone(),
                fork_node_id,
                info: build_history_garbage_cleanup_info(
                    &self.new_key.namespace_id,
                    &self.new_key.workflow_id,
                    &self.new_key.run_id,
                ),
                shard_id: self.shard.shard_id(),
                namespace_id: self.new_key.namespace_id.clone(),
                new_run_id: self.new_key.run_id.clone(),
            })
            .await?;
        tracing::debug!(
            workflow = %self.new_key,
            fork_node_id,
            "forked reset branch"
        );
        Ok(response.new_branch_token)
    }

    fn resend(&self, incoming_first_event_id: i64, incoming_first_event_version: i64) -> NdcError {
        RetryReplication::reset_workflow(
            &self.new_key.namespace_id,
            &self.new_key.workflow_id,
            &self.new_key.run_id,
            incoming_first_event_id,
            incoming_first_event_version,
        )
        .into()
    }
}
