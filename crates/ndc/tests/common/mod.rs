#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use skein_core::{BranchToken, EventAttributes, HistoryEvent, WorkflowKey};
use skein_ndc::{
    ExecutionCache, ExecutionStore, InMemoryExecutionStore, MutableState, NdcConfig,
    RebuildRequest, Shard, StateRebuilder,
};
use skein_storage::memory::InMemoryHistoryStore;
use skein_storage::{
    AppendHistoryNodesRequest, AppendHistoryNodesResponse, ForkHistoryBranchRequest,
    ForkHistoryBranchResponse, HistoryBranchDetail, HistoryStore, ReadHistoryBranchRequest,
    ReadHistoryBranchResponse, StorageError,
};
use time::OffsetDateTime;

pub const TREE_ID: &str = "tree-wf";

pub fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap()
}

pub fn base_key() -> WorkflowKey {
    WorkflowKey::new("ns", "wf", "run-1")
}

pub fn event(event_id: i64, version: i64) -> HistoryEvent {
    let attributes = if event_id == 1 {
        EventAttributes::WorkflowExecutionStarted {
            workflow_type: "order".to_string(),
            task_queue: "default".to_string(),
            run_timeout_secs: Some(3_600),
        }
    } else {
        EventAttributes::WorkflowExecutionSignaled {
            signal_name: format!("signal-{event_id}"),
        }
    };
    HistoryEvent::new(event_id, version, at(event_id), attributes)
}

pub fn events(first: i64, last: i64, version: i64) -> Vec<HistoryEvent> {
    (first..=last).map(|id| event(id, version)).collect()
}

pub fn encoded_size(events: &[HistoryEvent]) -> u64 {
    events
        .iter()
        .map(|e| e.encoded_size().unwrap() as u64)
        .sum()
}

pub async fn append<H: HistoryStore>(store: &H, branch: &BranchToken, events: Vec<HistoryEvent>) {
    store
        .append_history_nodes(AppendHistoryNodesRequest {
            branch_token: branch.clone(),
            events,
            transaction_id: 1,
        })
        .await
        .unwrap();
}

/// Replays a branch of `store` into a state addressed as `key` on `branch`.
pub async fn replay<H: HistoryStore>(
    shard: &Shard<H>,
    key: &WorkflowKey,
    branch: &BranchToken,
    upto: i64,
) -> MutableState {
    let request = RebuildRequest {
        source_key: key.clone(),
        source_branch: branch.clone(),
        upto_event_id: upto,
        upto_version: None,
        target_key: key.clone(),
        target_branch: branch.clone(),
        request_id: "seed".to_string(),
    };
    let (mut state, size) = StateRebuilder::new(shard.clone())
        .rebuild(at(0), &request)
        .await
        .unwrap();
    state.add_history_size(size);
    state
}

pub struct Harness<H> {
    pub shard: Shard<H>,
    pub executions: Arc<InMemoryExecutionStore>,
    pub cache: Arc<ExecutionCache<InMemoryExecutionStore>>,
}

impl<H: HistoryStore> Harness<H> {
    pub fn new(store: Arc<H>, config: NdcConfig) -> Self {
        let executions = Arc::new(InMemoryExecutionStore::new());
        Harness {
            shard: Shard::new(1, store, config.clone()),
            cache: Arc::new(ExecutionCache::new(Arc::clone(&executions), config)),
            executions,
        }
    }

    /// Persist a base run whose single branch holds events `1..=last`.
    pub async fn seed_base(&self, last: i64, version: i64) -> BranchToken {
        let store = self.shard.history_store();
        let branch = store.new_history_branch(TREE_ID).await.unwrap();
        append(store, &branch, events(1, last, version)).await;
        let state = replay(&self.shard, &base_key(), &branch, last).await;
        self.executions.put_workflow_execution(state).await.unwrap();
        branch
    }
}

pub fn memory_harness() -> Harness<InMemoryHistoryStore> {
    Harness::new(Arc::new(InMemoryHistoryStore::new()), NdcConfig::default())
}

/// How a [`FaultyHistoryStore`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Fork calls fail with a backend error.
    ForkFails,
    /// Reads silently drop the given event id.
    DropEvent(i64),
    /// Fork calls never complete.
    ForkHangs,
}

/// Wraps the in-memory store and injects one fault.
pub struct FaultyHistoryStore {
    pub inner: InMemoryHistoryStore,
    pub fault: Fault,
}

impl FaultyHistoryStore {
    pub fn new(fault: Fault) -> Self {
        FaultyHistoryStore {
            inner: InMemoryHistoryStore::new(),
            fault,
        }
    }
}

#[async_trait]
impl HistoryStore for FaultyHistoryStore {
    async fn new_history_branch(&self, tree_id: &str) -> Result<BranchToken, StorageError> {
        self.inner.new_history_branch(tree_id).await
    }

    async fn append_history_nodes(
        &self,
        request: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, StorageError> {
        self.inner.append_history_nodes(request).await
    }

    async fn fork_history_branch(
        &self,
        request: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, StorageError> {
        match self.fault {
            Fault::ForkFails => Err(StorageError::Backend("fork rejected".to_string())),
            Fault::ForkHangs => std::future::pending().await,
            _ => self.inner.fork_history_branch(request).await,
        }
    }

    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, StorageError> {
        let mut response = self.inner.read_history_branch(request).await?;
        if let Fault::DropEvent(event_id) = self.fault {
            response.events.retain(|e| e.event_id != event_id);
        }
        Ok(response)
    }

    async fn get_history_tree(
        &self,
        tree_id: &str,
    ) -> Result<Vec<HistoryBranchDetail>, StorageError> {
        self.inner.get_history_tree(tree_id).await
    }

    async fn delete_history_branch(&self, branch_token: &BranchToken) -> Result<(), StorageError> {
        self.inner.delete_history_branch(branch_token).await
    }
}
