//! In-process reference backend.
//!
//! [`InMemoryHistoryStore`] models a history tree the way a database-backed
//! store lays it out: node rows are owned by the branch that wrote them, and
//! a branch token carries the list of ancestor ranges it shares with the
//! branches it was forked from. Reads stitch those ranges together; deletes
//! keep any node a surviving branch still reaches through its ancestry.
//!
//! [`InMemoryChildExecutionStore`] is a keyed map of child-execution rows.

use std::collections::{BTreeMap, HashMap};
use std::iter;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skein_core::{BranchToken, HistoryEvent, FIRST_EVENT_ID};

use crate::error::StorageError;
use crate::record::{
    AppendHistoryNodesRequest, AppendHistoryNodesResponse, ChildExecutionInfoMapsAllFilter,
    ChildExecutionInfoMapsFilter, ChildExecutionInfoMapsRow, ForkHistoryBranchRequest,
    ForkHistoryBranchResponse, HistoryBranchDetail, ReadHistoryBranchRequest,
    ReadHistoryBranchResponse,
};
use crate::traits::{ChildExecutionStore, HistoryStore};

// ──────────────────────────────────────────────
// Branch token layout
// ──────────────────────────────────────────────

/// Nodes `[begin_node_id, end_node_id)` owned by `branch_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BranchRange {
    branch_id: String,
    begin_node_id: i64,
    end_node_id: i64,
}

/// What an in-memory branch token decodes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BranchInfo {
    tree_id: String,
    branch_id: String,
    ancestors: Vec<BranchRange>,
}

impl BranchInfo {
    /// First node this branch owns itself.
    fn begin_node_id(&self) -> i64 {
        self.ancestors
            .last()
            .map_or(FIRST_EVENT_ID, |range| range.end_node_id)
    }

    fn encode(&self) -> Result<BranchToken, StorageError> {
        Ok(BranchToken::new(serde_json::to_vec(self)?))
    }

    fn decode(token: &BranchToken) -> Result<Self, StorageError> {
        serde_json::from_slice(token.as_bytes())
            .map_err(|e| StorageError::InvalidBranchToken(e.to_string()))
    }
}

// ──────────────────────────────────────────────
// InMemoryHistoryStore
// ──────────────────────────────────────────────

#[derive(Debug)]
struct StoredNode {
    event: HistoryEvent,
    size: usize,
}

#[derive(Debug)]
struct BranchRecord {
    info: BranchInfo,
    gc_info: String,
}

#[derive(Debug, Default)]
struct HistoryInner {
    /// Live branches by branch id.
    branches: HashMap<String, BranchRecord>,
    /// Node rows by owning branch id. May outlive the branch record while
    /// another branch still shares them.
    nodes: HashMap<String, BTreeMap<i64, StoredNode>>,
}

impl HistoryInner {
    fn live_branch(&self, token: &BranchToken) -> Result<&BranchRecord, StorageError> {
        let info = BranchInfo::decode(token)?;
        self.branches
            .get(&info.branch_id)
            .ok_or(StorageError::BranchNotFound {
                branch_id: info.branch_id,
            })
    }

    fn last_node_id(&self, info: &BranchInfo) -> i64 {
        self.nodes
            .get(&info.branch_id)
            .and_then(|nodes| nodes.keys().next_back().copied())
            .unwrap_or(info.begin_node_id() - 1)
    }

    /// Nodes of `info` in `[from, to)`, at most `limit` of them (0 = all).
    fn collect(&self, info: &BranchInfo, from: i64, to: i64, limit: usize) -> Vec<&StoredNode> {
        let own = (info.branch_id.as_str(), info.begin_node_id(), i64::MAX);
        let segments = info
            .ancestors
            .iter()
            .map(|range| {
                (
                    range.branch_id.as_str(),
                    range.begin_node_id,
                    range.end_node_id,
                )
            })
            .chain(iter::once(own));

        let mut out = Vec::new();
        for (branch_id, begin, end) in segments {
            let lo = from.max(begin);
            let hi = to.min(end);
            if lo >= hi {
                continue;
            }
            let Some(nodes) = self.nodes.get(branch_id) else {
                continue;
            };
            for node in nodes.range(lo..hi).map(|(_, node)| node) {
                if limit != 0 && out.len() == limit {
                    return out;
                }
                out.push(node);
            }
        }
        out
    }

    /// Drop node rows that no live branch can reach anymore.
    fn prune_unreachable_nodes(&mut self) {
        let HistoryInner { branches, nodes } = self;

        let mut reachable_end: HashMap<String, i64> = HashMap::new();
        for record in branches.values() {
            for range in &record.info.ancestors {
                let end = reachable_end.entry(range.branch_id.clone()).or_insert(0);
                *end = (*end).max(range.end_node_id);
            }
        }

        nodes.retain(|branch_id, rows| {
            if branches.contains_key(branch_id) {
                return true;
            }
            match reachable_end.get(branch_id) {
                Some(&end) => {
                    rows.retain(|node_id, _| *node_id < end);
                    !rows.is_empty()
                }
                None => false,
            }
        });
    }
}

/// Thread-safe in-memory [`HistoryStore`]. Cloning shares the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    inner: Arc<Mutex<HistoryInner>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HistoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("history store lock poisoned".to_string()))
    }
}

fn decode_page_token(token: &[u8]) -> Result<i64, StorageError> {
    let bytes: [u8; 8] = token.try_into().map_err(|_| StorageError::InvalidPageToken)?;
    Ok(i64::from_be_bytes(bytes))
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn new_history_branch(&self, tree_id: &str) -> Result<BranchToken, StorageError> {
        let info = BranchInfo {
            tree_id: tree_id.to_string(),
            branch_id: uuid::Uuid::new_v4().to_string(),
            ancestors: Vec::new(),
        };
        let token = info.encode()?;
        let mut inner = self.lock()?;
        inner.branches.insert(
            info.branch_id.clone(),
            BranchRecord {
                info,
                gc_info: String::new(),
            },
        );
        Ok(token)
    }

    async fn append_history_nodes(
        &self,
        request: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, StorageError> {
        let mut inner = self.lock()?;
        let info = inner.live_branch(&request.branch_token)?.info.clone();

        let mut expected = inner.last_node_id(&info) + 1;
        let mut staged = Vec::with_capacity(request.events.len());
        let mut size = 0;
        for event in request.events {
            if event.event_id != expected {
                return Err(StorageError::AppendConflict {
                    expected_event_id: expected,
                    actual_event_id: event.event_id,
                });
            }
            let node_size = event.encoded_size()?;
            size += node_size;
            expected += 1;
            staged.push(StoredNode {
                event,
                size: node_size,
            });
        }

        tracing::trace!(
            branch_id = %info.branch_id,
            transaction_id = request.transaction_id,
            last_event_id = expected - 1,
            "appended history nodes"
        );
        let rows = inner.nodes.entry(info.branch_id).or_default();
        for node in staged {
            rows.insert(node.event.event_id, node);
        }
        Ok(AppendHistoryNodesResponse { size })
    }

    async fn fork_history_branch(
        &self,
        request: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, StorageError> {
        let mut inner = self.lock()?;
        let source = inner.live_branch(&request.fork_branch_token)?.info.clone();
        let fork_node_id = request.fork_node_id;
        let last_node_id = inner.last_node_id(&source);
        if fork_node_id <= FIRST_EVENT_ID || fork_node_id > last_node_id + 1 {
            return Err(StorageError::InvalidForkPoint {
                fork_node_id,
                last_node_id,
            });
        }

        let mut ancestors = Vec::new();
        for range in &source.ancestors {
            if range.begin_node_id >= fork_node_id {
                break;
            }
            ancestors.push(BranchRange {
                branch_id: range.branch_id.clone(),
                begin_node_id: range.begin_node_id,
                end_node_id: range.end_node_id.min(fork_node_id),
            });
        }
        let own_begin = source.begin_node_id();
        if fork_node_id > own_begin {
            ancestors.push(BranchRange {
                branch_id: source.branch_id.clone(),
                begin_node_id: own_begin,
                end_node_id: fork_node_id,
            });
        }

        let info = BranchInfo {
            tree_id: source.tree_id.clone(),
            branch_id: uuid::Uuid::new_v4().to_string(),
            ancestors,
        };
        let new_branch_token = info.encode()?;
        tracing::debug!(
            tree_id = %info.tree_id,
            source_branch = %source.branch_id,
            new_branch = %info.branch_id,
            fork_node_id,
            shard_id = request.shard_id,
            new_run_id = %request.new_run_id,
            "forked history branch"
        );
        inner.branches.insert(
            info.branch_id.clone(),
            BranchRecord {
                info,
                gc_info: request.info,
            },
        );
        Ok(ForkHistoryBranchResponse { new_branch_token })
    }

    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, StorageError> {
        if request.min_node_id < FIRST_EVENT_ID || request.min_node_id >= request.max_node_id {
            return Err(StorageError::InvalidReadRange {
                min_node_id: request.min_node_id,
                max_node_id: request.max_node_id,
            });
        }
        let start = match &request.next_page_token {
            Some(token) => decode_page_token(token)?,
            None => request.min_node_id,
        };
        if start < request.min_node_id || start > request.max_node_id {
            return Err(StorageError::InvalidPageToken);
        }

        let inner = self.lock()?;
        let info = &inner.live_branch(&request.branch_token)?.info;
        let probe = match request.page_size {
            0 => 0,
            n => n + 1,
        };
        let mut nodes = inner.collect(info, start, request.max_node_id, probe);

        let next_page_token = if request.page_size != 0 && nodes.len() > request.page_size {
            let next = nodes[request.page_size].event.event_id;
            nodes.truncate(request.page_size);
            Some(next.to_be_bytes().to_vec())
        } else {
            None
        };

        let size = nodes.iter().map(|node| node.size).sum();
        let events = nodes.into_iter().map(|node| node.event.clone()).collect();
        Ok(ReadHistoryBranchResponse {
            events,
            size,
            next_page_token,
        })
    }

    async fn get_history_tree(
        &self,
        tree_id: &str,
    ) -> Result<Vec<HistoryBranchDetail>, StorageError> {
        let inner = self.lock()?;
        let mut details = inner
            .branches
            .values()
            .filter(|record| record.info.tree_id == tree_id)
            .map(|record| -> Result<HistoryBranchDetail, StorageError> {
                Ok(HistoryBranchDetail {
                    tree_id: record.info.tree_id.clone(),
                    branch_id: record.info.branch_id.clone(),
                    branch_token: record.info.encode()?,
                    info: record.gc_info.clone(),
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        details.sort_by(|a, b| a.branch_id.cmp(&b.branch_id));
        Ok(details)
    }

    async fn delete_history_branch(&self, branch_token: &BranchToken) -> Result<(), StorageError> {
        let info = BranchInfo::decode(branch_token)?;
        let mut inner = self.lock()?;
        if inner.branches.remove(&info.branch_id).is_none() {
            return Err(StorageError::BranchNotFound {
                branch_id: info.branch_id,
            });
        }
        inner.prune_unreachable_nodes();
        tracing::debug!(tree_id = %info.tree_id, branch_id = %info.branch_id, "deleted history branch");
        Ok(())
    }
}

// ──────────────────────────────────────────────
// InMemoryChildExecutionStore
// ──────────────────────────────────────────────

type ChildKey = (i32, String, String, String, i64);

fn run_bounds(
    shard_id: i32,
    namespace_id: &str,
    workflow_id: &str,
    run_id: &str,
) -> (ChildKey, ChildKey) {
    let lo = (
        shard_id,
        namespace_id.to_string(),
        workflow_id.to_string(),
        run_id.to_string(),
        i64::MIN,
    );
    let mut hi = lo.clone();
    hi.4 = i64::MAX;
    (lo, hi)
}

/// Thread-safe in-memory [`ChildExecutionStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryChildExecutionStore {
    rows: Arc<Mutex<BTreeMap<ChildKey, ChildExecutionInfoMapsRow>>>,
}

impl InMemoryChildExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<ChildKey, ChildExecutionInfoMapsRow>>, StorageError> {
        self.rows
            .lock()
            .map_err(|_| StorageError::Backend("child execution store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ChildExecutionStore for InMemoryChildExecutionStore {
    async fn replace_into_child_execution_info_maps(
        &self,
        rows: Vec<ChildExecutionInfoMapsRow>,
    ) -> Result<u64, StorageError> {
        let mut table = self.lock()?;
        let mut written = 0;
        for row in rows {
            let key = (
                row.shard_id,
                row.namespace_id.clone(),
                row.workflow_id.clone(),
                row.run_id.clone(),
                row.initiated_id,
            );
            table.insert(key, row);
            written += 1;
        }
        Ok(written)
    }

    async fn select_all_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsAllFilter,
    ) -> Result<Vec<ChildExecutionInfoMapsRow>, StorageError> {
        let table = self.lock()?;
        let (lo, hi) = run_bounds(
            filter.shard_id,
            &filter.namespace_id,
            &filter.workflow_id,
            &filter.run_id,
        );
        Ok(table.range(lo..=hi).map(|(_, row)| row.clone()).collect())
    }

    async fn delete_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsFilter,
    ) -> Result<u64, StorageError> {
        let mut table = self.lock()?;
        let mut removed = 0;
        for &initiated_id in &filter.initiated_ids {
            let key = (
                filter.shard_id,
                filter.namespace_id.clone(),
                filter.workflow_id.clone(),
                filter.run_id.clone(),
                initiated_id,
            );
            if table.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_all_from_child_execution_info_maps(
        &self,
        filter: &ChildExecutionInfoMapsAllFilter,
    ) -> Result<u64, StorageError> {
        let mut table = self.lock()?;
        let (lo, hi) = run_bounds(
            filter.shard_id,
            &filter.namespace_id,
            &filter.workflow_id,
            &filter.run_id,
        );
        let keys: Vec<ChildKey> = table.range(lo..=hi).map(|(key, _)| key.clone()).collect();
        for key in &keys {
            table.remove(key);
        }
        Ok(keys.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_ancestry_is_trimmed_to_fork_point() {
        let info = BranchInfo {
            tree_id: "t".to_string(),
            branch_id: "b2".to_string(),
            ancestors: vec![BranchRange {
                branch_id: "b1".to_string(),
                begin_node_id: 1,
                end_node_id: 5,
            }],
        };
        assert_eq!(info.begin_node_id(), 5);
        let token = info.encode().unwrap();
        assert_eq!(BranchInfo::decode(&token).unwrap(), info);
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = BranchInfo::decode(&BranchToken::new(b"\x00\x01".to_vec())).unwrap_err();
        assert!(matches!(err, StorageError::InvalidBranchToken(_)));
    }

    #[test]
    fn page_token_must_be_eight_bytes() {
        assert_eq!(decode_page_token(&7i64.to_be_bytes()).unwrap(), 7);
        assert!(matches!(
            decode_page_token(b"abc"),
            Err(StorageError::InvalidPageToken)
        ));
    }
}
