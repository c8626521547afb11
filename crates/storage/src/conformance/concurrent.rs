use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::{append_request, make_events, read_ids, seeded_branch, TestResult};
use crate::record::{build_history_garbage_cleanup_info, ForkHistoryBranchRequest};
use crate::{HistoryStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_forks_yield_distinct_branches",
        concurrent_forks_yield_distinct_branches(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_fork_writes_stay_isolated",
        concurrent_fork_writes_stay_isolated(factory).await,
    ));

    results
}

// ── Concurrent forks: no branch id collisions ───────────────────────────────

/// N tasks fork the same base at the same node. Every fork must be a distinct
/// branch and every fork must read back the shared prefix.
async fn concurrent_forks_yield_distinct_branches<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let base = seeded_branch(storage.as_ref(), "tree-1", 4).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let base = base.clone();
        handles.push(tokio::spawn(async move {
            let run_id = format!("run-{i}");
            s.fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: base,
                fork_node_id: 3,
                info: build_history_garbage_cleanup_info("ns", "wf", &run_id),
                shard_id: 1,
                namespace_id: "ns".to_string(),
                new_run_id: run_id,
            })
            .await
            .map(|resp| resp.new_branch_token)
        }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        let token = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        tokens.push(token);
    }

    let distinct: HashSet<_> = tokens.iter().collect();
    if distinct.len() != N {
        return Err(format!("expected {N} distinct forks, got {}", distinct.len()));
    }
    for token in &tokens {
        let ids = read_ids(storage.as_ref(), token, 1, 100).await?;
        if ids != vec![1, 2] {
            return Err(format!("expected [1, 2] on fork, got {ids:?}"));
        }
    }
    Ok(())
}

// ── Concurrent writes to sibling forks ──────────────────────────────────────

/// N forks of one base each receive their own events concurrently. No fork
/// sees another fork's writes.
async fn concurrent_fork_writes_stay_isolated<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let base = seeded_branch(storage.as_ref(), "tree-1", 2).await?;

    let mut forks = Vec::new();
    for i in 0..N {
        let token = storage
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: base.clone(),
                fork_node_id: 3,
                info: build_history_garbage_cleanup_info("ns", "wf", &format!("run-{i}")),
                shard_id: 1,
                namespace_id: "ns".to_string(),
                new_run_id: format!("run-{i}"),
            })
            .await
            .map_err(|e| format!("fork: {e}"))?
            .new_branch_token;
        forks.push(token);
    }

    let mut handles = Vec::new();
    for (i, token) in forks.iter().enumerate() {
        let s = storage.clone();
        let token = token.clone();
        let last = 3 + i as i64;
        handles.push(tokio::spawn(async move {
            s.append_history_nodes(append_request(&token, make_events(3, last, i as i64 + 1)))
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("append: {e}"))?;
    }

    for (i, token) in forks.iter().enumerate() {
        let ids = read_ids(storage.as_ref(), token, 1, 100).await?;
        let expected: Vec<i64> = (1..=3 + i as i64).collect();
        if ids != expected {
            return Err(format!("fork {i}: expected {expected:?}, got {ids:?}"));
        }
    }
    let base_ids = read_ids(storage.as_ref(), &base, 1, 100).await?;
    if base_ids != vec![1, 2] {
        return Err(format!("base changed: {base_ids:?}"));
    }
    Ok(())
}
