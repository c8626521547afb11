use std::future::Future;

use skein_core::BranchToken;

use super::{append_request, make_events, read_ids, seeded_branch, TestResult};
use crate::record::{build_history_garbage_cleanup_info, ForkHistoryBranchRequest};
use crate::{HistoryStore, StorageError};

pub(super) async fn run_fork_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Shared prefix
    results.push(TestResult::from_result(
        "fork",
        "fork_shares_prefix",
        fork_shares_prefix(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_at_tip_plus_one_shares_everything",
        fork_at_tip_plus_one_shares_everything(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_of_fork_reads_through_ancestors",
        fork_of_fork_reads_through_ancestors(factory).await,
    ));

    // Independence
    results.push(TestResult::from_result(
        "fork",
        "fork_appends_after_fork_point",
        fork_appends_after_fork_point(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_writes_invisible_to_source",
        fork_writes_invisible_to_source(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_returns_distinct_token",
        fork_returns_distinct_token(factory).await,
    ));

    // Validation
    results.push(TestResult::from_result(
        "fork",
        "fork_at_root_rejected",
        fork_at_root_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_beyond_tip_rejected",
        fork_beyond_tip_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "fork",
        "fork_unknown_branch_not_found",
        fork_unknown_branch_not_found(factory).await,
    ));

    results
}

fn fork_request(token: &BranchToken, fork_node_id: i64, new_run_id: &str) -> ForkHistoryBranchRequest {
    ForkHistoryBranchRequest {
        fork_branch_token: token.clone(),
        fork_node_id,
        info: build_history_garbage_cleanup_info("ns", "wf", new_run_id),
        shard_id: 1,
        namespace_id: "ns".to_string(),
        new_run_id: new_run_id.to_string(),
    }
}

async fn fork<S: HistoryStore>(
    s: &S,
    token: &BranchToken,
    fork_node_id: i64,
) -> Result<BranchToken, String> {
    s.fork_history_branch(fork_request(token, fork_node_id, "run-new"))
        .await
        .map(|resp| resp.new_branch_token)
        .map_err(|e| format!("fork at {fork_node_id}: {e}"))
}

// ── Shared prefix ────────────────────────────────────────────────────────────

/// Forking 1..=5 at node 3 yields a branch holding exactly 1 and 2.
async fn fork_shares_prefix<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 5).await?;
    let forked = fork(&s, &base, 3).await?;
    let ids = read_ids(&s, &forked, 1, 100).await?;
    if ids != vec![1, 2] {
        return Err(format!("expected [1, 2] on fork, got {ids:?}"));
    }
    Ok(())
}

/// Forking at tip + 1 shares the whole source branch.
async fn fork_at_tip_plus_one_shares_everything<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    let forked = fork(&s, &base, 4).await?;
    let ids = read_ids(&s, &forked, 1, 100).await?;
    if ids != vec![1, 2, 3] {
        return Err(format!("expected [1, 2, 3] on fork, got {ids:?}"));
    }
    Ok(())
}

/// A fork of a fork stitches nodes from both ancestors.
async fn fork_of_fork_reads_through_ancestors<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 4).await?;
    let first = fork(&s, &base, 3).await?;
    s.append_history_nodes(append_request(&first, make_events(3, 6, 2)))
        .await
        .map_err(|e| e.to_string())?;
    let second = fork(&s, &first, 5).await?;

    let ids = read_ids(&s, &second, 1, 100).await?;
    if ids != vec![1, 2, 3, 4] {
        return Err(format!("expected [1, 2, 3, 4] on second fork, got {ids:?}"));
    }
    let resp = s
        .read_history_branch(super::read_request(&second, 1, 100))
        .await
        .map_err(|e| e.to_string())?;
    let versions: Vec<i64> = resp.events.iter().map(|e| e.version).collect();
    if versions != vec![0, 0, 2, 2] {
        return Err(format!("expected versions [0, 0, 2, 2], got {versions:?}"));
    }
    Ok(())
}

// ── Independence ─────────────────────────────────────────────────────────────

/// The first append to a fork must start at the fork node.
async fn fork_appends_after_fork_point<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 5).await?;
    let forked = fork(&s, &base, 3).await?;

    let wrong = s
        .append_history_nodes(append_request(&forked, make_events(6, 6, 1)))
        .await;
    if !matches!(
        wrong,
        Err(StorageError::AppendConflict {
            expected_event_id: 3,
            ..
        })
    ) {
        return Err(format!("expected AppendConflict at 3, got {wrong:?}"));
    }

    s.append_history_nodes(append_request(&forked, make_events(3, 4, 1)))
        .await
        .map_err(|e| e.to_string())?;
    let ids = read_ids(&s, &forked, 1, 100).await?;
    if ids != vec![1, 2, 3, 4] {
        return Err(format!("expected [1, 2, 3, 4] on fork, got {ids:?}"));
    }
    Ok(())
}

/// Events appended to a fork never show up on the source branch.
async fn fork_writes_invisible_to_source<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 2).await?;
    let forked = fork(&s, &base, 3).await?;
    s.append_history_nodes(append_request(&forked, make_events(3, 5, 7)))
        .await
        .map_err(|e| e.to_string())?;

    let resp = s
        .read_history_branch(super::read_request(&base, 1, 100))
        .await
        .map_err(|e| e.to_string())?;
    if resp.events.len() != 2 || resp.events.iter().any(|e| e.version == 7) {
        return Err(format!(
            "source branch changed after fork write: {:?}",
            resp.events.iter().map(|e| (e.event_id, e.version)).collect::<Vec<_>>()
        ));
    }
    Ok(())
}

/// Two forks at the same point are different branches.
async fn fork_returns_distinct_token<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    let a = fork(&s, &base, 2).await?;
    let b = fork(&s, &base, 2).await?;
    if a == b || a == base {
        return Err("expected distinct branch tokens".to_string());
    }
    Ok(())
}

// ── Validation ───────────────────────────────────────────────────────────────

/// Forking at the root node shares nothing and is rejected.
async fn fork_at_root_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    match s.fork_history_branch(fork_request(&base, 1, "run-new")).await {
        Err(StorageError::InvalidForkPoint { fork_node_id: 1, .. }) => Ok(()),
        other => Err(format!("expected InvalidForkPoint, got {other:?}")),
    }
}

/// Forking past tip + 1 would leave a gap and is rejected.
async fn fork_beyond_tip_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    match s.fork_history_branch(fork_request(&base, 5, "run-new")).await {
        Err(StorageError::InvalidForkPoint {
            fork_node_id: 5,
            last_node_id: 3,
        }) => Ok(()),
        other => Err(format!("expected InvalidForkPoint(5, 3), got {other:?}")),
    }
}

/// Forking a deleted branch fails with BranchNotFound.
async fn fork_unknown_branch_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    s.delete_history_branch(&base)
        .await
        .map_err(|e| e.to_string())?;
    match s.fork_history_branch(fork_request(&base, 2, "run-new")).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("expected BranchNotFound, got {other:?}")),
    }
}
