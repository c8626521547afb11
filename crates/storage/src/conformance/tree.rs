use std::future::Future;

use super::{append_request, make_events, read_ids, seeded_branch, TestResult};
use crate::record::{build_history_garbage_cleanup_info, ForkHistoryBranchRequest};
use crate::HistoryStore;

pub(super) async fn run_tree_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "tree",
        "tree_lists_forks_with_gc_info",
        tree_lists_forks_with_gc_info(factory).await,
    ));
    results.push(TestResult::from_result(
        "tree",
        "tree_scoped_by_tree_id",
        tree_scoped_by_tree_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "tree",
        "delete_removes_branch_from_tree",
        delete_removes_branch_from_tree(factory).await,
    ));
    results.push(TestResult::from_result(
        "tree",
        "delete_source_keeps_shared_nodes",
        delete_source_keeps_shared_nodes(factory).await,
    ));
    results.push(TestResult::from_result(
        "tree",
        "delete_twice_not_found",
        delete_twice_not_found(factory).await,
    ));

    results
}

fn gc_fork(token: &skein_core::BranchToken, fork_node_id: i64, run_id: &str) -> ForkHistoryBranchRequest {
    ForkHistoryBranchRequest {
        fork_branch_token: token.clone(),
        fork_node_id,
        info: build_history_garbage_cleanup_info("ns", "wf", run_id),
        shard_id: 1,
        namespace_id: "ns".to_string(),
        new_run_id: run_id.to_string(),
    }
}

/// A fork appears in its tree listing carrying the cleanup tag it was given.
async fn tree_lists_forks_with_gc_info<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    let forked = s
        .fork_history_branch(gc_fork(&base, 3, "run-2"))
        .await
        .map_err(|e| e.to_string())?
        .new_branch_token;

    let tree = s
        .get_history_tree("tree-1")
        .await
        .map_err(|e| e.to_string())?;
    if tree.len() != 2 {
        return Err(format!("expected 2 branches, got {}", tree.len()));
    }
    let Some(detail) = tree.iter().find(|d| d.branch_token == forked) else {
        return Err("forked branch missing from tree listing".to_string());
    };
    if detail.info != "ns:wf:run-2" {
        return Err(format!("expected gc info 'ns:wf:run-2', got '{}'", detail.info));
    }
    if detail.tree_id != "tree-1" {
        return Err(format!("expected tree id 'tree-1', got '{}'", detail.tree_id));
    }
    Ok(())
}

/// Branches of other trees are not listed.
async fn tree_scoped_by_tree_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seeded_branch(&s, "tree-1", 2).await?;
    seeded_branch(&s, "tree-2", 2).await?;
    let tree = s
        .get_history_tree("tree-2")
        .await
        .map_err(|e| e.to_string())?;
    if tree.len() != 1 || tree[0].tree_id != "tree-2" {
        return Err(format!("expected one tree-2 branch, got {tree:?}"));
    }
    Ok(())
}

/// A deleted fork no longer appears in the listing.
async fn delete_removes_branch_from_tree<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 3).await?;
    let forked = s
        .fork_history_branch(gc_fork(&base, 2, "run-2"))
        .await
        .map_err(|e| e.to_string())?
        .new_branch_token;
    s.delete_history_branch(&forked)
        .await
        .map_err(|e| e.to_string())?;

    let tree = s
        .get_history_tree("tree-1")
        .await
        .map_err(|e| e.to_string())?;
    if tree.len() != 1 || tree[0].branch_token != base {
        return Err(format!("expected only the base branch, got {tree:?}"));
    }
    Ok(())
}

/// Deleting the source of a fork keeps the nodes the fork shares.
async fn delete_source_keeps_shared_nodes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 5).await?;
    let forked = s
        .fork_history_branch(gc_fork(&base, 4, "run-2"))
        .await
        .map_err(|e| e.to_string())?
        .new_branch_token;
    s.append_history_nodes(append_request(&forked, make_events(4, 4, 3)))
        .await
        .map_err(|e| e.to_string())?;
    s.delete_history_branch(&base)
        .await
        .map_err(|e| e.to_string())?;

    let ids = read_ids(&s, &forked, 1, 100).await?;
    if ids != vec![1, 2, 3, 4] {
        return Err(format!("expected [1, 2, 3, 4] after source delete, got {ids:?}"));
    }
    Ok(())
}

/// A second delete of the same branch fails with BranchNotFound.
async fn delete_twice_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let base = seeded_branch(&s, "tree-1", 2).await?;
    s.delete_history_branch(&base)
        .await
        .map_err(|e| e.to_string())?;
    match s.delete_history_branch(&base).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("expected BranchNotFound, got {other:?}")),
    }
}
