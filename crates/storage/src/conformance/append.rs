use std::future::Future;

use super::{append_request, make_event, make_events, read_ids, seeded_branch, TestResult};
use crate::{HistoryStore, StorageError};

pub(super) async fn run_append_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "append",
        "append_to_new_branch_starts_at_first_event",
        append_to_new_branch_starts_at_first_event(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "new_branch_must_start_at_first_event",
        new_branch_must_start_at_first_event(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "append_continues_tip",
        append_continues_tip(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "append_gap_is_conflict",
        append_gap_is_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "append_gap_inside_batch_writes_nothing",
        append_gap_inside_batch_writes_nothing(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "append_reports_encoded_size",
        append_reports_encoded_size(factory).await,
    ));
    results.push(TestResult::from_result(
        "append",
        "append_unknown_branch_not_found",
        append_unknown_branch_not_found(factory).await,
    ));

    results
}

// ── Contiguity ───────────────────────────────────────────────────────────────

/// A new branch accepts events 1..=3 and reads them back in order.
async fn append_to_new_branch_starts_at_first_event<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 3).await?;
    let ids = read_ids(&s, &token, 1, 100).await?;
    if ids != vec![1, 2, 3] {
        return Err(format!("expected [1, 2, 3], got {ids:?}"));
    }
    Ok(())
}

/// The first append to an empty branch must begin at event 1.
async fn new_branch_must_start_at_first_event<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = s
        .new_history_branch("tree-1")
        .await
        .map_err(|e| e.to_string())?;
    let result = s
        .append_history_nodes(append_request(&token, make_events(2, 3, 0)))
        .await;
    match result {
        Err(StorageError::AppendConflict {
            expected_event_id: 1,
            actual_event_id: 2,
        }) => Ok(()),
        other => Err(format!("expected AppendConflict(1, 2), got {other:?}")),
    }
}

/// Successive batches extend the tip.
async fn append_continues_tip<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 2).await?;
    s.append_history_nodes(append_request(&token, make_events(3, 5, 1)))
        .await
        .map_err(|e| e.to_string())?;
    let ids = read_ids(&s, &token, 1, 100).await?;
    if ids != vec![1, 2, 3, 4, 5] {
        return Err(format!("expected [1..=5], got {ids:?}"));
    }
    Ok(())
}

/// Skipping an event id is rejected with the expected id.
async fn append_gap_is_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 2).await?;
    let result = s
        .append_history_nodes(append_request(&token, vec![make_event(4, 0)]))
        .await;
    match result {
        Err(StorageError::AppendConflict {
            expected_event_id: 3,
            actual_event_id: 4,
        }) => Ok(()),
        other => Err(format!("expected AppendConflict(3, 4), got {other:?}")),
    }
}

/// A batch with an internal gap is rejected as a whole.
async fn append_gap_inside_batch_writes_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 2).await?;
    let batch = vec![make_event(3, 0), make_event(5, 0)];
    if s.append_history_nodes(append_request(&token, batch))
        .await
        .is_ok()
    {
        return Err("expected batch with gap to be rejected".to_string());
    }
    let ids = read_ids(&s, &token, 1, 100).await?;
    if ids != vec![1, 2] {
        return Err(format!("expected [1, 2] after rejected batch, got {ids:?}"));
    }
    Ok(())
}

// ── Size accounting ──────────────────────────────────────────────────────────

/// The reported size is the sum of the events' encoded sizes.
async fn append_reports_encoded_size<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = s
        .new_history_branch("tree-1")
        .await
        .map_err(|e| e.to_string())?;
    let events = make_events(1, 4, 0);
    let mut expected = 0;
    for event in &events {
        expected += event.encoded_size().map_err(|e| e.to_string())?;
    }
    let resp = s
        .append_history_nodes(append_request(&token, events))
        .await
        .map_err(|e| e.to_string())?;
    if resp.size != expected {
        return Err(format!("expected size {expected}, got {}", resp.size));
    }
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Appending to a deleted branch fails with BranchNotFound.
async fn append_unknown_branch_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 2).await?;
    s.delete_history_branch(&token)
        .await
        .map_err(|e| e.to_string())?;
    let result = s
        .append_history_nodes(append_request(&token, vec![make_event(3, 0)]))
        .await;
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => Err(format!("expected BranchNotFound, got {other:?}")),
    }
}
