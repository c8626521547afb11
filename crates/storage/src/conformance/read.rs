use std::future::Future;

use super::{read_ids, read_request, seeded_branch, TestResult};
use crate::{HistoryStore, StorageError};

pub(super) async fn run_read_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "read",
        "read_range_is_half_open",
        read_range_is_half_open(factory).await,
    ));
    results.push(TestResult::from_result(
        "read",
        "read_past_tip_returns_what_exists",
        read_past_tip_returns_what_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "read",
        "pagination_covers_range_once",
        pagination_covers_range_once(factory).await,
    ));
    results.push(TestResult::from_result(
        "read",
        "read_size_matches_append_size",
        read_size_matches_append_size(factory).await,
    ));
    results.push(TestResult::from_result(
        "read",
        "empty_range_rejected",
        empty_range_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "read",
        "foreign_page_token_rejected",
        foreign_page_token_rejected(factory).await,
    ));

    results
}

/// `[2, 4)` yields events 2 and 3.
async fn read_range_is_half_open<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 5).await?;
    let ids = read_ids(&s, &token, 2, 4).await?;
    if ids != vec![2, 3] {
        return Err(format!("expected [2, 3], got {ids:?}"));
    }
    Ok(())
}

/// Reading beyond the tip is not an error; missing nodes are simply absent.
async fn read_past_tip_returns_what_exists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 3).await?;
    let ids = read_ids(&s, &token, 1, 10).await?;
    if ids != vec![1, 2, 3] {
        return Err(format!("expected [1, 2, 3], got {ids:?}"));
    }
    Ok(())
}

/// Following page tokens visits every event exactly once, in order.
async fn pagination_covers_range_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 7).await?;

    let mut request = read_request(&token, 1, 8);
    request.page_size = 3;
    let mut seen = Vec::new();
    let mut pages = 0;
    loop {
        let resp = s
            .read_history_branch(request.clone())
            .await
            .map_err(|e| e.to_string())?;
        pages += 1;
        if resp.events.len() > 3 {
            return Err(format!("page of {} exceeds page size 3", resp.events.len()));
        }
        seen.extend(resp.events.iter().map(|e| e.event_id));
        match resp.next_page_token {
            Some(next) => request.next_page_token = Some(next),
            None => break,
        }
        if pages > 10 {
            return Err("pagination did not terminate".to_string());
        }
    }
    if seen != (1..=7).collect::<Vec<_>>() {
        return Err(format!("expected [1..=7], got {seen:?}"));
    }
    if pages != 3 {
        return Err(format!("expected 3 pages, got {pages}"));
    }
    Ok(())
}

/// Bytes reported by a full read equal bytes reported by the append.
async fn read_size_matches_append_size<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let appended = s
        .append_history_nodes(super::append_request(&token, super::make_events(1, 4, 0)))
        .await
        .map_err(|e| e.to_string())?;
    let resp = s
        .read_history_branch(read_request(&token, 1, 5))
        .await
        .map_err(|e| e.to_string())?;
    if resp.size != appended.size {
        return Err(format!(
            "read size {} differs from appended size {}",
            resp.size, appended.size
        ));
    }
    Ok(())
}

/// `min >= max` is an invalid range.
async fn empty_range_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 3).await?;
    match s.read_history_branch(read_request(&token, 3, 3)).await {
        Err(StorageError::InvalidReadRange {
            min_node_id: 3,
            max_node_id: 3,
        }) => Ok(()),
        other => Err(format!("expected InvalidReadRange, got {other:?}")),
    }
}

/// A page token the store never issued is rejected.
async fn foreign_page_token_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let token = seeded_branch(&s, "tree-1", 3).await?;
    let mut request = read_request(&token, 1, 4);
    request.next_page_token = Some(b"garbage".to_vec());
    match s.read_history_branch(request).await {
        Err(StorageError::InvalidPageToken) => Ok(()),
        other => Err(format!("expected InvalidPageToken, got {other:?}")),
    }
}
