use std::future::Future;

use super::{make_child_row, TestResult};
use crate::record::{ChildExecutionInfoMapsAllFilter, ChildExecutionInfoMapsFilter};
use crate::ChildExecutionStore;

pub(super) async fn run_child_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "child",
        "replace_then_select_all",
        replace_then_select_all(factory).await,
    ));
    results.push(TestResult::from_result(
        "child",
        "replace_overwrites_existing_row",
        replace_overwrites_existing_row(factory).await,
    ));
    results.push(TestResult::from_result(
        "child",
        "select_all_scoped_to_run",
        select_all_scoped_to_run(factory).await,
    ));
    results.push(TestResult::from_result(
        "child",
        "delete_listed_initiated_ids",
        delete_listed_initiated_ids(factory).await,
    ));
    results.push(TestResult::from_result(
        "child",
        "delete_all_for_run",
        delete_all_for_run(factory).await,
    ));

    results
}

fn all_filter(run_id: &str) -> ChildExecutionInfoMapsAllFilter {
    ChildExecutionInfoMapsAllFilter {
        shard_id: 1,
        namespace_id: "ns".to_string(),
        workflow_id: "wf".to_string(),
        run_id: run_id.to_string(),
    }
}

/// Rows come back ordered by initiated id.
async fn replace_then_select_all<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let written = s
        .replace_into_child_execution_info_maps(vec![
            make_child_row("run-1", 9),
            make_child_row("run-1", 5),
        ])
        .await
        .map_err(|e| e.to_string())?;
    if written != 2 {
        return Err(format!("expected 2 rows written, got {written}"));
    }
    let rows = s
        .select_all_from_child_execution_info_maps(&all_filter("run-1"))
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<i64> = rows.iter().map(|r| r.initiated_id).collect();
    if ids != vec![5, 9] {
        return Err(format!("expected [5, 9], got {ids:?}"));
    }
    Ok(())
}

/// Writing the same key twice keeps one row with the latest payload.
async fn replace_overwrites_existing_row<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.replace_into_child_execution_info_maps(vec![make_child_row("run-1", 5)])
        .await
        .map_err(|e| e.to_string())?;
    let mut updated = make_child_row("run-1", 5);
    updated.data = b"updated".to_vec();
    s.replace_into_child_execution_info_maps(vec![updated.clone()])
        .await
        .map_err(|e| e.to_string())?;

    let rows = s
        .select_all_from_child_execution_info_maps(&all_filter("run-1"))
        .await
        .map_err(|e| e.to_string())?;
    if rows != vec![updated] {
        return Err(format!("expected single updated row, got {rows:?}"));
    }
    Ok(())
}

/// Rows of other runs are invisible.
async fn select_all_scoped_to_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.replace_into_child_execution_info_maps(vec![
        make_child_row("run-1", 5),
        make_child_row("run-2", 6),
    ])
    .await
    .map_err(|e| e.to_string())?;
    let rows = s
        .select_all_from_child_execution_info_maps(&all_filter("run-2"))
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 1 || rows[0].initiated_id != 6 {
        return Err(format!("expected only run-2's row, got {rows:?}"));
    }
    Ok(())
}

/// Only the listed ids are deleted; unknown ids do not count.
async fn delete_listed_initiated_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.replace_into_child_execution_info_maps(vec![
        make_child_row("run-1", 5),
        make_child_row("run-1", 6),
        make_child_row("run-1", 7),
    ])
    .await
    .map_err(|e| e.to_string())?;
    let removed = s
        .delete_from_child_execution_info_maps(&ChildExecutionInfoMapsFilter {
            shard_id: 1,
            namespace_id: "ns".to_string(),
            workflow_id: "wf".to_string(),
            run_id: "run-1".to_string(),
            initiated_ids: vec![5, 7, 99],
        })
        .await
        .map_err(|e| e.to_string())?;
    if removed != 2 {
        return Err(format!("expected 2 rows removed, got {removed}"));
    }
    let rows = s
        .select_all_from_child_execution_info_maps(&all_filter("run-1"))
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 1 || rows[0].initiated_id != 6 {
        return Err(format!("expected only row 6 left, got {rows:?}"));
    }
    Ok(())
}

/// Delete-all removes one run's rows and leaves other runs alone.
async fn delete_all_for_run<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.replace_into_child_execution_info_maps(vec![
        make_child_row("run-1", 5),
        make_child_row("run-1", 6),
        make_child_row("run-2", 5),
    ])
    .await
    .map_err(|e| e.to_string())?;
    let removed = s
        .delete_all_from_child_execution_info_maps(&all_filter("run-1"))
        .await
        .map_err(|e| e.to_string())?;
    if removed != 2 {
        return Err(format!("expected 2 rows removed, got {removed}"));
    }
    let left = s
        .select_all_from_child_execution_info_maps(&all_filter("run-1"))
        .await
        .map_err(|e| e.to_string())?;
    let other = s
        .select_all_from_child_execution_info_maps(&all_filter("run-2"))
        .await
        .map_err(|e| e.to_string())?;
    if !left.is_empty() || other.len() != 1 {
        return Err(format!(
            "expected run-1 empty and run-2 intact, got {} / {}",
            left.len(),
            other.len()
        ));
    }
    Ok(())
}
