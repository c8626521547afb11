//! Conformance test suite for `HistoryStore` and `ChildExecutionStore`
//! implementations.
//!
//! This module provides a backend-agnostic test suite that any store
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Append**: contiguity at the branch tip, size accounting
//! - **Fork**: shared prefixes, fork-point validation, independence of forks
//! - **Read**: half-open ranges, pagination, error variants
//! - **Tree**: garbage-collection listing and deletion of shared branches
//! - **Concurrent**: racing forks and appends from spawned tasks
//! - **Child**: child-execution map CRUD
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use skein_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod append;
mod child;
mod concurrent;
mod fork;
mod read;
mod tree;

use std::fmt;
use std::future::Future;

use skein_core::{BranchToken, EventAttributes, HistoryEvent, FIRST_EVENT_ID};

use crate::record::{AppendHistoryNodesRequest, ChildExecutionInfoMapsRow, ReadHistoryBranchRequest};
use crate::{ChildExecutionStore, HistoryStore};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "append", "fork", "read").
    pub category: String,
    /// Test name (e.g. "fork_shares_prefix").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ConformanceReport {
    fn from_results(results: Vec<TestResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let total = results.len();
        ConformanceReport {
            results,
            passed,
            failed: total - passed,
            total,
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the history-store conformance suite against a backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: HistoryStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(append::run_append_tests(&factory).await);
    results.extend(fork::run_fork_tests(&factory).await);
    results.extend(read::run_read_tests(&factory).await);
    results.extend(tree::run_tree_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    ConformanceReport::from_results(results)
}

/// Run the child-execution map conformance suite against a backend.
pub async fn run_child_execution_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ChildExecutionStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    ConformanceReport::from_results(child::run_child_tests(&factory).await)
}

// ── Helpers: fixtures with sensible defaults ─────────────────────────────────

fn event_time() -> time::OffsetDateTime {
    time::OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000)
}

/// Event `event_id` at `version`. Event 1 is always a start event.
fn make_event(event_id: i64, version: i64) -> HistoryEvent {
    let attributes = if event_id == FIRST_EVENT_ID {
        EventAttributes::WorkflowExecutionStarted {
            workflow_type: "conformance".to_string(),
            task_queue: "default".to_string(),
            run_timeout_secs: None,
        }
    } else {
        EventAttributes::WorkflowExecutionSignaled {
            signal_name: format!("signal-{event_id}"),
        }
    };
    HistoryEvent::new(event_id, version, event_time(), attributes)
}

fn make_events(first: i64, last: i64, version: i64) -> Vec<HistoryEvent> {
    (first..=last).map(|id| make_event(id, version)).collect()
}

fn append_request(branch_token: &BranchToken, events: Vec<HistoryEvent>) -> AppendHistoryNodesRequest {
    AppendHistoryNodesRequest {
        branch_token: branch_token.clone(),
        events,
        transaction_id: 1,
    }
}

fn read_request(branch_token: &BranchToken, min: i64, max: i64) -> ReadHistoryBranchRequest {
    ReadHistoryBranchRequest {
        shard_id: 1,
        branch_token: branch_token.clone(),
        min_node_id: min,
        max_node_id: max,
        page_size: 0,
        next_page_token: None,
    }
}

fn make_child_row(run_id: &str, initiated_id: i64) -> ChildExecutionInfoMapsRow {
    ChildExecutionInfoMapsRow {
        shard_id: 1,
        namespace_id: "ns".to_string(),
        workflow_id: "wf".to_string(),
        run_id: run_id.to_string(),
        initiated_id,
        data: format!("{{\"initiated_id\":{initiated_id}}}").into_bytes(),
        data_encoding: "json/plain".to_string(),
    }
}

/// Root branch of `tree_id` holding events `1..=last` at version 0.
async fn seeded_branch<S: HistoryStore>(
    s: &S,
    tree_id: &str,
    last: i64,
) -> Result<BranchToken, String> {
    let token = s
        .new_history_branch(tree_id)
        .await
        .map_err(|e| format!("new branch: {e}"))?;
    s.append_history_nodes(append_request(&token, make_events(1, last, 0)))
        .await
        .map_err(|e| format!("append: {e}"))?;
    Ok(token)
}

/// Event ids of `[min, max)` on a branch, in one unpaged read.
async fn read_ids<S: HistoryStore>(
    s: &S,
    token: &BranchToken,
    min: i64,
    max: i64,
) -> Result<Vec<i64>, String> {
    let resp = s
        .read_history_branch(read_request(token, min, max))
        .await
        .map_err(|e| format!("read: {e}"))?;
    Ok(resp.events.iter().map(|e| e.event_id).collect())
}
