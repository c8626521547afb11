use skein_core::{BranchToken, WorkflowKey, FIRST_EVENT_ID};
use skein_storage::{HistoryStore, ReadHistoryBranchRequest, StorageError};
use time::OffsetDateTime;
use tracing::Instrument;

use crate::error::NdcError;
use crate::mutable_state::MutableState;
use crate::shard::Shard;
use crate::state_builder::StateBuilder;

/// Inputs of one rebuild.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    /// Run whose history is read.
    pub source_key: WorkflowKey,
    pub source_branch: BranchToken,
    /// Last event to replay, inclusive.
    pub upto_event_id: i64,
    /// When set, the replayed lineage must end at exactly this version.
    pub upto_version: Option<i64>,
    /// Run the rebuilt state is addressed as.
    pub target_key: WorkflowKey,
    /// Branch the rebuilt state's current version history points at.
    pub target_branch: BranchToken,
    /// Correlates the rebuild in logs; never stored in the state.
    pub request_id: String,
}

/// Replays a branch prefix into a fresh [`MutableState`].
pub struct StateRebuilder<H> {
    shard: Shard<H>,
}

impl<H: HistoryStore> StateRebuilder<H> {
    pub fn new(shard: Shard<H>) -> Self {
        StateRebuilder { shard }
    }

    /// Read `[FIRST_EVENT_ID, upto_event_id]` from the source branch page by
    /// page and replay it.
    ///
    /// Returns the rebuilt state and the number of history bytes replayed.
    /// The result depends only on the branch prefix and the target identity;
    /// `now` is recorded on the span. Scheduling the run expiry is left to
    /// the caller.
    pub async fn rebuild(
        &self,
        now: OffsetDateTime,
        request: &RebuildRequest,
    ) -> Result<(MutableState, u64), NdcError> {
        let span = tracing::debug_span!(
            "rebuild",
            request_id = %request.request_id,
            source = %request.source_key,
            target = %request.target_key,
            upto_event_id = request.upto_event_id,
            now = %now,
        );
        self.replay(request).instrument(span).await
    }

    async fn replay(&self, request: &RebuildRequest) -> Result<(MutableState, u64), NdcError> {
        let max_node_id = request.upto_event_id.checked_add(1).ok_or_else(|| {
            NdcError::Internal(format!(
                "rebuild end event id {} out of range",
                request.upto_event_id
            ))
        })?;
        let mut builder = StateBuilder::new(
            request.target_key.clone(),
            request.target_branch.clone(),
            request.upto_event_id,
        );
        let mut read = ReadHistoryBranchRequest {
            shard_id: self.shard.shard_id(),
            branch_token: request.source_branch.clone(),
            min_node_id: FIRST_EVENT_ID,
            max_node_id,
            page_size: self.shard.config().history_page_size,
            next_page_token: None,
        };
        let mut size: u64 = 0;
        let mut pages = 0usize;

        loop {
            let page = self
                .shard
                .history_store()
                .read_history_branch(read.clone())
                .await
                .map_err(|e| match e {
                    StorageError::BranchNotFound { branch_id } => NdcError::NotFound(format!(
                        "history branch {branch_id} of {}",
                        request.source_key
                    )),
                    other => NdcError::Store(other),
                })?;
            pages += 1;
            size += page.size as u64;
            builder.apply_events(&page.events)?;

            match page.next_page_token {
                Some(_) if page.events.is_empty() => {
                    return Err(NdcError::Internal(
                        "history store returned an empty page with a continuation token"
                            .to_string(),
                    ));
                }
                Some(token) => read.next_page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            pages,
            bytes = size,
            last_event_id = builder.last_event_id(),
            "history replayed"
        );

        let state = builder.finish(request.upto_version)?;
        Ok((state, size))
    }
}
