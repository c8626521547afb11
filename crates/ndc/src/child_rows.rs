//! Conversion between a state's pending children and the persisted
//! child-execution map rows.

use skein_storage::ChildExecutionInfoMapsRow;

use crate::error::NdcError;
use crate::mutable_state::{ChildExecutionInfo, MutableState};

pub const CHILD_EXECUTION_DATA_ENCODING: &str = "json/plain";

/// One row per pending child of `state`, ordered by initiated event id.
pub fn child_execution_rows(
    shard_id: i32,
    state: &MutableState,
) -> Result<Vec<ChildExecutionInfoMapsRow>, NdcError> {
    let key = state.key();
    state
        .pending_children()
        .values()
        .map(|child| -> Result<ChildExecutionInfoMapsRow, NdcError> {
            let data = serde_json::to_vec(child).map_err(|e| {
                NdcError::Internal(format!(
                    "encoding child {} of {key}: {e}",
                    child.initiated_event_id
                ))
            })?;
            Ok(ChildExecutionInfoMapsRow {
                shard_id,
                namespace_id: key.namespace_id.clone(),
                workflow_id: key.workflow_id.clone(),
                run_id: key.run_id.clone(),
                initiated_id: child.initiated_event_id,
                data,
                data_encoding: CHILD_EXECUTION_DATA_ENCODING.to_string(),
            })
        })
        .collect()
}

pub fn decode_child_execution_row(
    row: &ChildExecutionInfoMapsRow,
) -> Result<ChildExecutionInfo, NdcError> {
    if row.data_encoding != CHILD_EXECUTION_DATA_ENCODING {
        return Err(NdcError::Internal(format!(
            "unsupported child execution encoding {:?}",
            row.data_encoding
        )));
    }
    serde_json::from_slice(&row.data).map_err(|e| {
        NdcError::Internal(format!(
            "decoding child {} of {}/{}/{}: {e}",
            row.initiated_id, row.namespace_id, row.workflow_id, row.run_id
        ))
    })
}
