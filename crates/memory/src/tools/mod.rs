//! Handlers for the five agent-facing operations.
//!
//! Each handler returns a JSON text payload on success and an `ErrorData` on
//! failure: `invalid_params` for anything the caller can fix, `internal_error`
//! otherwise.

pub mod delete;
pub mod list;
pub mod read;
pub mod save;
pub mod search;

use rmcp::model::{CallToolResult, Content, ErrorData};
use serde::Serialize;

/// Serialize a response as the tool's single text content.
fn json_result<T: Serialize>(response: &T) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string(response).map_err(|e| {
        ErrorData::internal_error(format!("Failed to serialize response: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
