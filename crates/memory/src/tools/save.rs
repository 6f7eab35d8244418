//! Save tool - optimistic write into a category.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::json_result;
use crate::writer::{AsyncWriter, WriteError};

/// Response from the Save tool.
#[derive(Serialize)]
pub struct SaveResponse {
    pub success: bool,
    /// Normalized path the file was stored under
    pub path: String,
}

/// Execute the Save tool.
///
/// Returns as soon as the cache holds the new content; the remote write
/// continues in the background.
pub fn execute(
    writer: &AsyncWriter,
    category: &str,
    name: &str,
    content: &str,
) -> Result<CallToolResult, ErrorData> {
    let path = writer.save(category, name, content).map_err(|e| match e {
        WriteError::ContentTooLarge { .. } | WriteError::InvalidName(_) => {
            ErrorData::invalid_params(e.to_string(), None)
        }
        WriteError::NotFound { .. } => ErrorData::internal_error(e.to_string(), None),
    })?;

    json_result(&SaveResponse {
        success: true,
        path,
    })
}
