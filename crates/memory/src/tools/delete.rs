//! Delete tool - remove a file from the cache and, in the background, the remote store.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::json_result;
use crate::writer::{AsyncWriter, WriteError};

/// Response from the Delete tool.
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub path: String,
}

/// Execute the Delete tool.
///
/// Fails if the path is not in the cache.
pub fn execute(writer: &AsyncWriter, path: &str) -> Result<CallToolResult, ErrorData> {
    let path = path.trim();

    writer.delete(path).map_err(|e| match e {
        WriteError::NotFound { path } => ErrorData::invalid_params(
            format!("File not found: {}. Cannot delete a file that doesn't exist.", path),
            None,
        ),
        _ => ErrorData::internal_error(format!("Failed to delete file: {}", e), None),
    })?;

    json_result(&DeleteResponse {
        success: true,
        path: path.to_string(),
    })
}
