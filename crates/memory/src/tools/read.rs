//! Read tool - return a file's content, falling back to the remote store.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::json_result;
use crate::writer::AsyncWriter;

/// Response from the Read tool.
#[derive(Serialize)]
pub struct ReadResponse {
    pub path: String,
    pub content: String,
}

/// Execute the Read tool.
///
/// Serves from the cache; on a miss fetches from the remote store and caches
/// the result. A path whose delete has not reached the remote yet is not
/// fetched, so it cannot come back into the cache.
pub async fn execute(writer: &AsyncWriter, path: &str) -> Result<CallToolResult, ErrorData> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ErrorData::invalid_params("Path must not be empty", None));
    }

    let cache = writer.cache();
    if let Some(record) = cache.get(path) {
        return json_result(&ReadResponse {
            path: record.path,
            content: record.content,
        });
    }

    let not_found = || ErrorData::invalid_params(format!("File not found: {}", path), None);
    if writer.is_deleting(path) {
        return Err(not_found());
    }

    let file = writer
        .remote()
        .get(path)
        .await
        .map_err(|e| ErrorData::internal_error(format!("Failed to read {}: {}", path, e), None))?
        .ok_or_else(not_found)?;

    cache.set(&file.path, &file.content, &file.revision);
    tracing::debug!("Cached {} after live fetch", file.path);

    json_result(&ReadResponse {
        path: file.path,
        content: file.content,
    })
}
