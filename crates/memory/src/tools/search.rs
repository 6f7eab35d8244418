//! Search tool - substring search over cached paths and contents.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::json_result;
use crate::cache::{Cache, SearchHit};
use crate::index::INDEX_PATH;

/// Response from the Search tool.
#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

/// Execute the Search tool.
///
/// An empty result list is a valid answer, not an error.
pub fn execute(cache: &Cache, query: &str) -> Result<CallToolResult, ErrorData> {
    if query.trim().is_empty() {
        return Err(ErrorData::invalid_params("Query must not be empty", None));
    }

    let results = cache
        .search(query)
        .into_iter()
        .filter(|hit| hit.path != INDEX_PATH)
        .collect();

    json_result(&SearchResponse {
        query: query.to_string(),
        results,
    })
}
