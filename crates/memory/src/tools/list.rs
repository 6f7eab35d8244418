//! List tool - categories and files known to the cache.

use rmcp::model::{CallToolResult, ErrorData};
use serde::Serialize;

use super::json_result;
use crate::cache::Cache;
use crate::index::Manifest;
use crate::queue::DurableQueue;

/// Response from the List tool.
#[derive(Serialize)]
pub struct ListResponse {
    #[serde(flatten)]
    pub manifest: Manifest,
    /// Paths whose latest change has not reached the remote store yet
    pub pending: Vec<String>,
}

/// Execute the List tool.
///
/// Derived from the cache rather than the stored index, so files saved a
/// moment ago are included before the index rebuild completes.
pub fn execute(cache: &Cache, queue: &DurableQueue) -> Result<CallToolResult, ErrorData> {
    let response = ListResponse {
        manifest: Manifest::from_cache(cache),
        pending: queue.get_all().into_iter().map(|item| item.path).collect(),
    };
    json_result(&response)
}
