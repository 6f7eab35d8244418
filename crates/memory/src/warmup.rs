//! Startup population of the cache.

use crate::cache::Cache;
use crate::remote::RemoteStore;

/// Counts from one warm-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub loaded: usize,
    /// Listed but gone by the time it was fetched
    pub missing: usize,
    pub failed: usize,
}

/// Load every remote file into the cache, one at a time.
///
/// Never fails: a file that cannot be fetched is logged and left out, and
/// will be fetched live on its next read.
pub async fn populate(cache: &Cache, remote: &dyn RemoteStore) -> WarmupReport {
    tracing::info!("Loading files from remote store...");

    let mut report = WarmupReport::default();
    let entries = match remote.list().await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to list remote files: {}. Starting with an empty cache.", e);
            return report;
        }
    };
    tracing::info!("Found {} remote files", entries.len());

    for entry in entries {
        match remote.get(&entry.path).await {
            Ok(Some(file)) => {
                cache.set(&file.path, &file.content, &file.revision);
                report.loaded += 1;
            }
            Ok(None) => {
                tracing::debug!("{} disappeared before it could be loaded", entry.path);
                report.missing += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", entry.path, e);
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        "Cache warm: {} loaded, {} failed, {} missing",
        report.loaded,
        report.failed,
        report.missing
    );
    report
}
