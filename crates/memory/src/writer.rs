//! Optimistic write path.
//!
//! Saves and deletes update the cache immediately and return. The remote
//! store is brought up to date by background sync tasks; a sync that fails
//! leaves a queue item behind so the mutation can be replayed by
//! [`AsyncWriter::drain_queue`], possibly in a later process.
//!
//! At most one background sync per (operation, path) runs at a time. A second
//! save for a path whose sync is still in flight updates the cache but does not
//! start another sync, so the remote can lag behind the cache until the next
//! save or drain for that path.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};

use crate::cache::{Cache, PENDING_REVISION};
use crate::index::IndexBuilder;
use crate::queue::{DurableQueue, Operation, QueueItem};
use crate::remote::{RemoteError, RemoteStore};

/// Largest accepted file, in UTF-8 bytes.
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Names ending in one of these keep their extension; anything else gets `.md`.
const KNOWN_EXTENSIONS: [&str; 3] = [".md", ".yaml", ".json"];
const DEFAULT_EXTENSION: &str = ".md";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Content too large: {size} bytes exceeds the {limit} byte limit")]
    ContentTooLarge { size: usize, limit: usize },
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

/// Outcome of one [`AsyncWriter::drain_queue`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items replayed successfully
    pub synced: usize,
    /// Deletes dropped because the file is no longer cached
    pub skipped: usize,
    /// Failed items left in the queue for another attempt
    pub retrying: usize,
    /// Failed items dropped after exhausting their retries
    pub dropped: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.synced + self.skipped + self.retrying + self.dropped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SyncKey {
    operation: Operation,
    path: String,
}

/// Marks a sync as in flight for as long as it is alive.
struct InFlight {
    set: Arc<Mutex<HashSet<SyncKey>>>,
    key: SyncKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.key);
    }
}

/// Applies mutations to the cache and pushes them to the remote store in the
/// background.
#[derive(Clone)]
pub struct AsyncWriter {
    cache: Arc<Cache>,
    queue: Arc<DurableQueue>,
    remote: Arc<dyn RemoteStore>,
    index: IndexBuilder,
    in_flight: Arc<Mutex<HashSet<SyncKey>>>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AsyncWriter {
    pub fn new(cache: Arc<Cache>, queue: Arc<DurableQueue>, remote: Arc<dyn RemoteStore>) -> Self {
        let index = IndexBuilder::new(cache.clone(), remote.clone());
        Self {
            cache,
            queue,
            remote,
            index,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Store `content` as `category/name` and return the path.
    ///
    /// The cache is updated before returning; the remote write happens in the
    /// background. Must be called from within a tokio runtime.
    pub fn save(&self, category: &str, name: &str, content: &str) -> Result<String, WriteError> {
        if content.len() > MAX_CONTENT_BYTES {
            return Err(WriteError::ContentTooLarge {
                size: content.len(),
                limit: MAX_CONTENT_BYTES,
            });
        }
        let path = compose_path(category, name)?;

        let expected = self
            .cache
            .get(&path)
            .and_then(|record| record.known_revision().map(str::to_string));
        self.cache.set(&path, content, PENDING_REVISION);

        match self.claim(Operation::Save, &path) {
            Some(guard) => {
                let this = self.clone();
                let (path, content) = (path.clone(), content.to_string());
                self.spawn(async move {
                    this.sync_save(&path, &content, expected.as_deref()).await;
                    drop(guard);
                });
            }
            None => tracing::debug!("Save of {} already in flight, not starting another", path),
        }

        Ok(path)
    }

    /// Remove `path` from the cache and delete it remotely in the background.
    pub fn delete(&self, path: &str) -> Result<(), WriteError> {
        let record = self.cache.remove(path).ok_or_else(|| WriteError::NotFound {
            path: path.to_string(),
        })?;
        let revision = record.known_revision().map(str::to_string);

        match self.claim(Operation::Delete, path) {
            Some(guard) => {
                let this = self.clone();
                let path = path.to_string();
                self.spawn(async move {
                    this.sync_delete(&path, revision.as_deref()).await;
                    drop(guard);
                });
            }
            None => tracing::debug!("Delete of {} already in flight, not starting another", path),
        }

        Ok(())
    }

    async fn sync_save(&self, path: &str, content: &str, expected: Option<&str>) {
        match self.remote.put(path, content, expected).await {
            Ok(revision) => {
                if !self.cache.confirm(path, content, &revision) {
                    tracing::debug!("{} changed while syncing, leaving newer cache entry", path);
                }
                self.rebuild_index().await;
                self.queue.remove(path);
                tracing::debug!("Synced {}", path);
            }
            Err(e) => {
                tracing::warn!("Failed to sync {}: {}. Queued for retry.", path, e);
                self.queue.enqueue(path, content, Operation::Save);
            }
        }
    }

    async fn sync_delete(&self, path: &str, revision: Option<&str>) {
        match self.delete_remote(path, revision).await {
            Ok(()) => {
                self.rebuild_index().await;
                self.queue.remove(path);
                tracing::debug!("Deleted {}", path);
            }
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}. Queued for retry.", path, e);
                self.queue.enqueue(path, "", Operation::Delete);
            }
        }
    }

    /// Replay every queued mutation against the remote store, in queue order.
    ///
    /// An empty queue makes no remote calls at all. Otherwise the index is
    /// rebuilt once after all items have been processed.
    pub async fn drain_queue(&self) -> DrainReport {
        let _guard = self.drain_lock.lock().await;

        let items = self.queue.get_all();
        let mut report = DrainReport::default();
        if items.is_empty() {
            return report;
        }

        tracing::info!("Draining {} queued writes", items.len());
        for item in items {
            match self.replay(&item).await {
                Ok(true) => {
                    self.queue.remove(&item.path);
                    report.synced += 1;
                }
                Ok(false) => {
                    self.queue.remove(&item.path);
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("Retry of {} {} failed: {}", item.operation, item.path, e);
                    if self.queue.increment_retry(&item.path) {
                        report.retrying += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
            }
        }

        self.rebuild_index().await;
        tracing::info!(
            "Drain finished: {} synced, {} skipped, {} retrying, {} dropped",
            report.synced,
            report.skipped,
            report.retrying,
            report.dropped
        );
        report
    }

    /// Replay one item. `Ok(false)` means there was nothing to do.
    async fn replay(&self, item: &QueueItem) -> Result<bool, RemoteError> {
        let cached = self.cache.get(&item.path);
        let revision = cached
            .as_ref()
            .and_then(|record| record.known_revision().map(str::to_string));

        match item.operation {
            Operation::Save => {
                let new_revision = self
                    .remote
                    .put(&item.path, &item.content, revision.as_deref())
                    .await?;
                // Only a newer optimistic write outranks the content just pushed
                match self.cache.get(&item.path) {
                    Some(current) if current.is_pending() && current.content != item.content => {
                        tracing::debug!(
                            "{} changed since it was queued, leaving newer cache entry",
                            item.path
                        );
                    }
                    _ => self.cache.set(&item.path, &item.content, &new_revision),
                }
                Ok(true)
            }
            Operation::Delete => {
                match &cached {
                    None => {
                        tracing::debug!("Skipping queued delete of {}: not cached", item.path);
                        return Ok(false);
                    }
                    Some(record) if record.is_pending() => {
                        tracing::debug!(
                            "Skipping queued delete of {}: saved again since",
                            item.path
                        );
                        return Ok(false);
                    }
                    Some(_) => {}
                }
                self.delete_remote(&item.path, revision.as_deref()).await?;
                self.cache.remove(&item.path);
                Ok(true)
            }
        }
    }

    /// Delete remotely, counting a file that is already gone as deleted.
    async fn delete_remote(&self, path: &str, revision: Option<&str>) -> Result<(), RemoteError> {
        match self.remote.delete(path, revision).await {
            Err(e) if e.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Whether a delete of `path` has not reached the remote store yet.
    pub fn is_deleting(&self, path: &str) -> bool {
        self.is_in_flight(Operation::Delete, path)
            || self
                .queue
                .get(path)
                .is_some_and(|item| item.operation == Operation::Delete)
    }

    /// Drain the queue every `interval` until the returned task is aborted.
    pub fn spawn_periodic_drain(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; startup already drained.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.drain_queue().await;
            }
        })
    }

    /// Wait for every background sync started so far (and any they start).
    pub async fn flush(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    tracing::error!("Background sync task failed: {}", e);
                }
            }
        }
    }

    /// Whether a sync for `path` is currently running.
    pub fn is_in_flight(&self, operation: Operation, path: &str) -> bool {
        lock(&self.in_flight).contains(&SyncKey {
            operation,
            path: path.to_string(),
        })
    }

    async fn rebuild_index(&self) {
        if let Err(e) = self.index.update_index().await {
            tracing::warn!("Failed to update index: {}", e);
        }
    }

    fn claim(&self, operation: Operation, path: &str) -> Option<InFlight> {
        let key = SyncKey {
            operation,
            path: path.to_string(),
        };
        if !lock(&self.in_flight).insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            set: self.in_flight.clone(),
            key,
        })
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.tasks);
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!("Background sync task failed: {}", e);
            }
        }
        tasks.spawn(task);
    }
}

/// Lowercase the category and replace anything outside `[a-z0-9-]` with `-`.
pub fn normalize_category(category: &str) -> String {
    category
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Append `.md` unless the name already carries a known extension.
pub fn normalize_name(name: &str) -> String {
    if KNOWN_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        name.to_string()
    } else {
        format!("{}{}", name, DEFAULT_EXTENSION)
    }
}

/// Build `category/name` from raw user input.
pub fn compose_path(category: &str, name: &str) -> Result<String, WriteError> {
    if category.trim().is_empty() {
        return Err(WriteError::InvalidName("category must not be empty".to_string()));
    }
    if name.trim().is_empty() {
        return Err(WriteError::InvalidName("name must not be empty".to_string()));
    }
    if name.starts_with('/') || name.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(WriteError::InvalidName(format!(
            "'{}' is not a valid relative file name",
            name
        )));
    }

    Ok(format!("{}/{}", normalize_category(category), normalize_name(name)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
