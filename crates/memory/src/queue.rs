//! Disk-backed queue of writes that still need to reach the remote store.
//!
//! The queue is loaded once at startup and rewritten wholesale on every
//! mutation. Disk failures are logged and otherwise ignored: the in-memory
//! list stays authoritative for the rest of the process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An item is dropped once its retry count reaches this value.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed queue file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind of mutation waiting to be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Save,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Save => write!(f, "save"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub path: String,
    /// Full content for saves, empty for deletes
    #[serde(default)]
    pub content: String,
    pub operation: Operation,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

/// Retry queue with at most one item per path.
pub struct DurableQueue {
    path: PathBuf,
    items: Mutex<Vec<QueueItem>>,
}

impl DurableQueue {
    /// Open the queue stored at `path`.
    ///
    /// A missing or unreadable file yields an empty queue.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match Self::load(&path) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Ignoring unreadable queue file {}: {}", path.display(), e);
                Vec::new()
            }
        };

        if !items.is_empty() {
            tracing::info!("Loaded {} pending writes from {}", items.len(), path.display());
        }

        Self {
            path,
            items: Mutex::new(items),
        }
    }

    /// Read items from disk.
    pub fn load(path: &Path) -> Result<Vec<QueueItem>, QueueError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a mutation, replacing any earlier item for the same path.
    pub fn enqueue(&self, path: &str, content: &str, operation: Operation) {
        let mut items = self.lock();
        items.retain(|item| item.path != path);
        items.push(QueueItem {
            path: path.to_string(),
            content: content.to_string(),
            operation,
            enqueued_at: Utc::now(),
            retry_count: 0,
        });
        self.persist(&items);
    }

    pub fn get_all(&self) -> Vec<QueueItem> {
        self.lock().clone()
    }

    pub fn get(&self, path: &str) -> Option<QueueItem> {
        self.lock().iter().find(|item| item.path == path).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, path: &str) {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|item| item.path != path);
        if items.len() != before {
            self.persist(&items);
        }
    }

    /// Record a failed replay.
    ///
    /// Returns `true` if the item should be retried later, `false` if it was
    /// dropped for exceeding `MAX_RETRIES` or was not queued at all.
    pub fn increment_retry(&self, path: &str) -> bool {
        let mut items = self.lock();
        let Some(index) = items.iter().position(|item| item.path == path) else {
            return false;
        };

        items[index].retry_count += 1;
        let keep = items[index].retry_count < MAX_RETRIES;
        if !keep {
            let dropped = items.remove(index);
            tracing::warn!(
                "Giving up on {} of {} after {} attempts",
                dropped.operation,
                dropped.path,
                dropped.retry_count
            );
        }
        self.persist(&items);
        keep
    }

    fn persist(&self, items: &[QueueItem]) {
        if let Err(e) = write_atomic(&self.path, items) {
            tracing::warn!(
                "Failed to persist queue to {}: {}. Keeping it in memory only.",
                self.path.display(),
                e
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Write via temp file + rename so a crash never leaves a half-written queue.
fn write_atomic(path: &Path, items: &[QueueItem]) -> Result<(), QueueError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(items)?;
    let temp_path = path.with_extension(format!("{}.tmp", std::process::id()));

    if let Err(e) = fs::write(&temp_path, contents) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_queue() -> (TempDir, DurableQueue) {
        let temp_dir = TempDir::new().unwrap();
        let queue = DurableQueue::open(temp_dir.path().join("state/queue.json"));
        (temp_dir, queue)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_temp, queue) = open_queue();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        fs::write(&path, "{ not json").unwrap();

        let queue = DurableQueue::open(&path);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_replaces_existing_item() {
        let (_temp, queue) = open_queue();

        queue.enqueue("a.md", "v1", Operation::Save);
        queue.enqueue("b.md", "", Operation::Delete);
        queue.enqueue("a.md", "v2", Operation::Save);

        let items = queue.get_all();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, "b.md");
        assert_eq!(items[1].path, "a.md");
        assert_eq!(items[1].content, "v2");
        assert_eq!(items[1].retry_count, 0);
    }

    #[test]
    fn test_enqueue_resets_retry_count() {
        let (_temp, queue) = open_queue();

        queue.enqueue("a.md", "v1", Operation::Save);
        assert!(queue.increment_retry("a.md"));
        queue.enqueue("a.md", "", Operation::Delete);

        let item = queue.get("a.md").unwrap();
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.operation, Operation::Delete);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");

        {
            let queue = DurableQueue::open(&path);
            queue.enqueue("notes/a.md", "content", Operation::Save);
            queue.enqueue("notes/b.md", "", Operation::Delete);
            assert!(queue.increment_retry("notes/a.md"));
        }

        let queue = DurableQueue::open(&path);
        let items = queue.get_all();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "content");
        assert_eq!(items[0].retry_count, 1);
        assert_eq!(items[1].operation, Operation::Delete);
    }

    #[test]
    fn test_file_format() {
        let (_temp, queue) = open_queue();
        queue.enqueue("a.md", "x", Operation::Save);

        let raw = fs::read_to_string(queue.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let item = &value[0];
        assert_eq!(item["path"], "a.md");
        assert_eq!(item["operation"], "save");
        assert_eq!(item["retryCount"], 0);
        assert!(item["enqueuedAt"].is_string());
    }

    #[test]
    fn test_remove() {
        let (_temp, queue) = open_queue();
        queue.enqueue("a.md", "x", Operation::Save);

        queue.remove("missing.md");
        assert_eq!(queue.len(), 1);

        queue.remove("a.md");
        assert!(queue.is_empty());
        assert!(DurableQueue::load(queue.path()).unwrap().is_empty());
    }

    #[test]
    fn test_increment_retry_drops_at_max() {
        let (_temp, queue) = open_queue();
        queue.enqueue("a.md", "x", Operation::Save);

        assert!(queue.increment_retry("a.md"));
        assert!(queue.increment_retry("a.md"));
        assert_eq!(queue.get("a.md").unwrap().retry_count, 2);

        assert!(!queue.increment_retry("a.md"));
        assert!(queue.get_all().is_empty());
        assert!(DurableQueue::load(queue.path()).unwrap().is_empty());
    }

    #[test]
    fn test_increment_retry_absent_is_false() {
        let (_temp, queue) = open_queue();
        assert!(!queue.increment_retry("nothing.md"));
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let queue = DurableQueue::open(blocker.join("queue.json"));
        queue.enqueue("a.md", "x", Operation::Save);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("a.md").unwrap().content, "x");
    }
}
