//! In-memory remote store for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{RemoteEntry, RemoteError, RemoteFile, RemoteStore};

/// Remote store that lives entirely in process memory.
///
/// Revisions are SHA-256 content hashes. Supports simulated outages and
/// holding writes in flight so tests can observe the optimistic window.
#[derive(Default)]
pub struct InMemoryStore {
    files: RwLock<BTreeMap<String, StoredFile>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    write_gate: Arc<Mutex<()>>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    revision: String,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without counting it as a call.
    pub fn insert(&self, path: &str, content: &str) -> String {
        let revision = content_revision(content);
        self.files_mut().insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision: revision.clone(),
            },
        );
        revision
    }

    /// Current content of a file, bypassing call accounting.
    pub fn content(&self, path: &str) -> Option<String> {
        self.files_ref().get(path).map(|f| f.content.clone())
    }

    /// Current revision of a file, bypassing call accounting.
    pub fn revision(&self, path: &str) -> Option<String> {
        self.files_ref().get(path).map(|f| f.revision.clone())
    }

    /// Make every subsequent operation fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Block puts and deletes until the returned guard is dropped.
    pub async fn hold_writes(&self) -> OwnedMutexGuard<()> {
        self.write_gate.clone().lock_owned().await
    }

    /// Total number of remote operations attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("simulated outage".to_string()));
        }
        Ok(())
    }

    fn files_ref(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredFile>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn files_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredFile>> {
        self.files.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl RemoteStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.begin()?;
        Ok(self
            .files_ref()
            .iter()
            .map(|(path, file)| RemoteEntry {
                path: path.clone(),
                revision: file.revision.clone(),
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError> {
        self.begin()?;
        Ok(self.files_ref().get(path).map(|file| RemoteFile {
            path: path.to_string(),
            content: file.content.clone(),
            revision: file.revision.clone(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<String, RemoteError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let _gate = self.write_gate.lock().await;
        self.begin()?;

        let mut files = self.files_mut();
        if let Some(expected) = expected_revision {
            match files.get(path) {
                Some(current) if current.revision != expected => {
                    return Err(RemoteError::Conflict {
                        path: path.to_string(),
                        message: format!("expected {}, found {}", expected, current.revision),
                    });
                }
                None => {
                    return Err(RemoteError::Conflict {
                        path: path.to_string(),
                        message: format!("expected {}, file does not exist", expected),
                    });
                }
                Some(_) => {}
            }
        }

        let revision = content_revision(content);
        files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision: revision.clone(),
            },
        );
        Ok(revision)
    }

    async fn delete(&self, path: &str, revision: Option<&str>) -> Result<(), RemoteError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let _gate = self.write_gate.lock().await;
        self.begin()?;

        let mut files = self.files_mut();
        let current = files.get(path).ok_or_else(|| RemoteError::NotFound {
            path: path.to_string(),
        })?;
        if let Some(expected) = revision {
            if current.revision != expected {
                return Err(RemoteError::Conflict {
                    path: path.to_string(),
                    message: format!("expected {}, found {}", expected, current.revision),
                });
            }
        }
        files.remove(path);
        Ok(())
    }

    async fn validate(&self) -> Result<bool, RemoteError> {
        Ok(!self.failing.load(Ordering::SeqCst))
    }
}

/// Hex SHA-256 of the content, so identical writes share a revision.
fn content_revision(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
