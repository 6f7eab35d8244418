//! Manifest of every stored file, derived from the cache.
//!
//! The manifest is persisted to the remote store at [`INDEX_PATH`] so the
//! repository stays browsable without this server.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::{category_of, Cache};
use crate::remote::{RemoteError, RemoteStore};

/// Reserved path of the manifest inside the store.
pub const INDEX_PATH: &str = "_index.json";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to serialize index: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to store index: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub categories: Vec<String>,
    pub files: Vec<ManifestEntry>,
    pub last_updated: DateTime<Utc>,
}

impl Manifest {
    /// Derive the manifest from the current cache contents.
    pub fn from_cache(cache: &Cache) -> Self {
        Self::from_paths(cache.keys(), Utc::now())
    }

    /// Build a manifest from a set of paths, skipping the manifest itself.
    pub fn from_paths<I, S>(paths: I, last_updated: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: BTreeSet<String> = paths
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| p != INDEX_PATH)
            .collect();

        let files: Vec<ManifestEntry> = paths
            .iter()
            .map(|path| ManifestEntry {
                path: path.clone(),
                category: category_of(path).to_string(),
            })
            .collect();

        let categories = files
            .iter()
            .map(|f| f.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            categories,
            files,
            last_updated,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Regenerates and stores the manifest.
///
/// Rebuilds are serialized so two concurrent syncs do not race each other
/// with the same expected revision.
#[derive(Clone)]
pub struct IndexBuilder {
    cache: Arc<Cache>,
    remote: Arc<dyn RemoteStore>,
    lock: Arc<Mutex<()>>,
}

impl IndexBuilder {
    pub fn new(cache: Arc<Cache>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            cache,
            remote,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Derive the manifest from the cache and write it to the remote store.
    pub async fn update_index(&self) -> Result<Manifest, IndexError> {
        let _guard = self.lock.lock().await;

        let manifest = Manifest::from_cache(&self.cache);
        let content = manifest.to_json()?;
        let previous = self
            .cache
            .get(INDEX_PATH)
            .and_then(|record| record.known_revision().map(str::to_string));

        let revision = self
            .remote
            .put(INDEX_PATH, &content, previous.as_deref())
            .await?;
        self.cache.set(INDEX_PATH, &content, &revision);

        tracing::debug!("Index updated with {} files", manifest.files.len());
        Ok(manifest)
    }
}
