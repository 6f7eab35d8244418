//! Startup sequence and the state shared by every MCP session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::queue::DurableQueue;
use crate::remote::{RemoteError, RemoteStore};
use crate::warmup;
use crate::writer::AsyncWriter;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Remote store is not accessible with the configured credentials")]
    Inaccessible,
    #[error("Failed to reach remote store: {0}")]
    Remote(#[from] RemoteError),
}

/// Components shared across sessions.
///
/// Built once before the server starts accepting requests; every read
/// assumes the cache is already warm.
#[derive(Clone)]
pub struct SharedState {
    pub cache: Arc<Cache>,
    pub queue: Arc<DurableQueue>,
    pub remote: Arc<dyn RemoteStore>,
    pub writer: AsyncWriter,
    drain_task: Option<Arc<JoinHandle<()>>>,
}

impl SharedState {
    /// Validate access, warm the cache, replay leftover writes and start the
    /// periodic drain.
    pub async fn initialize(
        remote: Arc<dyn RemoteStore>,
        queue_path: &Path,
        drain_interval: Option<Duration>,
    ) -> Result<Self, StartupError> {
        if !remote.validate().await? {
            return Err(StartupError::Inaccessible);
        }

        let cache = Arc::new(Cache::new());
        warmup::populate(&cache, remote.as_ref()).await;

        let queue = Arc::new(DurableQueue::open(queue_path));
        let writer = AsyncWriter::new(cache.clone(), queue.clone(), remote.clone());
        writer.drain_queue().await;

        let drain_task = drain_interval.map(|interval| {
            tracing::info!("Draining retry queue every {:?}", interval);
            Arc::new(writer.spawn_periodic_drain(interval))
        });

        Ok(Self {
            cache,
            queue,
            remote,
            writer,
            drain_task,
        })
    }

    /// Stop the periodic drain and wait for in-flight syncs.
    pub async fn shutdown(&self) {
        if let Some(task) = &self.drain_task {
            task.abort();
        }
        self.writer.flush().await;
    }
}
