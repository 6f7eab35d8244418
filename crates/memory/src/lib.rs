//! repo-memory: a GitHub repository exposed as an agent memory store.
//!
//! Reads are served from an in-memory cache that is warmed at startup.
//! Writes land in the cache immediately and reach the repository through
//! background syncs, with a disk-backed retry queue for the ones that fail.

pub mod cache;
pub mod config;
pub mod index;
pub mod queue;
pub mod remote;
pub mod state;
pub mod tools;
pub mod warmup;
pub mod writer;

pub use cache::{Cache, FileRecord, SearchHit};
pub use config::Config;
pub use index::{IndexBuilder, Manifest, INDEX_PATH};
pub use queue::{DurableQueue, Operation, QueueItem};
pub use remote::{GitHubStore, InMemoryStore, RemoteError, RemoteStore};
pub use state::SharedState;
pub use writer::{AsyncWriter, WriteError};
