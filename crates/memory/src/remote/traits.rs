//! Remote store trait definition and error types.

use thiserror::Error;

/// Errors that can occur while talking to the remote store.
///
/// `NotFound` is kept distinct from every other failure: callers treat it as a
/// normal outcome, everything else as a (possibly transient) failure.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The requested file does not exist remotely
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// The revision token supplied did not match the remote
    #[error("Revision conflict for {path}: {message}")]
    Conflict { path: String, message: String },

    /// The credential was rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Any other unexpected HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Network-level failure (DNS, connect, timeout, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with something we could not understand
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// A path and its revision as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub path: String,
    pub revision: String,
}

/// A fetched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub revision: String,
}

/// Versioned file store that holds the durable copy of every memory file.
///
/// Every file carries an opaque revision token. Updates and deletes may be
/// guarded by the revision the caller last observed (optimistic concurrency);
/// passing `None` means "no precondition", i.e. last writer wins.
///
/// Implementations: `GitHubStore` (GitHub contents API), `InMemoryStore` (tests)
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Enumerate every file path in the store with its current revision.
    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Fetch a file. Returns `Ok(None)` when it does not exist.
    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError>;

    /// Create or update a file, returning the new revision token.
    ///
    /// # Arguments
    /// * `path` - Slash separated path inside the store
    /// * `content` - Full new content
    /// * `expected_revision` - Revision the caller believes is current, if known
    async fn put(
        &self,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<String, RemoteError>;

    /// Delete a file.
    ///
    /// # Arguments
    /// * `path` - Slash separated path inside the store
    /// * `revision` - Revision the caller believes is current, if known
    async fn delete(&self, path: &str, revision: Option<&str>) -> Result<(), RemoteError>;

    /// Check that the store is reachable and the credential is accepted.
    async fn validate(&self) -> Result<bool, RemoteError>;
}
