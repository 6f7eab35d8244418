//! Remote store abstraction and implementations.

mod github;
mod memory;
mod traits;

pub use github::GitHubStore;
pub use memory::InMemoryStore;
pub use traits::{RemoteEntry, RemoteError, RemoteFile, RemoteStore};
