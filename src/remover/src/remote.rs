//! The remote operations the deletion engine is built on.

use crate::path::NodePath;
use async_trait::async_trait;

/// A remote call that could not be carried out.
///
/// A request that is merely too large is not an error: the delete methods of
/// [`RemoteTree`] report it as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("object store error: {0}")]
    Storage(#[from] object_store::Error),
}

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A hierarchical store that limits how much a single delete may touch.
///
/// Every delete call is atomic: it either removes everything it names and
/// returns `Ok(true)`, or removes nothing. `Ok(false)` means the remote judged
/// the request too large; retrying the same request will not help.
/// Implementations that may leave a call half applied when it fails with
/// `Err` say so in their own docs.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// Delete the node at `path` and everything beneath it in one call.
    /// Deleting a path that does not exist succeeds.
    async fn delete_path(&self, path: &NodePath) -> RemoteResult<bool>;

    /// Delete exactly the named immediate children of `path` in one call.
    async fn delete_sub_path(&self, path: &NodePath, children: &[String]) -> RemoteResult<bool>;

    /// Up to `limit` immediate child keys of `path`. Empty when the node has
    /// no children or does not exist.
    async fn list_path(&self, path: &NodePath, limit: usize) -> RemoteResult<Vec<String>>;
}
