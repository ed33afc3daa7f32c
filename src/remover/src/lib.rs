//! Deletes arbitrarily large subtrees from a hierarchical store whose
//! per-request size limit is unknown.
//!
//! ## Architecture
//!
//! - `remote`: the [`RemoteTree`] operations the engine needs
//! - `engine`: adaptive decomposition of one deletion into remote calls
//! - `store`: [`RemoteTree`] over any `object_store` backend
//! - `testing`: deterministic in-memory tree (feature `testing`)
//!
//! ## Usage
//!
//! ```no_run
//! use common::config::DeletionConfig;
//! use object_store::memory::InMemory;
//! use remover::{NodePath, ObjectStoreTree, remove_subtree};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), remover::DeleteError> {
//! let remote = Arc::new(ObjectStoreTree::new(Arc::new(InMemory::new()), 1000));
//! let calls = remove_subtree(remote, NodePath::parse("/users"), &DeletionConfig::default()).await?;
//! println!("deleted with {calls} calls");
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod path;
pub mod remote;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{DeleteError, DeletionEngine, remove_subtree};
pub use path::NodePath;
pub use remote::{RemoteError, RemoteResult, RemoteTree};
pub use store::ObjectStoreTree;
