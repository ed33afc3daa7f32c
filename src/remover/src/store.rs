//! [`RemoteTree`] over an object store.
//!
//! Objects are leaves and key prefixes are branches, so `/users/alice` covers
//! the object `users/alice` as well as everything under `users/alice/`.
//! Object stores have no per-request write budget of their own; this adapter
//! refuses any delete call that would remove more than
//! `max_objects_per_call` objects, the way a size-limited remote refuses an
//! oversized write.
//!
//! A key can be an object and a prefix at once (`users` next to
//! `users/alice`). Once such a node has no children left, [`list_path`]
//! reports its own object under the child key `.`, so the deletion engine
//! removes it like any other child.
//!
//! Deletes are issued object by object. A storage error partway through a
//! call leaves the objects already removed deleted, so a failed call is not
//! all-or-nothing the way a refused one is.
//!
//! [`list_path`]: RemoteTree::list_path

use crate::path::NodePath;
use crate::remote::{RemoteError, RemoteResult, RemoteTree};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Child key naming a node's own object. Object store paths never contain a
/// `.` segment, so it cannot collide with a real child.
pub const OWN_OBJECT_KEY: &str = ".";

pub struct ObjectStoreTree {
    object_store: Arc<dyn ObjectStore>,
    max_objects_per_call: usize,
}

fn location(path: &NodePath) -> Option<ObjectPath> {
    if path.is_root() {
        None
    } else {
        Some(ObjectPath::from_iter(
            path.segments().iter().map(String::as_str),
        ))
    }
}

fn storage_error(error: object_store::Error) -> RemoteError {
    match error {
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => {
            RemoteError::Unauthorized(error.to_string())
        }
        other => RemoteError::Storage(other),
    }
}

impl ObjectStoreTree {
    pub fn new(object_store: Arc<dyn ObjectStore>, max_objects_per_call: usize) -> Self {
        Self {
            object_store,
            max_objects_per_call: max_objects_per_call.max(1),
        }
    }

    /// The object stored at exactly `location`, if any.
    async fn object_at(&self, location: &ObjectPath) -> RemoteResult<Option<ObjectPath>> {
        match self.object_store.head(location).await {
            Ok(meta) => Ok(Some(meta.location)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(error) => Err(storage_error(error)),
        }
    }

    /// Every object the node at `path` covers.
    async fn objects_under(&self, path: &NodePath) -> RemoteResult<BTreeSet<ObjectPath>> {
        if let Some((key, parent)) = path.segments().split_last() {
            if key == OWN_OBJECT_KEY {
                let own = ObjectPath::from_iter(parent.iter().map(String::as_str));
                return Ok(self.object_at(&own).await?.into_iter().collect());
            }
        }

        let prefix = location(path);
        let mut objects: BTreeSet<ObjectPath> = self
            .object_store
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(storage_error)?;

        if let Some(leaf) = &prefix {
            objects.extend(self.object_at(leaf).await?);
        }

        Ok(objects)
    }

    /// Delete `objects` unless there are more than one call may remove.
    async fn delete_within_budget(&self, objects: BTreeSet<ObjectPath>) -> RemoteResult<bool> {
        if objects.len() > self.max_objects_per_call {
            tracing::debug!(
                objects = objects.len(),
                max_objects_per_call = self.max_objects_per_call,
                "Refusing delete call over budget"
            );
            return Ok(false);
        }

        let locations = stream::iter(objects.into_iter().map(Ok)).boxed();
        let mut deleted = self.object_store.delete_stream(locations);
        while let Some(result) = deleted.next().await {
            match result {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
                Err(error) => return Err(storage_error(error)),
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RemoteTree for ObjectStoreTree {
    async fn delete_path(&self, path: &NodePath) -> RemoteResult<bool> {
        let objects = self.objects_under(path).await?;
        self.delete_within_budget(objects).await
    }

    async fn delete_sub_path(&self, path: &NodePath, children: &[String]) -> RemoteResult<bool> {
        let mut objects = BTreeSet::new();
        for key in children {
            objects.extend(self.objects_under(&path.child(key)).await?);
            if objects.len() > self.max_objects_per_call {
                break;
            }
        }
        self.delete_within_budget(objects).await
    }

    async fn list_path(&self, path: &NodePath, limit: usize) -> RemoteResult<Vec<String>> {
        let prefix = location(path);
        let listing = self
            .object_store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(storage_error)?;

        let keys: BTreeSet<String> = listing
            .common_prefixes
            .iter()
            .chain(listing.objects.iter().map(|meta| &meta.location))
            .filter_map(|location| location.filename().map(str::to_string))
            .collect();

        if keys.is_empty() {
            // nothing left beneath the node but possibly the node itself
            if let Some(own) = &prefix {
                if self.object_at(own).await?.is_some() {
                    return Ok(vec![OWN_OBJECT_KEY.to_string()]);
                }
            }
        }

        Ok(keys.into_iter().take(limit).collect())
    }
}
