//! Adaptive subtree deletion.
//!
//! The remote refuses delete calls that touch too much data, but never says
//! how much is too much. [`DeletionEngine`] first tries to delete the whole
//! subtree at once. When that is refused it lists the node's children page by
//! page and deletes them in chunks, bisecting any chunk the remote refuses and
//! recursing into single children that are still too large.
//!
//! Two batch sizes are learned along the way:
//!
//! - `delete_batch_size` (children per chunk) doubles after a round in which
//!   every chunk went through in one call, and otherwise becomes
//!   `ceil(children / chunks that went through in one call)`, never below 1.
//! - `list_batch_size` (children fetched per listing) doubles every round up
//!   to the configured maximum.

use crate::path::NodePath;
use crate::remote::{RemoteError, RemoteTree};
use common::config::{DeletionConfig, MAX_BATCH_SIZE};
use futures::future::{BoxFuture, FutureExt, try_join_all};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use throttler::{QueueError, RetryQueue};

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    /// A remote call kept failing after the owning queue's retries.
    #[error(transparent)]
    Remote(#[from] QueueError<RemoteError>),

    /// The node has no children to split on, yet the remote refuses to delete it.
    #[error("{path} is too large to delete in one call and has no children to split it by")]
    Undecomposable { path: NodePath },
}

/// Result of deleting one path or one chunk of siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Outcome {
    /// Successful delete calls it took
    delete_calls: u64,
    /// Whether the very first delete call covered everything
    single_call: bool,
}

impl Outcome {
    const SINGLE: Outcome = Outcome {
        delete_calls: 1,
        single_call: true,
    };

    fn decomposed(delete_calls: u64) -> Self {
        Self {
            delete_calls,
            single_call: false,
        }
    }
}

/// Next chunk size after a round that split `children` keys into `chunks`
/// chunks, `single_call_chunks` of which were deleted in one call.
pub fn next_delete_batch_size(
    current: usize,
    children: usize,
    chunks: usize,
    single_call_chunks: usize,
) -> usize {
    let next = if single_call_chunks == chunks {
        current.saturating_mul(2)
    } else if single_call_chunks == 0 {
        current / 2
    } else {
        children.div_ceil(single_call_chunks)
    };
    next.clamp(1, MAX_BATCH_SIZE)
}

/// Next listing page size; grows independently of how deletes went.
pub fn next_list_batch_size(current: usize, max: usize) -> usize {
    current.saturating_mul(2).min(max).max(1)
}

/// Batch sizes learned during one `execute` and shared by every listing loop
/// in it, nested ones included. Written at the end of a round, between
/// awaits, so other loops may still be mid-round when the sizes change.
#[derive(Debug)]
struct Tuning {
    delete_batch_size: AtomicUsize,
    list_batch_size: AtomicUsize,
    max_list_batch_size: usize,
}

impl Tuning {
    fn new(config: &DeletionConfig) -> Self {
        let max_list_batch_size = config.max_list_batch_size.clamp(1, MAX_BATCH_SIZE);
        Self {
            delete_batch_size: AtomicUsize::new(
                config.initial_delete_batch_size.clamp(1, MAX_BATCH_SIZE),
            ),
            list_batch_size: AtomicUsize::new(
                config.initial_list_batch_size.clamp(1, max_list_batch_size),
            ),
            max_list_batch_size,
        }
    }

    fn delete_batch_size(&self) -> usize {
        self.delete_batch_size.load(Ordering::Relaxed)
    }

    fn list_batch_size(&self) -> usize {
        self.list_batch_size.load(Ordering::Relaxed)
    }

    fn record_round(&self, children: usize, chunks: usize, single_call_chunks: usize) {
        let delete = next_delete_batch_size(
            self.delete_batch_size(),
            children,
            chunks,
            single_call_chunks,
        );
        let list = next_list_batch_size(self.list_batch_size(), self.max_list_batch_size);
        self.delete_batch_size.store(delete, Ordering::Relaxed);
        self.list_batch_size.store(list, Ordering::Relaxed);
    }
}

/// Deletes one subtree. Build a fresh engine per deletion: the learned batch
/// sizes belong to a single `execute`.
pub struct DeletionEngine {
    remote: Arc<dyn RemoteTree>,
    path: NodePath,
    delete_queue: RetryQueue,
    list_queue: RetryQueue,
    tuning: Tuning,
}

impl DeletionEngine {
    pub fn new(remote: Arc<dyn RemoteTree>, path: NodePath, config: &DeletionConfig) -> Self {
        Self {
            remote,
            path,
            delete_queue: RetryQueue::new(&config.delete_queue),
            list_queue: RetryQueue::new(&config.list_queue),
            tuning: Tuning::new(config),
        }
    }

    /// Delete the subtree and return how many delete calls succeeded.
    ///
    /// A remote error that survives its queue's retries aborts the whole
    /// deletion. Whatever was already deleted stays deleted.
    pub async fn execute(self) -> Result<u64, DeleteError> {
        let started = Instant::now();
        tracing::info!(path = %self.path, "Starting subtree deletion");

        let result = self.delete_path(self.path.clone()).await;
        self.delete_queue.close();
        self.list_queue.close();

        let delete_stats = self.delete_queue.stats();
        let list_stats = self.list_queue.stats();
        match &result {
            Ok(outcome) => tracing::info!(
                path = %self.path,
                delete_calls = outcome.delete_calls,
                delete_attempts = delete_stats.total,
                delete_retries = delete_stats.retried,
                listings = list_stats.total,
                list_retries = list_stats.retried,
                delete_batch_size = self.tuning.delete_batch_size(),
                list_batch_size = self.tuning.list_batch_size(),
                elapsed = ?started.elapsed(),
                "Subtree deletion complete"
            ),
            Err(error) => tracing::error!(
                path = %self.path,
                error = %error,
                delete_attempts = delete_stats.total,
                elapsed = ?started.elapsed(),
                "Subtree deletion failed"
            ),
        }

        result.map(|outcome| outcome.delete_calls)
    }

    fn delete_path(&self, path: NodePath) -> BoxFuture<'_, Result<Outcome, DeleteError>> {
        async move {
            let remote = &self.remote;
            let target = &path;

            if self
                .delete_queue
                .run(move || remote.delete_path(target))
                .await?
            {
                tracing::debug!(path = %path, "Deleted subtree in a single call");
                return Ok(Outcome::SINGLE);
            }

            let mut delete_calls = 0;
            let mut rounds = 0u32;
            loop {
                let limit = self.tuning.list_batch_size();
                let keys = self
                    .list_queue
                    .run(move || remote.list_path(target, limit))
                    .await?;

                if keys.is_empty() {
                    if rounds == 0 {
                        return Err(DeleteError::Undecomposable { path });
                    }
                    return Ok(Outcome::decomposed(delete_calls));
                }
                rounds += 1;

                let batch_size = self.tuning.delete_batch_size();
                let outcomes = try_join_all(
                    keys.chunks(batch_size)
                        .map(|chunk| self.delete_children(target, chunk.to_vec())),
                )
                .await?;

                let single_call_chunks = outcomes.iter().filter(|o| o.single_call).count();
                delete_calls += outcomes.iter().map(|o| o.delete_calls).sum::<u64>();
                self.tuning
                    .record_round(keys.len(), outcomes.len(), single_call_chunks);

                tracing::debug!(
                    path = %path,
                    round = rounds,
                    keys = keys.len(),
                    chunks = outcomes.len(),
                    single_call_chunks,
                    delete_batch_size = self.tuning.delete_batch_size(),
                    list_batch_size = self.tuning.list_batch_size(),
                    "Finished deletion round"
                );
            }
        }
        .boxed()
    }

    fn delete_children<'a>(
        &'a self,
        path: &'a NodePath,
        mut children: Vec<String>,
    ) -> BoxFuture<'a, Result<Outcome, DeleteError>> {
        async move {
            match children.as_slice() {
                [] => return Ok(Outcome::default()),
                [only] => return self.delete_path(path.child(only)).await,
                _ => {}
            }

            let remote = &self.remote;
            let keys = &children;
            if self
                .delete_queue
                .run(move || remote.delete_sub_path(path, keys))
                .await?
            {
                return Ok(Outcome::SINGLE);
            }

            tracing::debug!(path = %path, children = children.len(), "Bisecting refused chunk");
            let right = children.split_off(children.len() / 2);
            let (left, right) = futures::try_join!(
                self.delete_children(path, children),
                self.delete_children(path, right)
            )?;
            Ok(Outcome::decomposed(left.delete_calls + right.delete_calls))
        }
        .boxed()
    }
}

/// Delete the subtree at `path` with a fresh [`DeletionEngine`].
pub async fn remove_subtree(
    remote: Arc<dyn RemoteTree>,
    path: NodePath,
    config: &DeletionConfig,
) -> Result<u64, DeleteError> {
    DeletionEngine::new(remote, path, config).execute().await
}
