//! Bounded concurrency task queue with retries.
//!
//! [`RetryQueue::run`] executes a task once a concurrency slot is free and
//! retries it with exponential backoff when it fails. Only after the
//! configured number of retries is the last error handed back to the caller.
//!
//! ## Retry policy
//!
//! - A retried task keeps its slot while it backs off, so it always runs
//!   again before any task still waiting for a slot.
//! - Retry `n` (1-based) waits `initial_backoff * 2^(n-1)`, capped at
//!   `max_backoff`.
//!
//! ## Usage
//!
//! ```no_run
//! use common::config::QueueConfig;
//! use throttler::RetryQueue;
//!
//! # async fn demo() -> Result<(), throttler::QueueError<std::io::Error>> {
//! let queue = RetryQueue::new(&QueueConfig::listings());
//! let keys = queue.run(|| async { Ok::<_, std::io::Error>(vec!["a", "b"]) }).await?;
//! assert_eq!(keys.len(), 2);
//! # Ok(())
//! # }
//! ```

use common::config::QueueConfig;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Why a task handed to [`RetryQueue::run`] did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum QueueError<E> {
    #[error("queue '{name}' is closed")]
    Closed { name: String },

    #[error("task failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> QueueError<E> {
    /// The error of the last attempt, if the task ran at all.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            QueueError::Closed { .. } => None,
            QueueError::Exhausted { source, .. } => Some(source),
        }
    }
}

/// Point-in-time view of a queue's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Tasks currently holding a slot
    pub active: usize,
    /// Tasks that finished, successfully or not
    pub complete: u64,
    pub success: u64,
    pub errored: u64,
    /// Retries performed across all tasks
    pub retried: u64,
    /// Tasks ever handed to `run`
    pub total: u64,
    /// Shortest successful attempt
    pub min: Option<Duration>,
    /// Longest successful attempt
    pub max: Option<Duration>,
    /// Mean successful attempt
    pub avg: Option<Duration>,
    /// Time since the first task was enqueued
    pub elapsed: Duration,
}

struct Counters {
    active: AtomicUsize,
    complete: AtomicU64,
    success: AtomicU64,
    errored: AtomicU64,
    retried: AtomicU64,
    total: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    sum_nanos: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            complete: AtomicU64::new(0),
            success: AtomicU64::new(0),
            errored: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            total: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn record_success(&self, took: Duration) {
        let nanos = u64::try_from(took.as_nanos()).unwrap_or(u64::MAX);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
        self.complete.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
        self.complete.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keeps `active` in step with held slots, including when a task is dropped mid-flight.
struct ActiveSlot<'a>(&'a AtomicUsize);

impl<'a> ActiveSlot<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(active)
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Runs at most `concurrency` tasks at a time, retrying failures.
pub struct RetryQueue {
    name: String,
    concurrency: usize,
    retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    slots: Semaphore,
    counters: Counters,
    started: OnceCell<Instant>,
}

impl RetryQueue {
    /// Create a queue. Concurrency is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(config: &QueueConfig) -> Self {
        let concurrency = config.concurrency.clamp(1, Semaphore::MAX_PERMITS);
        if concurrency != config.concurrency {
            tracing::warn!(
                queue = %config.name,
                configured = config.concurrency,
                concurrency,
                "Queue concurrency out of range, clamped"
            );
        }
        Self {
            name: config.name.clone(),
            concurrency,
            retries: config.retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            slots: Semaphore::new(concurrency),
            counters: Counters::new(),
            started: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` once a slot is free.
    ///
    /// `task` is invoked again for every retry, so it must build a fresh
    /// future each time. Returns the first successful value, or the error of
    /// the final attempt once `retries` retries have failed.
    pub async fn run<F, Fut, T, E>(&self, task: F) -> Result<T, QueueError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.started.get_or_init(Instant::now);

        let _permit = self.slots.acquire().await.map_err(|_| QueueError::Closed {
            name: self.name.clone(),
        })?;
        let _active = ActiveSlot::enter(&self.counters.active);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();

            let error = match task().await {
                Ok(value) => {
                    self.counters.record_success(started.elapsed());
                    return Ok(value);
                }
                Err(error) => error,
            };

            if attempt > self.retries {
                self.counters.record_failure();
                tracing::warn!(
                    queue = %self.name,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted on task"
                );
                return Err(QueueError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.backoff_delay(attempt);
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                queue = %self.name,
                attempt,
                retries = self.retries,
                delay = ?delay,
                error = %error,
                "Retrying task"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Stop accepting tasks. Tasks already holding a slot run to completion;
    /// tasks still waiting for one fail with [`QueueError::Closed`].
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        let success = c.success.load(Ordering::Relaxed);
        let (min, max, avg) = if success == 0 {
            (None, None, None)
        } else {
            (
                Some(Duration::from_nanos(c.min_nanos.load(Ordering::Relaxed))),
                Some(Duration::from_nanos(c.max_nanos.load(Ordering::Relaxed))),
                Some(Duration::from_nanos(
                    c.sum_nanos.load(Ordering::Relaxed) / success,
                )),
            )
        };

        QueueStats {
            active: c.active.load(Ordering::Relaxed),
            complete: c.complete.load(Ordering::Relaxed),
            success,
            errored: c.errored.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            total: c.total.load(Ordering::Relaxed),
            min,
            max,
            avg,
            elapsed: self
                .started
                .get()
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("retries", &self.retries)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::sync::Mutex;

    #[derive(Debug, thiserror::Error, PartialEq)]
    #[error("connection reset")]
    struct ConnectionReset;

    fn config(concurrency: usize, retries: u32) -> QueueConfig {
        QueueConfig {
            name: "test".to_string(),
            concurrency,
            retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_run_returns_task_result() {
        let queue = RetryQueue::new(&config(2, 0));

        let value = queue
            .run(|| async { Ok::<_, ConnectionReset>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        let stats = queue.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let queue = RetryQueue::new(&config(3, 0));
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (running, peak) = (&running, &peak);

        let tasks = (0..20).map(|i| {
            queue.run(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ConnectionReset>(i)
            })
        });
        let results = futures::future::join_all(tasks).await;

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(queue.stats().complete, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let queue = RetryQueue::new(&config(1, 3));
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let value = queue
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConnectionReset)
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = queue.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.errored, 0);
    }

    #[tokio::test]
    #[timeout(5000)]
    async fn test_exhausted_retries_surface_last_error() {
        let queue = RetryQueue::new(&QueueConfig {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..config(1, 2)
        });
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let err = queue
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConnectionReset)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.task_error(), Some(&ConnectionReset));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = queue.stats();
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.complete, 1);
        assert_eq!(stats.retried, 2);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(RetryQueue::new(&config(0, 0)).concurrency(), 1);
        assert_eq!(
            RetryQueue::new(&config(usize::MAX, 0)).concurrency(),
            Semaphore::MAX_PERMITS
        );
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let queue = RetryQueue::new(&config(1, 10));

        assert_eq!(queue.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(queue.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(queue.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(queue.backoff_delay(5), Duration::from_secs(1));
        assert_eq!(queue.backoff_delay(64), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_tasks() {
        let queue = RetryQueue::new(&config(1, 0));
        queue.close();

        let err = queue
            .run(|| async { Ok::<_, ConnectionReset>(()) })
            .await
            .unwrap_err();

        assert!(queue.is_closed());
        assert!(matches!(err, QueueError::Closed { ref name } if name == "test"));
        assert!(err.task_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_task_keeps_its_slot() {
        let queue = RetryQueue::new(&config(1, 1));
        let order = Mutex::new(Vec::new());
        let failed_once = AtomicUsize::new(0);
        let (order, failed_once) = (&order, &failed_once);

        let first = queue.run(move || async move {
            order.lock().unwrap().push("first");
            if failed_once.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ConnectionReset)
            } else {
                Ok(())
            }
        });
        let second = queue.run(move || async move {
            order.lock().unwrap().push("second");
            Ok::<_, ConnectionReset>(())
        });

        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(*order.lock().unwrap(), vec!["first", "first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_attempt_durations() {
        let queue = RetryQueue::new(&config(2, 0));

        let short = queue.run(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ConnectionReset>(())
        });
        let long = queue.run(|| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, ConnectionReset>(())
        });
        let _ = tokio::join!(short, long);

        let stats = queue.stats();
        let min = stats.min.unwrap();
        let max = stats.max.unwrap();
        assert!(min >= Duration::from_millis(10) && min < Duration::from_millis(30));
        assert!(max >= Duration::from_millis(30));
        assert!(stats.avg.unwrap() >= min && stats.avg.unwrap() <= max);
        assert!(stats.elapsed >= max);
    }
}
