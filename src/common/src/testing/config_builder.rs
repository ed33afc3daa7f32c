//! Test configuration builder for creating test setups quickly.

use crate::config::{Configuration, DeletionConfig, QueueConfig, StorageConfig};
use std::time::Duration;

/// Builder for configurations suitable for tests.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .without_backoff()
///     .with_max_objects_per_call(10)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Use an in-memory object store (`memory://`).
    pub fn in_memory(mut self) -> Self {
        self.config.storage = StorageConfig {
            dsn: "memory://".to_string(),
        };
        self
    }

    /// Retry immediately so failure tests do not sleep.
    pub fn without_backoff(mut self) -> Self {
        for queue in [
            &mut self.config.deletion.delete_queue,
            &mut self.config.deletion.list_queue,
        ] {
            queue.initial_backoff = Duration::ZERO;
            queue.max_backoff = Duration::ZERO;
        }
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config.deletion.delete_queue.retries = retries;
        self.config.deletion.list_queue.retries = retries;
        self
    }

    pub fn with_delete_queue(mut self, queue: QueueConfig) -> Self {
        self.config.deletion.delete_queue = queue;
        self
    }

    pub fn with_initial_batch_sizes(mut self, delete: usize, list: usize) -> Self {
        self.config.deletion.initial_delete_batch_size = delete;
        self.config.deletion.initial_list_batch_size = list;
        self
    }

    pub fn with_max_objects_per_call(mut self, max: usize) -> Self {
        self.config.remote.max_objects_per_call = max;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }

    /// Shortcut for tests that only drive the deletion engine.
    pub fn build_deletion(self) -> DeletionConfig {
        self.config.deletion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_backoff_clears_both_queues() {
        let deletion = TestConfigBuilder::new().without_backoff().build_deletion();

        assert_eq!(deletion.delete_queue.initial_backoff, Duration::ZERO);
        assert_eq!(deletion.list_queue.max_backoff, Duration::ZERO);
        assert_eq!(deletion.delete_queue.retries, 3);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TestConfigBuilder::new()
            .in_memory()
            .with_retries(0)
            .with_initial_batch_sizes(4, 8)
            .with_max_objects_per_call(5)
            .build();

        assert_eq!(config.storage.dsn, "memory://");
        assert_eq!(config.deletion.list_queue.retries, 0);
        assert_eq!(config.deletion.initial_delete_batch_size, 4);
        assert_eq!(config.deletion.initial_list_batch_size, 8);
        assert_eq!(config.remote.max_objects_per_call, 5);
    }
}
