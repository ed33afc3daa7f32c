use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Largest batch the deletion engine will ever request, for listings and deletes alike.
pub const MAX_BATCH_SIZE: usize = 100_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store holding the tree (`file://`, `memory://` or `s3://`)
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("file:///.data/tree"),
        }
    }
}

/// Limits enforced by the object store adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Objects a single delete call may remove before it is refused as too large.
    ///
    /// Env: TREEPRUNE__REMOTE__MAX_OBJECTS_PER_CALL
    pub max_objects_per_call: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            // S3 DeleteObjects accepts at most 1000 keys per request
            max_objects_per_call: 1000,
        }
    }
}

/// Settings for one bounded retry queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Name used in log lines
    pub name: String,
    /// Maximum number of tasks running at the same time
    pub concurrency: usize,
    /// How many times a failing task is retried before its error is surfaced
    pub retries: u32,
    /// Delay before the first retry; doubled on every further retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl QueueConfig {
    /// Queue used for delete calls. Deletes are the calls that legitimately
    /// run long, so they get fewer slots and more room to retry.
    pub fn deletes() -> Self {
        Self {
            name: "delete".to_string(),
            concurrency: 8,
            retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Queue used for shallow listings.
    pub fn listings() -> Self {
        Self {
            name: "list".to_string(),
            concurrency: 16,
            retries: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::deletes()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeletionConfig {
    /// Children per delete call in the first round
    pub initial_delete_batch_size: usize,
    /// Child keys fetched by the first listing of a node
    pub initial_list_batch_size: usize,
    /// Listing page size never grows past this
    pub max_list_batch_size: usize,
    pub delete_queue: QueueConfig,
    pub list_queue: QueueConfig,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            initial_delete_batch_size: 25,
            initial_list_batch_size: 100,
            max_list_batch_size: MAX_BATCH_SIZE,
            delete_queue: QueueConfig::deletes(),
            list_queue: QueueConfig::listings(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Limits of the remote adapter
    pub remote: RemoteConfig,
    /// Deletion engine tuning
    pub deletion: DeletionConfig,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file("treeprune.toml"))
            .merge(Env::prefixed("TREEPRUNE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TREEPRUNE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
