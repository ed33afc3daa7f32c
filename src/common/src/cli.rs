use clap::Parser;
use std::path::PathBuf;

/// CLI arguments shared by every treeprune binary
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::{Configuration, DeletionConfig, QueueConfig};
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level implied by the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    fn validate_queue(queue: &QueueConfig) -> Result<()> {
        if queue.concurrency == 0 {
            anyhow::bail!("Queue '{}' needs a concurrency of at least 1", queue.name);
        }
        if queue.initial_backoff > queue.max_backoff {
            anyhow::bail!(
                "Queue '{}' has an initial backoff larger than its max backoff",
                queue.name
            );
        }
        Ok(())
    }

    fn validate_deletion(deletion: &DeletionConfig) -> Result<()> {
        if deletion.initial_delete_batch_size == 0 {
            anyhow::bail!("Initial delete batch size must be at least 1");
        }
        if deletion.initial_list_batch_size == 0 {
            anyhow::bail!("Initial list batch size must be at least 1");
        }
        if deletion.initial_list_batch_size > deletion.max_list_batch_size {
            anyhow::bail!(
                "Initial list batch size {} exceeds the maximum of {}",
                deletion.initial_list_batch_size,
                deletion.max_list_batch_size
            );
        }
        validate_queue(&deletion.delete_queue)?;
        validate_queue(&deletion.list_queue)
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }

        if config.remote.max_objects_per_call == 0 {
            anyhow::bail!("Remote max_objects_per_call must be at least 1");
        }

        validate_deletion(&config.deletion)?;

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
