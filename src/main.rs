use anyhow::{Context, Result};
use clap::Parser;
use common::cli::{CommonArgs, utils};
use common::storage::create_object_store;
use remover::{NodePath, ObjectStoreTree, remove_subtree};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Delete a subtree of any size from an object store", long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Storage DSN, overrides `storage.dsn` from the configuration
    #[arg(long, env = "TREEPRUNE_DSN")]
    dsn: Option<String>,

    /// Subtree to delete, e.g. `/users/alice`
    path: String,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logging(&args.common);
    log::debug!("{}", utils::version_info());

    let mut config = utils::load_config(args.common.config.as_ref())?;
    if let Some(dsn) = args.dsn {
        config.storage.dsn = dsn;
    }
    utils::validate_config(&config)?;

    let object_store =
        create_object_store(&config.storage).context("Failed to open object store")?;
    let remote = Arc::new(ObjectStoreTree::new(
        object_store,
        config.remote.max_objects_per_call,
    ));
    let path = NodePath::parse(&args.path);

    log::info!("Removing {} from {}", path, config.storage.dsn);

    // Calls already sent stay applied; an interrupted run can simply be repeated.
    let delete_calls = tokio::select! {
        result = remove_subtree(remote, path.clone(), &config.deletion) => {
            result.with_context(|| format!("Failed to remove {path}"))?
        }
        signal = wait_for_shutdown_signal() => {
            signal?;
            anyhow::bail!("Interrupted while removing {path}");
        }
    };

    if !args.common.quiet {
        println!("Removed {path} with {delete_calls} delete calls");
    }
    Ok(())
}
