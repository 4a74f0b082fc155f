//! Watch command - runs the background expiry sweeper until Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::Context;

/// Arguments for the watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between sweeps (overrides [sweeper] interval_secs)
    #[arg(short, long)]
    pub interval: Option<u64>,
}

/// Run the watch command.
pub async fn run(args: WatchArgs, ctx: &Context) -> Result<()> {
    let store = ctx.record_store()?;
    let interval = match args.interval {
        Some(0) => anyhow::bail!("--interval must be positive"),
        Some(secs) => Duration::from_secs(secs),
        None => store.options().sweep_interval,
    };

    if !store.options().enable_sweeper && args.interval.is_none() {
        info!("sweeper is disabled in the configuration; pass --interval to run it anyway");
        return Ok(());
    }

    info!(
        prefix = %store.options().prefix,
        interval_secs = interval.as_secs(),
        "starting expiry sweeper"
    );
    let handle = store.sweeper().spawn(interval);

    tokio::signal::ctrl_c().await?;
    info!("shutting down expiry sweeper");
    handle.shutdown().await;

    Ok(())
}
