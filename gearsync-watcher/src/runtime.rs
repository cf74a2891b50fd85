use std::{sync::Arc, time::Duration};

use anyhow::Context;
use gearsync_core::{
    ActionDispatcher, EventRouter, FilePatterns, HysteresisIndex, RedisGears, WatchService,
};
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;

/// How long in-flight actions may keep running after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wire everything up and run until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let redis_url = config
        .remote
        .connection_url()
        .context("invalid Redis address")?;
    let gears = Arc::new(RedisGears::open(redis_url.as_str()).context("invalid Redis address")?);

    let patterns = FilePatterns::new(
        &config.patterns.script,
        &config.patterns.requirements,
        &config.patterns.ignore,
    )
    .context("invalid file pattern")?;

    let dispatcher = ActionDispatcher::new(gears.clone(), gears.clone(), config.dispatch_settings());
    let index = HysteresisIndex::new(config.hysteresis);
    let router = EventRouter::new(patterns, index.clone(), Arc::new(dispatcher));

    info!(
        redis = %gears.address(),
        hysteresis = %humantime::format_duration(config.hysteresis),
        index_prefix = %config.remote.index_prefix,
        mode = ?config.remote.execution_mode,
        "starting gearsync"
    );

    let service = WatchService::start(config.watch_config(), router)
        .await
        .context("failed to start file watchers")?;

    shutdown_signal().await?;
    info!("shutting down");

    service.shutdown().await;
    let abandoned = index.shutdown(SHUTDOWN_GRACE).await;
    if abandoned > 0 {
        warn!(abandoned, "dropped pending actions on shutdown");
    }
    gears.close().await;

    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = ctrl_c => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.context("failed to listen for Ctrl+C")?;

    Ok(())
}
