//! # gearsync
//!
//! Watches script directories and keeps the registrations on a RedisGears
//! engine in sync with the files in them.

use anyhow::Context;
use clap::Parser;
use gearsync_watcher::{
    cli::Cli,
    config::{ConfigLoad, ConfigLoader},
    logging, runtime,
};
use tracing::{Instrument, info, info_span, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad { config, warnings } = ConfigLoader::with_options(cli.loader_options())
        .load()
        .context("failed to load configuration")?;

    logging::init(&config.logging)?;

    if config.metadata.env_file_loaded {
        info!("loaded env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "loaded configuration file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    let span = info_span!("gearsync", name = %config.logging.name);
    runtime::run(config).instrument(span).await
}
