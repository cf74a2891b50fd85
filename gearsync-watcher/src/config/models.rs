use std::{net::IpAddr, path::PathBuf, time::Duration};

use gearsync_core::{DispatchSettings, ExecutionMode, WatchConfig};
use url::{ParseError, Url};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_LOG_LEVEL: &str = "debug";
pub const DEFAULT_LOG_NAME: &str = "gearsync";

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub watch: WatchSettings,
    pub patterns: PatternSettings,
    /// Quiet period before a file event is acted on.
    pub hysteresis: Duration,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub directories: Vec<PathBuf>,
    pub recursive: bool,
    pub sync_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct PatternSettings {
    pub script: String,
    pub requirements: String,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Full connection URL; wins over `host` and `port` when set.
    pub redis_url: Option<String>,
    pub index_prefix: String,
    pub execution_mode: ExecutionMode,
}

impl RemoteConfig {
    /// `redis_url` as given, or one built from `host` (name or IP literal)
    /// and `port`.
    pub fn connection_url(&self) -> Result<Url, ParseError> {
        if let Some(raw) = &self.redis_url {
            return Url::parse(raw.trim());
        }

        let mut url = Url::parse("redis://localhost/")?;
        let host = self.host.trim();
        match host.parse::<IpAddr>() {
            Ok(ip) => url
                .set_ip_host(ip)
                .map_err(|_| ParseError::SetHostOnCannotBeABaseUrl)?,
            Err(_) => url.set_host(Some(host))?,
        }
        url.set_port(Some(self.port))
            .map_err(|_| ParseError::InvalidPort)?;
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub name: String,
    pub file: Option<PathBuf>,
    pub stdout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            recursive: self.watch.recursive,
            sync_on_start: self.watch.sync_on_start,
            ..WatchConfig::new(self.watch.directories.clone())
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            index_prefix: self.remote.index_prefix.clone(),
            execution_mode: self.remote.execution_mode,
        }
    }
}
