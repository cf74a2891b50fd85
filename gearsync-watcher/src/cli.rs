use std::{path::PathBuf, time::Duration};

use clap::Parser;
use gearsync_core::ExecutionMode;

use crate::config::{ConfigLoaderOptions, ConfigOverrides, parse_duration};

/// Command-line interface of the `gearsync` binary.
///
/// Every flag also has an environment variable (read after the env file is
/// loaded); flags win.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gearsync", version)]
#[command(about = "Keep RedisGears script registrations in sync with files on disk")]
pub struct Cli {
    /// Directories to watch [env: WATCH_DIRS, comma separated]
    #[arg(value_name = "DIR")]
    pub directories: Vec<PathBuf>,

    /// TOML configuration file [env: CONFIG_FILE]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Env file to load before reading the environment (default: ./.env)
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Watch subdirectories too [env: RECURSIVE]
    #[arg(short, long)]
    pub recursive: bool,

    /// Register every matching file already present at startup [env: SYNC_ON_START]
    #[arg(long)]
    pub sync_on_start: bool,

    /// Glob for script files (default: *.py) [env: SCRIPT_PATTERN]
    #[arg(long, value_name = "GLOB")]
    pub script_pattern: Option<String>,

    /// Glob for requirements files (default: *requirements*.txt) [env: REQUIREMENTS_PATTERN]
    #[arg(long, value_name = "GLOB")]
    pub requirements_pattern: Option<String>,

    /// Glob of paths to ignore; repeatable [env: IGNORE, comma separated]
    #[arg(short, long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Quiet period before acting on a file, in seconds or humantime (default: 5s) [env: HYSTERESIS_DURATION]
    #[arg(
        short = 'd',
        long,
        visible_alias = "hysteresis-duration",
        value_name = "DURATION",
        value_parser = parse_duration
    )]
    pub hysteresis: Option<Duration>,

    /// Redis host (default: localhost) [env: SERVER]
    #[arg(short = 's', long = "server", value_name = "HOST")]
    pub host: Option<String>,

    /// Redis port (default: 6379) [env: PORT]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Full Redis URL; overrides --server and --port [env: REDIS_URL]
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,

    /// Key prefix of the registration index (default: /gearsync/scripts) [env: INDEX_PREFIX]
    #[arg(long, value_name = "PREFIX")]
    pub index_prefix: Option<String>,

    /// Submit scripts without waiting for them to finish [env: EXECUTION_MODE=unblocking]
    #[arg(long)]
    pub unblocking: bool,

    /// Log level or filter directive (default: debug) [env: LOG_LEVEL]
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Name attached to every log line (default: gearsync) [env: LOG_NAME]
    #[arg(long, value_name = "NAME")]
    pub log_name: Option<String>,

    /// Also write logs to this file [env: LOG_FILE]
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Do not log to stdout [env: LOG_NO_STDOUT]
    #[arg(long)]
    pub no_stdout: bool,
}

impl Cli {
    /// Values given on the command line. Unset flags stay `None` so lower
    /// layers can fill them in.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            directories: (!self.directories.is_empty()).then(|| self.directories.clone()),
            recursive: self.recursive.then_some(true),
            sync_on_start: self.sync_on_start.then_some(true),
            script_pattern: self.script_pattern.clone(),
            requirements_pattern: self.requirements_pattern.clone(),
            ignore: (!self.ignore.is_empty()).then(|| self.ignore.clone()),
            hysteresis: self.hysteresis,
            host: self.host.clone(),
            port: self.port,
            redis_url: self.redis_url.clone(),
            index_prefix: self.index_prefix.clone(),
            execution_mode: self.unblocking.then_some(ExecutionMode::Unblocking),
            log_level: self.log_level.clone(),
            log_name: self.log_name.clone(),
            log_file: self.log_file.clone(),
            log_stdout: self.no_stdout.then_some(false),
            rejected: Vec::new(),
        }
    }

    pub fn loader_options(&self) -> ConfigLoaderOptions {
        ConfigLoaderOptions {
            config_path: self.config.clone(),
            env_file: self.env_file.clone(),
            overrides: self.overrides(),
        }
    }
}
