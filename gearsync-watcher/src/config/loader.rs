use std::{fs, path::PathBuf, time::Duration};

use gearsync_core::{
    DEFAULT_HYSTERESIS, ExecutionMode,
    classify::{DEFAULT_REQUIREMENTS_PATTERN, DEFAULT_SCRIPT_PATTERN},
    records::DEFAULT_INDEX_PREFIX,
};
use once_cell::sync::Lazy;
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, DEFAULT_HOST, DEFAULT_LOG_LEVEL, DEFAULT_LOG_NAME, DEFAULT_PORT,
        LoggingConfig, PatternSettings, RemoteConfig, WatchSettings,
    },
    sources::{ConfigOverrides, FileConfig},
    validation::{self, ConfigValidationError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("gearsync.toml"),
        PathBuf::from("config/gearsync.toml"),
        PathBuf::from("/etc/gearsync/gearsync.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Command-line values; they win over everything else.
    pub overrides: ConfigOverrides,
}

/// Layers defaults, the TOML file, the environment and the command line into
/// a validated [`Config`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.options.overrides = overrides;
        self
    }

    /// Load `.env` (or the configured env file), then read the process
    /// environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).map_err(|err| match err {
                dotenvy::Error::Io(source) => ConfigLoadError::Io {
                    path: path.clone(),
                    source,
                },
                other => ConfigLoadError::EnvFile(other),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(ConfigOverrides::from_env())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] with `env` standing in for the process
    /// environment.
    pub fn load_with_env(&self, env: ConfigOverrides) -> Result<ConfigLoad, ConfigLoadError> {
        let overrides = self.options.overrides.clone().layered_over(env);
        let (file_config, config_path) = self.load_file_config(&overrides)?;
        self.compose_config(file_config, overrides, config_path)
    }

    fn load_file_config(
        &self,
        overrides: &ConfigOverrides,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| overrides.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigLoadError::MissingConfig { path }),
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        overrides: ConfigOverrides,
        config_path: Option<PathBuf>,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No gearsync.toml detected; using command line and environment only",
                "Pass --config or place gearsync.toml in the working directory",
            );
        }
        for (name, reason) in &overrides.rejected {
            warnings.push(format!("ignoring {name}: {reason}"));
        }

        let FileConfig {
            watch: file_watch,
            patterns: file_patterns,
            remote: file_remote,
            logging: file_logging,
        } = file_config.unwrap_or_default();

        let file_hysteresis = file_watch
            .hysteresis
            .as_ref()
            .map(|value| value.resolve())
            .transpose()
            .map_err(|reason| ConfigLoadError::InvalidDuration {
                field: "watch.hysteresis",
                reason,
            })?;

        let watch = WatchSettings {
            directories: overrides
                .directories
                .or(file_watch.directories)
                .unwrap_or_default(),
            recursive: overrides
                .recursive
                .or(file_watch.recursive)
                .unwrap_or(false),
            sync_on_start: overrides
                .sync_on_start
                .or(file_watch.sync_on_start)
                .unwrap_or(false),
        };

        let patterns = PatternSettings {
            script: overrides
                .script_pattern
                .or(file_patterns.script)
                .unwrap_or_else(|| DEFAULT_SCRIPT_PATTERN.to_string()),
            requirements: overrides
                .requirements_pattern
                .or(file_patterns.requirements)
                .unwrap_or_else(|| DEFAULT_REQUIREMENTS_PATTERN.to_string()),
            ignore: overrides
                .ignore
                .or(file_patterns.ignore)
                .unwrap_or_default(),
        };

        let hysteresis: Duration = overrides
            .hysteresis
            .or(file_hysteresis)
            .unwrap_or(DEFAULT_HYSTERESIS);

        let remote = RemoteConfig {
            host: overrides
                .host
                .or(file_remote.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: overrides.port.or(file_remote.port).unwrap_or(DEFAULT_PORT),
            redis_url: overrides.redis_url.or(file_remote.redis_url),
            index_prefix: overrides
                .index_prefix
                .or(file_remote.index_prefix)
                .unwrap_or_else(|| DEFAULT_INDEX_PREFIX.to_string()),
            execution_mode: overrides
                .execution_mode
                .or(file_remote.execution_mode)
                .unwrap_or(ExecutionMode::Blocking),
        };

        let logging = LoggingConfig {
            level: overrides
                .log_level
                .or(file_logging.level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            name: overrides
                .log_name
                .or(file_logging.name)
                .unwrap_or_else(|| DEFAULT_LOG_NAME.to_string()),
            file: overrides.log_file.or(file_logging.file),
            stdout: overrides
                .log_stdout
                .or(file_logging.stdout)
                .unwrap_or(true),
        };

        let config = Config {
            watch,
            patterns,
            hysteresis,
            remote,
            logging,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {}", path.display())]
    MissingConfig { path: PathBuf },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}: {reason}")]
    InvalidDuration { field: &'static str, reason: String },
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
