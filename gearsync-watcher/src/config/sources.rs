use std::{path::PathBuf, time::Duration};

use gearsync_core::ExecutionMode;
use serde::Deserialize;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub watch: FileWatchConfig,
    #[serde(default)]
    pub patterns: FilePatternConfig,
    #[serde(default)]
    pub remote: FileRemoteConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileWatchConfig {
    pub directories: Option<Vec<PathBuf>>,
    pub recursive: Option<bool>,
    pub sync_on_start: Option<bool>,
    pub hysteresis: Option<DurationValue>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePatternConfig {
    pub script: Option<String>,
    pub requirements: Option<String>,
    pub ignore: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRemoteConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub redis_url: Option<String>,
    pub index_prefix: Option<String>,
    pub execution_mode: Option<ExecutionMode>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    pub level: Option<String>,
    pub name: Option<String>,
    pub file: Option<PathBuf>,
    pub stdout: Option<bool>,
}

/// Durations in the file: seconds as a number, or a humantime string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(f64),
    Text(String),
}

impl DurationValue {
    pub fn resolve(&self) -> Result<Duration, String> {
        match self {
            DurationValue::Seconds(secs) => seconds(*secs),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

/// Accepts plain seconds (`"2.5"`) or humantime (`"750ms"`, `"1m 30s"`).
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    match raw.parse::<f64>() {
        Ok(secs) => seconds(secs),
        Err(_) => humantime::parse_duration(raw).map_err(|err| format!("'{raw}': {err}")),
    }
}

fn seconds(secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|err| format!("{secs} seconds: {err}"))
}

pub fn parse_execution_mode(raw: &str) -> Result<ExecutionMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "blocking" => Ok(ExecutionMode::Blocking),
        "unblocking" => Ok(ExecutionMode::Unblocking),
        other => Err(format!("unknown execution mode '{other}'")),
    }
}

/// Settings that override the file: environment variables and command-line
/// flags both produce one of these.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub directories: Option<Vec<PathBuf>>,
    pub recursive: Option<bool>,
    pub sync_on_start: Option<bool>,
    pub script_pattern: Option<String>,
    pub requirements_pattern: Option<String>,
    pub ignore: Option<Vec<String>>,
    pub hysteresis: Option<Duration>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub redis_url: Option<String>,
    pub index_prefix: Option<String>,
    pub execution_mode: Option<ExecutionMode>,
    pub log_level: Option<String>,
    pub log_name: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_stdout: Option<bool>,
    /// Variables that were set but could not be parsed, with the reason.
    pub rejected: Vec<(String, String)>,
}

impl ConfigOverrides {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = EnvReader {
            lookup: &lookup,
            rejected: Vec::new(),
        };

        let mut overrides = Self {
            config_path: env.string("CONFIG_FILE").map(PathBuf::from),
            directories: env
                .csv("WATCH_DIRS")
                .map(|dirs| dirs.into_iter().map(PathBuf::from).collect()),
            recursive: env.flag("RECURSIVE"),
            sync_on_start: env.flag("SYNC_ON_START"),
            script_pattern: env.string("SCRIPT_PATTERN"),
            requirements_pattern: env.string("REQUIREMENTS_PATTERN"),
            ignore: env.csv("IGNORE"),
            hysteresis: env.parsed("HYSTERESIS_DURATION", parse_duration),
            host: env.string("SERVER"),
            port: env.parsed("PORT", |raw| raw.trim().parse::<u16>().map_err(|e| e.to_string())),
            redis_url: env.string("REDIS_URL"),
            index_prefix: env.string("INDEX_PREFIX"),
            execution_mode: env.parsed("EXECUTION_MODE", parse_execution_mode),
            log_level: env.string("LOG_LEVEL"),
            log_name: env.string("LOG_NAME"),
            log_file: env.string("LOG_FILE").map(PathBuf::from),
            log_stdout: env.flag("LOG_NO_STDOUT").map(|no_stdout| !no_stdout),
            rejected: Vec::new(),
        };
        overrides.rejected = env.rejected;
        overrides
    }

    /// Field-wise `self` over `lower`.
    pub fn layered_over(self, lower: ConfigOverrides) -> ConfigOverrides {
        let mut rejected = lower.rejected;
        rejected.extend(self.rejected);
        ConfigOverrides {
            config_path: self.config_path.or(lower.config_path),
            directories: self.directories.or(lower.directories),
            recursive: self.recursive.or(lower.recursive),
            sync_on_start: self.sync_on_start.or(lower.sync_on_start),
            script_pattern: self.script_pattern.or(lower.script_pattern),
            requirements_pattern: self.requirements_pattern.or(lower.requirements_pattern),
            ignore: self.ignore.or(lower.ignore),
            hysteresis: self.hysteresis.or(lower.hysteresis),
            host: self.host.or(lower.host),
            port: self.port.or(lower.port),
            redis_url: self.redis_url.or(lower.redis_url),
            index_prefix: self.index_prefix.or(lower.index_prefix),
            execution_mode: self.execution_mode.or(lower.execution_mode),
            log_level: self.log_level.or(lower.log_level),
            log_name: self.log_name.or(lower.log_name),
            log_file: self.log_file.or(lower.log_file),
            log_stdout: self.log_stdout.or(lower.log_stdout),
            rejected,
        }
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
    rejected: Vec<(String, String)>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn csv(&self, name: &str) -> Option<Vec<String>> {
        self.string(name).map(|raw| {
            raw.split(',')
                .filter_map(|part| {
                    let trimmed = part.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .collect()
        })
    }

    fn flag(&mut self, name: &str) -> Option<bool> {
        self.parsed(name, |raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(format!("'{other}' is not a boolean")),
        })
    }

    fn parsed<T>(
        &mut self,
        name: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Option<T> {
        let raw = self.string(name)?;
        match parse(&raw) {
            Ok(value) => Some(value),
            Err(reason) => {
                self.rejected.push((name.to_string(), reason));
                None
            }
        }
    }
}
