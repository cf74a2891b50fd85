use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use super::models::Config;

/// Below this the debounce no longer absorbs multi-step editor saves.
const SHORT_HYSTERESIS: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("no directories to watch")]
    NoDirectories,
    #[error("watch path {} is not a directory", path.display())]
    NotADirectory { path: PathBuf },
    #[error("port must be non-zero")]
    ZeroPort,
    #[error("invalid Redis address: {source}")]
    InvalidRedisAddress {
        #[source]
        source: url::ParseError,
    },
    #[error("{field} pattern must not be empty")]
    EmptyPattern { field: &'static str },
    #[error("hysteresis duration must be positive")]
    NonPositiveHysteresis,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigValidationError> {
    let mut warnings = ConfigWarnings::default();

    if config.watch.directories.is_empty() {
        return Err(ConfigValidationError::NoDirectories);
    }
    for dir in &config.watch.directories {
        if !dir.is_dir() {
            return Err(ConfigValidationError::NotADirectory { path: dir.clone() });
        }
    }

    if config.remote.port == 0 {
        return Err(ConfigValidationError::ZeroPort);
    }
    if let Err(source) = config.remote.connection_url() {
        return Err(ConfigValidationError::InvalidRedisAddress { source });
    }

    if config.patterns.script.trim().is_empty() {
        return Err(ConfigValidationError::EmptyPattern { field: "script" });
    }
    if config.patterns.requirements.trim().is_empty() {
        return Err(ConfigValidationError::EmptyPattern {
            field: "requirements",
        });
    }
    if config.patterns.script.eq_ignore_ascii_case(&config.patterns.requirements) {
        warnings.push_with_hint(
            "script and requirements patterns are identical; matching files are treated as scripts",
            "Set REQUIREMENTS_PATTERN to something that only matches dependency manifests",
        );
    }

    if config.hysteresis.is_zero() {
        return Err(ConfigValidationError::NonPositiveHysteresis);
    }
    if config.hysteresis < SHORT_HYSTERESIS {
        warnings.push_with_hint(
            format!(
                "hysteresis of {} is very short; editor saves may trigger several registrations",
                humantime::format_duration(config.hysteresis)
            ),
            "Use at least 100ms",
        );
    }

    if !config.logging.stdout && config.logging.file.is_none() {
        warnings.push("stdout logging is disabled and no log file is configured; nothing will be logged");
    }

    Ok(warnings)
}
