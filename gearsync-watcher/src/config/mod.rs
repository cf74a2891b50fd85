pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, LoggingConfig, PatternSettings, RemoteConfig, WatchSettings};
pub use sources::{ConfigOverrides, FileConfig, parse_duration};
pub use validation::{ConfigValidationError, ConfigWarning, ConfigWarnings};
