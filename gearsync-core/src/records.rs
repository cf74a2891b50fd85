//! Durable path -> registration mapping.

use std::{fmt, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Result, SyncError};

/// Fixed-width UTC timestamp used for `last_updated` (microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Key prefix applied when none is configured.
pub const DEFAULT_INDEX_PREFIX: &str = "/gearsync/scripts";

pub const FIELD_REGISTRATION_ID: &str = "registration_id";
pub const FIELD_LAST_UPDATED: &str = "last_updated";

/// The registration a script file produced on the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistrationRecord {
    pub registration_id: String,
    pub last_updated: DateTime<Utc>,
}

impl RegistrationRecord {
    pub fn new(registration_id: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            last_updated: Utc::now(),
        }
    }

    pub fn last_updated_text(&self) -> String {
        self.last_updated.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Rebuild a record from stored hash fields.
    pub fn from_fields(registration_id: String, last_updated: &str) -> Result<Self> {
        let parsed = NaiveDateTime::parse_from_str(last_updated, TIMESTAMP_FORMAT)
            .map_err(|err| {
                SyncError::Protocol(format!("malformed last_updated '{last_updated}': {err}"))
            })?
            .and_utc();

        Ok(Self {
            registration_id,
            last_updated: parsed,
        })
    }
}

/// Namespaced store key for the record of `path`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn for_path(prefix: &str, path: &Path) -> Self {
        Self(format!("{prefix}{}", path.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value persistence for [`RegistrationRecord`]s.
///
/// Deleting a key that does not exist must succeed.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn load(&self, key: &RecordKey) -> Result<Option<RegistrationRecord>>;

    async fn save(&self, key: &RecordKey, record: &RegistrationRecord) -> Result<()>;

    async fn remove(&self, key: &RecordKey) -> Result<()>;
}
