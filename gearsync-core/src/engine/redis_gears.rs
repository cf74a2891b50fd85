use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::DateTime;
use redis::{AsyncCommands, Client, RedisError, Value, aio::ConnectionManager};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{ExecutionMode, ExecutionReply, GearsEngine};
use crate::{
    error::{Result, SyncError},
    reconcile::RegistrationSnapshot,
    records::{
        FIELD_LAST_UPDATED, FIELD_REGISTRATION_ID, RecordKey, RegistrationRecord,
        RegistrationStore,
    },
};

/// RedisGears engine and registration index backed by one Redis server.
///
/// The connection is opened on first use and kept by a `ConnectionManager`,
/// which reconnects on its own afterwards. Until Redis is reachable every
/// call fails with [`SyncError::Redis`] and the next call tries again.
pub struct RedisGears {
    client: Client,
    address: String,
    conn: Mutex<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisGears {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connected = self
            .conn
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);
        f.debug_struct("RedisGears")
            .field("address", &self.address)
            .field("connected", &connected)
            .finish()
    }
}

impl RedisGears {
    /// Validate `redis_url` without connecting.
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            address: redact_url(redis_url),
            conn: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        info!("Connecting to RedisGears at {}", self.address);
        let conn = ConnectionManager::new(self.client.clone()).await?;
        info!("Successfully connected to RedisGears");

        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the shared connection. A later call reconnects.
    pub async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            info!("Closed RedisGears connection to {}", self.address);
        }
    }
}

#[async_trait]
impl GearsEngine for RedisGears {
    async fn execute(
        &self,
        script: &str,
        mode: ExecutionMode,
        requirements: &[String],
    ) -> Result<ExecutionReply> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("RG.PYEXECUTE");
        cmd.arg(script);
        if mode == ExecutionMode::Unblocking {
            cmd.arg("UNBLOCKING");
        }
        if !requirements.is_empty() {
            cmd.arg("REQUIREMENTS").arg(requirements);
        }

        debug!(
            ?mode,
            requirements = requirements.len(),
            bytes = script.len(),
            "RG.PYEXECUTE"
        );
        let reply: Value = cmd.query_async(&mut conn).await?;
        Ok(parse_execution_reply(reply))
    }

    async fn list_registrations(&self) -> Result<RegistrationSnapshot> {
        let mut conn = self.connection().await?;
        let reply: Vec<Value> = redis::cmd("RG.DUMPREGISTRATIONS")
            .query_async(&mut conn)
            .await?;
        parse_registrations(&reply)
    }

    async fn remove_registration(&self, registration_id: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        debug!(registration_id, "RG.UNREGISTER");
        redis::cmd("RG.UNREGISTER")
            .arg(registration_id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| {
                if is_server_rejection(&err) {
                    debug!(registration_id, error = %err, "engine rejected unregister");
                    SyncError::UnknownRegistration(registration_id.to_string())
                } else {
                    SyncError::Redis(err)
                }
            })
    }
}

#[async_trait]
impl RegistrationStore for RedisGears {
    async fn load(&self, key: &RecordKey) -> Result<Option<RegistrationRecord>> {
        let mut conn = self.connection().await?;
        let mut fields: HashMap<String, String> = conn.hgetall(key.as_str()).await?;
        if fields.is_empty() {
            debug!("Index MISS: {}", key);
            return Ok(None);
        }

        let registration_id = fields.remove(FIELD_REGISTRATION_ID).ok_or_else(|| {
            SyncError::Protocol(format!("index entry {key} has no {FIELD_REGISTRATION_ID}"))
        })?;
        let last_updated = fields.remove(FIELD_LAST_UPDATED).unwrap_or_default();

        let record = match RegistrationRecord::from_fields(registration_id.clone(), &last_updated)
        {
            Ok(record) => record,
            Err(err) => {
                warn!("Index entry {} has an unreadable timestamp: {}", key, err);
                RegistrationRecord {
                    registration_id,
                    last_updated: DateTime::UNIX_EPOCH,
                }
            }
        };

        debug!("Index HIT: {} -> {}", key, record.registration_id);
        Ok(Some(record))
    }

    async fn save(&self, key: &RecordKey, record: &RegistrationRecord) -> Result<()> {
        let mut conn = self.connection().await?;
        debug!("Index SET: {} -> {}", key, record.registration_id);

        redis::cmd("HSET")
            .arg(key.as_str())
            .arg(FIELD_REGISTRATION_ID)
            .arg(&record.registration_id)
            .arg(FIELD_LAST_UPDATED)
            .arg(record.last_updated_text())
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<()> {
        let mut conn = self.connection().await?;
        debug!("Index DELETE: {}", key);
        conn.del::<_, ()>(key.as_str()).await?;
        Ok(())
    }
}

// Errors the server answered with, as opposed to transport failures.
fn is_server_rejection(err: &RedisError) -> bool {
    !(err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(text) => Some(text.clone()),
        Value::Okay => Some("OK".to_string()),
        Value::Int(number) => Some(number.to_string()),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    value_text(value).unwrap_or_else(|| format!("{value:?}"))
}

fn describe_all(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(describe).collect(),
        Value::Nil => Vec::new(),
        other => vec![describe(other)],
    }
}

/// Interpret an `RG.PYEXECUTE` reply.
pub(crate) fn parse_execution_reply(reply: Value) -> ExecutionReply {
    match reply {
        Value::Okay | Value::Nil => ExecutionReply::Ok,
        Value::SimpleString(text) if text.eq_ignore_ascii_case("OK") => ExecutionReply::Ok,
        Value::Array(items) if items.len() == 2 && items.iter().all(|i| matches!(i, Value::Array(_))) => {
            ExecutionReply::Completed {
                results: describe_all(&items[0]),
                errors: describe_all(&items[1]),
            }
        }
        Value::Array(items) => ExecutionReply::Completed {
            results: items.iter().map(describe).collect(),
            errors: Vec::new(),
        },
        other => match value_text(&other) {
            Some(text) => ExecutionReply::Queued(text),
            None => ExecutionReply::Completed {
                results: vec![describe(&other)],
                errors: Vec::new(),
            },
        },
    }
}

/// Extract registration identities from an `RG.DUMPREGISTRATIONS` reply.
///
/// Every entry is a flat field/value list; the identity is the value of the
/// `id` field, which RedisGears always places second.
pub(crate) fn parse_registrations(entries: &[Value]) -> Result<RegistrationSnapshot> {
    entries
        .iter()
        .map(|entry| {
            let Value::Array(fields) = entry else {
                return Err(SyncError::Protocol(format!(
                    "registration entry is not a list: {entry:?}"
                )));
            };

            let by_name = fields
                .chunks(2)
                .find(|pair| value_text(&pair[0]).as_deref() == Some("id"))
                .and_then(|pair| pair.get(1))
                .and_then(value_text);

            by_name
                .or_else(|| fields.get(1).and_then(value_text))
                .ok_or_else(|| SyncError::Protocol("registration entry without id".into()))
        })
        .collect()
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparsable address>".to_string(),
    }
}
