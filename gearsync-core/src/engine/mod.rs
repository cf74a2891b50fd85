//! Remote execution engine boundary.
//!
//! [`GearsEngine`] is the only way the dispatcher talks to the engine; the
//! Redis implementation lives in [`redis_gears`].

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::reconcile::RegistrationSnapshot;

pub mod redis_gears;

pub use redis_gears::RedisGears;

/// Script submitted when only requirements need installing.
pub const NOOP_SCRIPT: &str = "GB().run()";

/// How a script is submitted for execution.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Wait for the script to finish before replying.
    #[default]
    Blocking,
    /// Reply right away with an execution id.
    Unblocking,
}

/// Engine reply to a script submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionReply {
    /// Plain acknowledgement, typical for scripts that only register.
    Ok,
    /// Unblocking submission accepted under this execution id.
    Queued(String),
    /// Results and errors of a completed run.
    Completed {
        results: Vec<String>,
        errors: Vec<String>,
    },
}

impl ExecutionReply {
    pub fn errors(&self) -> &[String] {
        match self {
            ExecutionReply::Completed { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl fmt::Display for ExecutionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionReply::Ok => f.write_str("OK"),
            ExecutionReply::Queued(id) => write!(f, "queued as {id}"),
            ExecutionReply::Completed { results, errors } => {
                write!(f, "{} result(s), {} error(s)", results.len(), errors.len())
            }
        }
    }
}

/// Script execution and registration management on the engine.
#[async_trait]
pub trait GearsEngine: Send + Sync {
    /// Submit `script`, optionally asking the engine to install `requirements`
    /// first. Requirements are additive; nothing is ever uninstalled.
    async fn execute(
        &self,
        script: &str,
        mode: ExecutionMode,
        requirements: &[String],
    ) -> Result<ExecutionReply>;

    async fn list_registrations(&self) -> Result<RegistrationSnapshot>;

    /// Remove a registration. Fails with
    /// [`SyncError::UnknownRegistration`](crate::error::SyncError::UnknownRegistration)
    /// when the engine does not know `registration_id`.
    async fn remove_registration(&self, registration_id: &str) -> Result<()>;
}
