//! # Gearsync Core
//!
//! Keeps the scripts registered on a RedisGears engine in step with script
//! files on disk.
//!
//! ## Overview
//!
//! - **Debouncing**: [`HysteresisIndex`] coalesces bursts of file events per
//!   path so only the last one of a burst does any remote work
//! - **Classification**: [`classify()`] maps created, modified, deleted and moved
//!   files to register, unregister or update-dependencies actions
//! - **Dispatch**: [`ActionDispatcher`] runs those actions and records which
//!   registration each script produced
//! - **Reconciliation**: [`reconcile()`] attributes new registrations to a script
//!   by diffing the engine's registrations around its execution
//!
//! ## Architecture
//!
//! - [`watch`]: `notify` watchers and event normalization
//! - [`router`]: classification plus debounced scheduling
//! - [`dispatch`]: the three sync actions
//! - [`engine`]: the [`GearsEngine`] boundary and its Redis implementation
//! - [`records`]: the persisted path to registration index
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use gearsync_core::{
//!     ActionDispatcher, DispatchSettings, EventRouter, FilePatterns, HysteresisIndex, RedisGears,
//!     WatchConfig, WatchService,
//! };
//!
//! # async fn run() -> gearsync_core::Result<()> {
//! let gears = Arc::new(RedisGears::open("redis://localhost:6379/")?);
//! let dispatcher = ActionDispatcher::new(gears.clone(), gears, DispatchSettings::default());
//! let router = EventRouter::new(
//!     FilePatterns::new("*.py", "*requirements*.txt", &[])?,
//!     HysteresisIndex::new(Duration::from_secs(5)),
//!     Arc::new(dispatcher),
//! );
//! let service = WatchService::start(WatchConfig::new(vec!["./scripts".into()]), router).await?;
//! # service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hysteresis;
pub mod reconcile;
pub mod records;
pub mod requirements;
pub mod router;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{FilePatterns, FsEvent, FsEventKind, Routing, SyncAction, classify};
pub use dispatch::{
    ActionDispatcher, DependencyOutcome, DispatchSettings, RegisterOutcome, UnregisterOutcome,
};
pub use engine::{ExecutionMode, ExecutionReply, GearsEngine, RedisGears};
pub use error::{ErrorClass, Result, SyncError};
pub use hysteresis::{DEFAULT_HYSTERESIS, HysteresisIndex};
pub use reconcile::{Reconciliation, RegistrationSnapshot, reconcile};
pub use records::{RecordKey, RegistrationRecord, RegistrationStore};
pub use router::EventRouter;
pub use watch::{WatchConfig, WatchService};
