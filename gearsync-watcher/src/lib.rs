//! # Gearsync Watcher
//!
//! Configuration, logging and process wiring for the `gearsync` binary. The
//! sync logic itself lives in `gearsync-core`.

pub mod cli;
pub mod config;
pub mod logging;
pub mod runtime;
