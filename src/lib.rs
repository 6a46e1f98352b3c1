//! SLL - Script Support Library
//!
//! Building blocks for batch and data scripts: database wrappers with
//! connect retry and LIMIT/OFFSET pagination, a master/slaves dispatcher,
//! a Redis client, colorized logging with email notification, PID-file
//! locking, progress reporting, profiling, host inventory reading and HTTP
//! helpers.
//!
//! # Features
//!
//! - MySQL and Postgres wrappers over sqlx pools, with mock mode
//! - Paged SELECT/DELETE and chunked batch execution
//! - Demultiplexor running one operation on 1 master and N slaves
//! - `tracing` based logging split between stdout and stderr
//! - Warnings and errors mailed over SMTP
//! - Single-instance scripts through lock files with TTL

pub mod cache;
pub mod cfg_host;
pub mod config;
pub mod crypto;
pub mod db;
pub mod demux;
pub mod error;
pub mod http;
pub mod locker;
pub mod logger;
pub mod profiler;
pub mod progress_bar;
pub mod script;
pub mod util;
pub mod value;

pub use config::SllConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::RedisClient;
    pub use crate::cfg_host::CfgHost;
    pub use crate::config::{DatabaseConfig, RedisConfig, SllConfig};
    pub use crate::db::{Database, Filter, LogDb, MySqlDb, MySqlOptions, MySqlTable, PgDb};
    pub use crate::demux::Demultiplexor;
    pub use crate::error::{Error, Result};
    pub use crate::locker::Locker;
    pub use crate::logger::{init_logging, paint, palette};
    pub use crate::profiler::Profiler;
    pub use crate::progress_bar::ProgressBar;
    pub use crate::script::{Script, ScriptArgs, ScriptOptions};
    pub use crate::value::{Row, Value};
}
