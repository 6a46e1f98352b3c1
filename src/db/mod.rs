//! Database Module
//!
//! Thin wrappers over sqlx pools for MySQL and Postgres with connect retry,
//! centralized query logging, mock mode and LIMIT/OFFSET pagination.

mod log_db;
mod mysql;
pub mod paging;
mod postgres;
pub mod sql;
mod table;

pub use log_db::{group_by_crc, LogDb, LogRecord};
pub use mysql::{ExecOutcome, MySqlDb, MySqlOptions};
pub use postgres::PgDb;
pub use table::{Filter, MySqlTable};

use std::future::Future;

use async_trait::async_trait;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

pub use crate::config::DbLimits;
use crate::error::{is_transient, Error, Result};
use crate::logger::{paint, palette};

/// Common lifecycle of every database wrapper
#[async_trait]
pub trait Database: Send + Sync {
    /// Open the connection pool, retrying per the configured policy
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection pool
    async fn cleanup(&mut self);

    /// Short description, `host:port/db`
    fn db_info(&self) -> String;

    fn is_connected(&self) -> bool;
}

/// Run `attempt` until it succeeds, at most `limits.reconnect_attempts`
/// times with a fixed pause between attempts. Errors that another attempt
/// cannot fix (bad credentials, unknown database) end the loop at once.
pub(crate) async fn connect_with_retry<T, F, Fut>(
    db_info: &str,
    limits: &DbLimits,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let attempts = limits.reconnect_attempts.max(1);
    let timeout = limits.reconnect_timeout();
    let strategy = FixedInterval::new(timeout).take(attempts - 1);
    let mut current = 0usize;

    let result = RetryIf::spawn(
        strategy,
        || {
            current += 1;
            let n = current;
            let fut = attempt();
            async move {
                fut.await.map_err(|e| {
                    tracing::error!(
                        "[CONNECT] Can't connect to DB: {}.\nAttempt {}/{}. Timeout: {:?}\n{}",
                        db_info,
                        n,
                        attempts,
                        timeout,
                        e
                    );
                    e
                })
            }
        },
        is_transient,
    )
    .await;

    match result {
        Ok(value) => {
            tracing::info!(
                "[CONNECT] Connect to DB: {}. {}",
                paint(db_info, palette::TARGET),
                paint("OPENED!", palette::OPENED)
            );
            Ok(value)
        }
        Err(e) => Err(Error::DbConnect {
            db_info: db_info.to_string(),
            attempts: current,
            reason: e.to_string(),
        }),
    }
}

pub(crate) fn log_cleanup(db_info: &str) {
    tracing::info!(
        "[CLEANUP] Connect to DB: {}. {}",
        paint(db_info, palette::TARGET),
        paint("CLOSED!", palette::CLOSED)
    );
}

/// Log a statement (and a preview of its bound rows) before running it
pub(crate) fn log_query(sql: &str, args: Option<&str>, silent: bool, mock: bool) {
    if !silent {
        let prefix = if mock { "\t[MOCK] Execute sql query:" } else { "\tExecute sql query:" };
        tracing::info!(
            "{}\n\t\t{}",
            paint(prefix, palette::DEBUG),
            paint(sql, palette::SQL)
        );
    }
    if let Some(args) = args {
        tracing::info!(
            "{}\n\t\t{}",
            paint("\tSQL data args:", palette::DEBUG),
            paint(args, palette::SQL_ARGS)
        );
    }
}

pub(crate) fn not_connected(db_info: &str) -> Error {
    Error::Database(sqlx::Error::Configuration(
        format!("no connection pool for {}, call connect() first", db_info).into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limits(attempts: usize) -> DbLimits {
        DbLimits {
            reconnect_attempts: attempts,
            reconnect_timeout_secs: 0,
            ..DbLimits::default()
        }
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = connect_with_retry("h:1/db", &limits(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::DbConnect { attempts, db_info, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(db_info, "h:1/db");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = connect_with_retry("h:1/db", &limits(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::Configuration("unknown database".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::DbConnect { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let calls = AtomicUsize::new(0);
        let value = connect_with_retry("h:1/db", &limits(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(sqlx::Error::PoolTimedOut)
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
