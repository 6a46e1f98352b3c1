//! Postgres Wrapper

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool};

use super::{connect_with_retry, log_cleanup, log_query, not_connected, paging, sql, Database};
use crate::config::{DatabaseConfig, DbLimits};
use crate::error::{Error, Result};
use crate::profiler;
use crate::value::{preview_rows, Row};

/// Postgres database wrapper. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PgDb {
    config: DatabaseConfig,
    limits: DbLimits,
    fast_debug: bool,
    mock: bool,
    pool: Option<PgPool>,
}

impl PgDb {
    pub fn new(config: DatabaseConfig, limits: DbLimits, fast_debug: bool) -> Self {
        Self {
            config,
            limits,
            fast_debug,
            mock: false,
            pool: None,
        }
    }

    /// Create a mock wrapper for testing
    pub fn new_mock(config: DatabaseConfig) -> Self {
        Self {
            mock: true,
            ..Self::new(config, DbLimits::default(), false)
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| not_connected(&self.config.info()))
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password);
        if let Some(db) = &self.config.database {
            options = options.database(db);
        }
        options
    }

    fn query_error(&self, sql: &str, args: Option<String>, e: sqlx::Error) -> Error {
        tracing::debug!("Query failed on {}: {}", self.config.info(), e);
        Error::sql_query(&self.config.info(), sql, args, e)
    }

    /// Execute a statement, returning the number of affected rows
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        log_query(sql, None, false, self.mock);
        if self.mock {
            return Ok(0);
        }

        let pool = self.pool()?;
        let result = profiler::timed(sql, pool.execute(sql))
            .await
            .map_err(|e| self.query_error(sql, None, e))?;
        Ok(result.rows_affected())
    }

    /// Execute a query and return its rows
    pub async fn execute_query(&self, sql: &str) -> Result<Vec<PgRow>> {
        log_query(sql, None, false, self.mock);
        if self.mock {
            return Ok(Vec::new());
        }

        let pool = self.pool()?;
        profiler::timed(sql, pool.fetch_all(sql))
            .await
            .map_err(|e| self.query_error(sql, None, e))
    }

    async fn query_owned(&self, sql: String) -> Result<Vec<PgRow>> {
        self.execute_query(&sql).await
    }

    /// Execute a `$n`-parameterized statement once per row; each chunk of
    /// `max_execute_many` rows runs in one transaction
    pub async fn execute_many(&self, sql: &str, rows: &[Row]) -> Result<u64> {
        let mut total = 0;

        for chunk in rows.chunks(self.limits.max_execute_many.max(1)) {
            let preview = preview_rows(chunk, self.limits.max_log_rows);
            log_query(sql, Some(&preview), false, self.mock);
            if self.mock {
                break;
            }

            let pool = self.pool()?;
            let run = async {
                let mut affected = 0;
                let mut tx = pool.begin().await?;
                for row in chunk {
                    let mut query = sqlx::query(sql);
                    for value in row {
                        query = value.bind_pg(query);
                    }
                    affected += query.execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
                Ok::<u64, sqlx::Error>(affected)
            };
            total += run.await.map_err(|e| self.query_error(sql, Some(preview), e))?;

            if self.fast_debug {
                break;
            }
        }

        Ok(total)
    }

    /// Fetch a SELECT page by page with `LIMIT n OFFSET m`
    pub async fn fetch_all_paged(&self, template: &str) -> Result<Vec<PgRow>> {
        let limit = self.limits.fetch_limit(self.fast_debug);
        paging::fetch_paged(limit, self.fast_debug, |offset| {
            self.query_owned(sql::pg_paged(template, offset, limit))
        })
        .await
    }
}

#[async_trait]
impl Database for PgDb {
    async fn connect(&mut self) -> Result<()> {
        let info = self.config.info();
        if self.mock {
            tracing::info!("[CONNECT] [MOCK] Connect to DB: {}", info);
            return Ok(());
        }
        if self.pool.is_some() {
            return Ok(());
        }

        let connect_options = self.connect_options();
        let pool_size = self.config.pool_size;
        let acquire_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let pool = connect_with_retry(&info, &self.limits, || {
            PgPoolOptions::new()
                .max_connections(pool_size)
                .acquire_timeout(acquire_timeout)
                .connect_with(connect_options.clone())
        })
        .await?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        log_cleanup(&self.config.info());
    }

    fn db_info(&self) -> String {
        self.config.info()
    }

    fn is_connected(&self) -> bool {
        self.mock || self.pool.is_some()
    }
}
