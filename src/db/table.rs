//! Per-table helpers on top of [`MySqlDb`]

use async_trait::async_trait;
use sqlx::mysql::MySqlRow;

use super::{sql, Database, MySqlDb};
use crate::error::Result;
use crate::progress_bar::ProgressBar;
use crate::value::{Row, Value};

/// WHERE / ORDER BY / OFFSET / LIMIT selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub condition: Option<String>,
    pub order_by: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Explicit `(offset, limit)` window; a lone offset reads one row,
    /// a lone limit starts at zero. Zero counts as unset.
    fn window(&self) -> Option<(usize, usize)> {
        let offset = self.offset.filter(|&n| n > 0);
        let limit = self.limit.filter(|&n| n > 0);
        match (offset, limit) {
            (None, None) => None,
            (offset, limit) => Some((offset.unwrap_or(0), limit.unwrap_or(1))),
        }
    }
}

/// A MySQL wrapper bound to one table
#[derive(Debug, Clone)]
pub struct MySqlTable {
    db: MySqlDb,
    table: String,
}

impl MySqlTable {
    pub fn new(db: MySqlDb, table: &str) -> Self {
        Self {
            db,
            table: table.to_string(),
        }
    }

    pub fn db(&self) -> &MySqlDb {
        &self.db
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Same connection, another table
    pub fn for_table(&self, table: &str) -> Self {
        Self::new(self.db.clone(), table)
    }

    pub async fn count(&self, condition: Option<&str>) -> Result<u64> {
        let count = self.db.fetch_count(&sql::count(&self.table, condition)).await?;
        Ok(count.max(0) as u64)
    }

    /// Delete matching rows. Without a limit the delete runs in batches of
    /// `max_delete_rows`.
    pub async fn delete_data(&self, filter: &Filter) -> Result<u64> {
        let template = sql::delete(
            &self.table,
            filter.condition.as_deref(),
            filter.order_by.as_deref(),
        );

        match filter.window() {
            Some((offset, limit)) => {
                if offset > 0 {
                    tracing::warn!("DELETE ignores offset {} on `{}`", offset, self.table);
                }
                self.db.execute(&sql::limited(&template, limit)).await
            }
            None => self.db.delete_paged(&template).await,
        }
    }

    /// Run a hand-written DELETE in batches
    pub async fn delete_sql(&self, pure_sql: &str) -> Result<u64> {
        self.db.delete_paged(pure_sql).await
    }

    pub async fn insert_multi(&self, columns: &[&str], rows: &[Row]) -> Result<u64> {
        self.db
            .execute_many(&sql::insert(&self.table, columns), rows)
            .await
    }

    /// Update per row; each row holds the column values followed by the
    /// values for the `?` parameters of `condition`
    pub async fn update_multi(&self, columns: &[&str], rows: &[Row], condition: &str) -> Result<u64> {
        self.db
            .execute_many(&sql::update(&self.table, columns, condition), rows)
            .await
    }

    /// Upsert row by row, reporting progress every 10%
    pub async fn insert_or_update(&self, columns: &[&str], rows: &[Row]) -> Result<u64> {
        let (affected, processed) = self.upsert_rows(columns, rows).await?;
        tracing::info!("\tSuccessful processed {} records!", processed);
        Ok(affected)
    }

    /// Affected and processed row counts; fast debug stops after
    /// `max_fast_debug` rows
    async fn upsert_rows(&self, columns: &[&str], rows: &[Row]) -> Result<(u64, u64)> {
        let mut bar = ProgressBar::new(
            "[INSERT or UPDATE] it is processed",
            rows.len() as u64,
            10,
            false,
        );
        let cap = if self.db.fast_debug() {
            self.db.limits().max_fast_debug.max(1)
        } else {
            usize::MAX
        };

        let mut affected = 0;
        for row in rows.iter().take(cap) {
            affected += self.db.execute(&sql::upsert(&self.table, columns, row)).await?;
            bar.increment();
        }

        Ok((affected, bar.counter()))
    }

    pub async fn insert_and_get_last_id(&self, columns: &[&str], values: &[Value]) -> Result<u64> {
        self.db
            .execute_returning_id(&sql::insert_values(&self.table, columns, values))
            .await
    }

    pub async fn insert_one(&self, columns: &[&str], values: &[Value]) -> Result<u64> {
        self.db
            .execute(&sql::insert_values(&self.table, columns, values))
            .await
    }

    /// Select rows; paged through the whole result unless the filter
    /// carries an offset or limit
    pub async fn select_data(&self, columns: &[&str], filter: &Filter) -> Result<Vec<MySqlRow>> {
        let template = sql::select(
            columns,
            &self.table,
            filter.condition.as_deref(),
            filter.order_by.as_deref(),
        );

        match filter.window() {
            Some((offset, limit)) => self.db.fetch_all(&sql::paged(&template, offset, limit)).await,
            None => self.db.fetch_all_paged(&template).await,
        }
    }
}

#[async_trait]
impl Database for MySqlTable {
    async fn connect(&mut self) -> Result<()> {
        self.db.connect().await
    }

    async fn cleanup(&mut self) {
        self.db.cleanup().await
    }

    fn db_info(&self) -> String {
        format!("{} `{}`", self.db.db_info(), self.table)
    }

    fn is_connected(&self) -> bool {
        self.db.is_connected()
    }
}
