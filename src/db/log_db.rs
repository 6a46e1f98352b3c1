//! Daily log tables
//!
//! Logs live in 365 tables `log_0` .. `log_365`, one per day of the year,
//! shared by several log types. The fourth column holds a JSON payload
//! with at least `crc` (user id) and `time`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value as Json};
use sqlx::Row;

use super::{Database, MySqlDb};
use crate::error::{Error, Result};
use crate::logger::{paint, palette};

/// One parsed log payload
pub type LogRecord = Map<String, Json>;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATA_COLUMN: usize = 3;

/// Reader for one log type
#[derive(Debug, Clone)]
pub struct LogDb {
    db: MySqlDb,
    log_type: i64,
    date: NaiveDateTime,
}

impl LogDb {
    /// `date` picks the table; defaults to now
    pub fn new(db: MySqlDb, log_type: i64, date: Option<NaiveDateTime>) -> Self {
        Self {
            db,
            log_type,
            date: date.unwrap_or_else(|| Local::now().naive_local()),
        }
    }

    pub fn db(&self) -> &MySqlDb {
        &self.db
    }

    /// Table index for the configured date
    pub fn day(&self) -> u32 {
        self.date.ordinal0()
    }

    pub fn table(&self) -> String {
        format!("log_{}", self.day())
    }

    pub async fn count(&self, condition: Option<&str>) -> Result<u64> {
        self.count_in(self.day(), condition).await
    }

    async fn count_in(&self, day: u32, condition: Option<&str>) -> Result<u64> {
        tracing::info!("Try Select COUNT(1) for table log_{}", day);
        let sql = match condition {
            Some(cond) => format!(
                "SELECT COUNT(1) FROM log_{} WHERE type={} AND {} LIMIT 1;",
                day, self.log_type, cond
            ),
            None => format!(
                "SELECT COUNT(1) FROM log_{} WHERE type={} LIMIT 1;",
                day, self.log_type
            ),
        };
        Ok(self.db.fetch_count(&sql).await?.max(0) as u64)
    }

    /// Parsed payloads of the configured day. Records without `crc` are
    /// dropped, `time` becomes a unix timestamp.
    pub async fn log_data(
        &self,
        condition: Option<&str>,
        order_by: Option<&str>,
        ignore_zero_crc: bool,
    ) -> Result<Vec<LogRecord>> {
        self.log_data_in(self.day(), condition, order_by, ignore_zero_crc)
            .await
    }

    async fn log_data_in(
        &self,
        day: u32,
        condition: Option<&str>,
        order_by: Option<&str>,
        ignore_zero_crc: bool,
    ) -> Result<Vec<LogRecord>> {
        let condition = effective_condition(condition, ignore_zero_crc);
        let mut template = format!("SELECT * FROM log_{} WHERE type={}", day, self.log_type);
        if let Some(cond) = &condition {
            template.push_str(" AND ");
            template.push_str(cond);
        }
        if let Some(order) = order_by {
            template.push_str(" ORDER BY ");
            template.push_str(order);
        }

        let estimated = self.count_in(day, condition.as_deref()).await?;
        tracing::info!("Estimated cnt record for this select query: {}", estimated);
        tracing::info!(
            "{} data from {} {}",
            paint("SELECT", palette::SQL),
            paint(&format!("log_{}", day), palette::TABLE),
            paint(&self.db.db_info(), palette::TARGET)
        );

        let rows = self.db.fetch_all_paged(&template).await?;
        let payloads = rows
            .iter()
            .map(|row| row.try_get::<String, _>(DATA_COLUMN))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::sql_query(&self.db.db_info(), &template, None, e))?;

        parse_payloads(payloads)
    }

    /// Records from the last `minutes` whole minutes
    pub async fn log_last_minutes(
        &self,
        minutes: i64,
        condition: Option<&str>,
        order_by: Option<&str>,
        ignore_zero_crc: bool,
    ) -> Result<Vec<LogRecord>> {
        let (day, window) = minutes_window(self.date, minutes);
        let condition = join_condition(condition, &window);
        self.log_data_in(day, Some(&condition), order_by, ignore_zero_crc)
            .await
    }

    /// Records from the whole clock hour `hours` ago
    pub async fn log_last_hour(
        &self,
        hours: i64,
        condition: Option<&str>,
        order_by: Option<&str>,
        ignore_zero_crc: bool,
    ) -> Result<Vec<LogRecord>> {
        let (day, window) = hour_window(self.date, hours);
        let condition = join_condition(condition, &window);
        self.log_data_in(day, Some(&condition), order_by, ignore_zero_crc)
            .await
    }
}

#[async_trait]
impl Database for LogDb {
    async fn connect(&mut self) -> Result<()> {
        self.db.connect().await
    }

    async fn cleanup(&mut self) {
        self.db.cleanup().await
    }

    fn db_info(&self) -> String {
        self.db.db_info()
    }

    fn is_connected(&self) -> bool {
        self.db.is_connected()
    }
}

/// Group records by their `crc`
pub fn group_by_crc(records: Vec<LogRecord>) -> HashMap<String, Vec<LogRecord>> {
    let mut groups: HashMap<String, Vec<LogRecord>> = HashMap::new();
    for record in records {
        let key = match record.get("crc") {
            Some(Json::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => continue,
        };
        groups.entry(key).or_default().push(record);
    }
    groups
}

fn effective_condition(condition: Option<&str>, ignore_zero_crc: bool) -> Option<String> {
    match (condition, ignore_zero_crc) {
        (Some(cond), true) => Some(format!("{} AND crc!=0", cond)),
        (Some(cond), false) => Some(cond.to_string()),
        (None, true) => Some("crc!=0".to_string()),
        (None, false) => None,
    }
}

fn join_condition(condition: Option<&str>, window: &str) -> String {
    match condition {
        Some(cond) => format!("{} AND {}", cond, window),
        None => window.to_string(),
    }
}

/// Table day and condition for `[now - minutes, now)` truncated to minutes.
/// A window crossing midnight only reads the earlier day's table.
fn minutes_window(now: NaiveDateTime, minutes: i64) -> (u32, String) {
    let from = now - Duration::minutes(minutes);
    (
        from.ordinal0(),
        format!(
            "time >= '{}' AND time < '{}'",
            from.format("%Y-%m-%d %H:%M:00"),
            now.format("%Y-%m-%d %H:%M:00")
        ),
    )
}

/// Table day and condition for the clock hour `hours` before `now`
fn hour_window(now: NaiveDateTime, hours: i64) -> (u32, String) {
    let at = now - Duration::hours(hours);
    (
        at.ordinal0(),
        format!(
            "time >= '{}' AND time <= '{}'",
            at.format("%Y-%m-%d %H:00:00"),
            at.format("%Y-%m-%d %H:59:59")
        ),
    )
}

fn parse_payloads(payloads: Vec<String>) -> Result<Vec<LogRecord>> {
    let mut records = Vec::with_capacity(payloads.len());

    for payload in payloads {
        let mut record = match serde_json::from_str::<Json>(&payload)? {
            Json::Object(map) => map,
            other => {
                return Err(Error::Json(serde::de::Error::custom(format!(
                    "log payload is not an object: {}",
                    other
                ))))
            }
        };
        if !record.contains_key("crc") {
            continue;
        }

        if let Some(Json::String(time)) = record.get("time") {
            let ts = local_timestamp(NaiveDateTime::parse_from_str(time, TIME_FORMAT)?);
            record.insert("time".to_string(), Json::from(ts));
        }
        records.push(record);
    }

    Ok(records)
}

fn local_timestamp(naive: NaiveDateTime) -> i64 {
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp(),
        None => Utc.from_utc_datetime(&naive).timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 17)
            .unwrap()
    }

    #[test]
    fn test_table_follows_day_of_year() {
        let db = MySqlDb::new_mock(DatabaseConfig::default());
        assert_eq!(LogDb::new(db.clone(), 4, Some(at(2024, 1, 1, 0, 0))).table(), "log_0");
        assert_eq!(LogDb::new(db, 4, Some(at(2024, 2, 3, 0, 0))).day(), 33);
    }

    #[test]
    fn test_effective_condition() {
        assert_eq!(effective_condition(None, false), None);
        assert_eq!(effective_condition(None, true).as_deref(), Some("crc!=0"));
        assert_eq!(effective_condition(Some("x=1"), true).as_deref(), Some("x=1 AND crc!=0"));
        assert_eq!(effective_condition(Some("x=1"), false).as_deref(), Some("x=1"));
    }

    #[test]
    fn test_windows() {
        let (day, cond) = minutes_window(at(2024, 3, 10, 12, 30), 15);
        assert_eq!(day, 69);
        assert_eq!(cond, "time >= '2024-03-10 12:15:00' AND time < '2024-03-10 12:30:00'");

        let (day, cond) = minutes_window(at(2024, 3, 10, 0, 5), 10);
        assert_eq!(day, 68);
        assert!(cond.starts_with("time >= '2024-03-09 23:55:00'"));

        let (_, cond) = hour_window(at(2024, 3, 10, 12, 30), 1);
        assert_eq!(cond, "time >= '2024-03-10 11:00:00' AND time <= '2024-03-10 11:59:59'");
    }

    #[test]
    fn test_parse_payloads() {
        let payloads = vec![
            r#"{"crc": 42, "time": "2024-03-10 12:00:00", "event": "click"}"#.to_string(),
            r#"{"time": "2024-03-10 12:00:01"}"#.to_string(),
            r#"{"crc": "7", "event": "view"}"#.to_string(),
        ];
        let records = parse_payloads(payloads).unwrap();
        assert_eq!(records.len(), 2);

        let noon = NaiveDateTime::parse_from_str("2024-03-10 12:00:00", TIME_FORMAT).unwrap();
        let expected = local_timestamp(noon);
        assert_eq!(records[0]["time"], Json::from(expected));
        assert_eq!(records[1]["event"], "view");

        let groups = group_by_crc(records);
        assert_eq!(groups["42"].len(), 1);
        assert_eq!(groups["7"].len(), 1);
    }

    #[test]
    fn test_parse_payloads_rejects_garbage() {
        assert!(matches!(parse_payloads(vec!["{oops".into()]), Err(Error::Json(_))));
        assert!(matches!(
            parse_payloads(vec![r#"{"crc": 1, "time": "noon"}"#.into()]),
            Err(Error::DateParse(_))
        ));
        assert!(matches!(parse_payloads(vec!["[1, 2]".into()]), Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_mock_log_reads() {
        let log = LogDb::new(
            MySqlDb::new_mock(DatabaseConfig::default()),
            3,
            Some(at(2024, 3, 10, 12, 30)),
        );
        assert_eq!(log.count(None).await.unwrap(), 0);
        assert!(log.log_data(Some("ip != ''"), Some("time"), true).await.unwrap().is_empty());
        assert!(log.log_last_minutes(5, None, None, true).await.unwrap().is_empty());
        assert!(log.log_last_hour(1, None, None, false).await.unwrap().is_empty());
    }
}
