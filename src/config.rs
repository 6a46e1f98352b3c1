//! SLL Configuration
//!
//! Library-wide settings loaded from TOML, plus the connection parameter
//! structures shared by the database and cache wrappers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main SLL configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SllConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Email notification configuration (disabled when absent)
    #[serde(default)]
    pub email: Option<EmailConfig>,

    /// Lock file configuration
    #[serde(default)]
    pub locker: LockerConfig,

    /// Database wrapper tuning
    #[serde(default)]
    pub database: DbLimits,

    /// Redis wrapper tuning
    #[serde(default)]
    pub redis: RedisTuning,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Colorize messages with ANSI escapes
    #[serde(default = "default_true")]
    pub colored: bool,

    /// Emit debug messages from the library (SQL timings, HTTP requests)
    #[serde(default = "default_true")]
    pub debug_info: bool,

    /// Exit the process when a critical error is reported
    #[serde(default = "default_true")]
    pub terminate_on_critical: bool,
}

/// SMTP notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP server host (SMTPS, implicit TLS)
    #[serde(default)]
    pub smtp_server: String,

    /// SMTP server port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Sender address, also used as login
    pub email: String,

    /// Recipient addresses
    pub dest_email: Vec<String>,

    /// SMTP password
    #[serde(default)]
    pub password: String,

    /// Subject line for notifications
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Send through the local relay without TLS or login
    #[serde(default)]
    pub simple: bool,
}

/// Lock file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockerConfig {
    /// Directory for `<script>.lock` files
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// Age after which a lock file is considered stale, in seconds
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,
}

/// Database wrapper tuning: retry policy and pagination limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbLimits {
    /// Maximum number of connect attempts
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: usize,

    /// Pause between connect attempts in seconds
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout_secs: u64,

    /// Rows processed per query in fast debug mode
    #[serde(default = "default_max_fast_debug")]
    pub max_fast_debug: usize,

    /// Rows removed by a single DELETE
    #[serde(default = "default_max_delete_rows")]
    pub max_delete_rows: usize,

    /// Rows sent in one batched statement
    #[serde(default = "default_max_execute_many")]
    pub max_execute_many: usize,

    /// Rows fetched by a single paged SELECT
    #[serde(default = "default_max_fetch_all")]
    pub max_fetch_all: usize,

    /// Rows of bound data shown when logging a query
    #[serde(default = "default_max_log_rows")]
    pub max_log_rows: usize,
}

/// Redis wrapper tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisTuning {
    /// PING attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub connect_attempts: usize,

    /// Pause between PING attempts in milliseconds
    #[serde(default = "default_redis_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DatabaseConfig {
    /// Server host
    pub host: String,

    /// Server port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database name (optional - server-level connection when empty)
    #[serde(default)]
    pub database: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RedisConfig {
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    #[serde(default)]
    pub password: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    465
}

fn default_subject() -> String {
    "Analytics Scripts".to_string()
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_lock_ttl() -> u64 {
    3600
}

fn default_reconnect_attempts() -> usize {
    10
}

fn default_reconnect_timeout() -> u64 {
    10
}

fn default_max_fast_debug() -> usize {
    5000
}

fn default_max_delete_rows() -> usize {
    10000
}

fn default_max_execute_many() -> usize {
    25000
}

fn default_max_fetch_all() -> usize {
    100000
}

fn default_max_log_rows() -> usize {
    10
}

fn default_redis_retry_delay_ms() -> u64 {
    100
}

pub(crate) fn default_db_port() -> u16 {
    3306
}

pub(crate) fn default_pg_port() -> u16 {
    5432
}

pub(crate) fn default_redis_port() -> u16 {
    6379
}

pub(crate) fn default_pool_size() -> u32 {
    4
}

pub(crate) fn default_connect_timeout() -> u64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            colored: true,
            debug_info: true,
            terminate_on_critical: true,
        }
    }
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            ttl_secs: default_lock_ttl(),
        }
    }
}

impl Default for DbLimits {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_timeout_secs: default_reconnect_timeout(),
            max_fast_debug: default_max_fast_debug(),
            max_delete_rows: default_max_delete_rows(),
            max_execute_many: default_max_execute_many(),
            max_fetch_all: default_max_fetch_all(),
            max_log_rows: default_max_log_rows(),
        }
    }
}

impl Default for RedisTuning {
    fn default() -> Self {
        Self {
            connect_attempts: default_reconnect_attempts(),
            retry_delay_ms: default_redis_retry_delay_ms(),
        }
    }
}

impl DbLimits {
    /// Pause between connect attempts as Duration
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    /// Page size for SELECT pagination
    pub fn fetch_limit(&self, fast_debug: bool) -> usize {
        if fast_debug {
            self.max_fast_debug
        } else {
            self.max_fetch_all
        }
    }

    /// Batch size for DELETE pagination
    pub fn delete_limit(&self, fast_debug: bool) -> usize {
        if fast_debug {
            self.max_fast_debug
        } else {
            self.max_delete_rows
        }
    }
}

impl LockerConfig {
    /// Lock TTL as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl DatabaseConfig {
    /// Build a connection URL for the given scheme (`mysql`, `postgres`)
    pub fn url(&self, scheme: &str) -> String {
        match &self.database {
            Some(db) => format!(
                "{}://{}:{}@{}:{}/{}",
                scheme, self.user, self.password, self.host, self.port, db
            ),
            None => format!(
                "{}://{}:{}@{}:{}",
                scheme, self.user, self.password, self.host, self.port
            ),
        }
    }

    /// Short human-readable description, `host:port/db`
    pub fn info(&self) -> String {
        format!(
            "{}:{}/{}",
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("")
        )
    }

    /// Copy of this config pointing at another database
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: Some(database.to_string()),
            ..self.clone()
        }
    }
}

impl RedisConfig {
    /// Build a `redis://` connection URL
    pub fn url(&self) -> String {
        match self.password.as_deref() {
            Some(pass) if !pass.is_empty() => {
                format!("redis://:{}@{}:{}/{}", pass, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Short human-readable description, `host:port db:N`
    pub fn info(&self) -> String {
        format!("{}:{} db:{}", self.host, self.port, self.db)
    }
}

impl SllConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: SllConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.reconnect_attempts == 0 {
            return Err(crate::Error::Config(
                "database.reconnect_attempts must be at least 1".into(),
            ));
        }

        for (name, value) in [
            ("max_fast_debug", self.database.max_fast_debug),
            ("max_delete_rows", self.database.max_delete_rows),
            ("max_execute_many", self.database.max_execute_many),
            ("max_fetch_all", self.database.max_fetch_all),
        ] {
            if value == 0 {
                return Err(crate::Error::Config(format!(
                    "database.{} must be greater than zero",
                    name
                )));
            }
        }

        if let Some(email) = &self.email {
            if email.email.is_empty() || email.dest_email.is_empty() {
                return Err(crate::Error::Config(
                    "email.email and email.dest_email cannot be empty".into(),
                ));
            }
            if !email.simple && email.smtp_server.is_empty() {
                return Err(crate::Error::Config(
                    "email.smtp_server cannot be empty unless email.simple is set".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"
colored = false

[email]
smtp_server = "smtp.example.com"
email = "robot@example.com"
dest_email = ["ops@example.com"]
password = "secret"

[locker]
lock_dir = "/var/run/scripts"
ttl_secs = 600

[database]
reconnect_attempts = 3
max_fetch_all = 500
"#;

        let config = SllConfig::from_str(toml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.colored);
        assert!(config.logging.terminate_on_critical);
        assert_eq!(config.email.as_ref().unwrap().port, 465);
        assert_eq!(config.locker.ttl(), Duration::from_secs(600));
        assert_eq!(config.database.reconnect_attempts, 3);
        assert_eq!(config.database.fetch_limit(false), 500);
        assert_eq!(config.database.fetch_limit(true), 5000);
        assert_eq!(config.database.delete_limit(false), 10000);
        assert_eq!(config.redis.connect_attempts, 10);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SllConfig::from_str("").unwrap();
        assert!(config.email.is_none());
        assert_eq!(config.locker.lock_dir, PathBuf::from("/tmp"));
        assert_eq!(config.database.max_execute_many, 25000);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let err = SllConfig::from_str("[database]\nmax_delete_rows = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_delete_rows"));
    }

    #[test]
    fn test_validate_rejects_email_without_server() {
        let toml = r#"
[email]
email = "robot@example.com"
dest_email = ["ops@example.com"]
"#;
        assert!(SllConfig::from_str(toml).is_err());

        let simple = format!("{}simple = true\n", toml);
        assert!(SllConfig::from_str(&simple).is_ok());
    }

    #[test]
    fn test_database_urls() {
        let config = DatabaseConfig {
            host: "10.0.0.5".into(),
            port: 3306,
            user: "stat".into(),
            password: "pw".into(),
            database: None,
            pool_size: 4,
            connect_timeout_secs: 30,
        };
        assert_eq!(config.url("mysql"), "mysql://stat:pw@10.0.0.5:3306");
        assert_eq!(config.info(), "10.0.0.5:3306/");

        let with_db = config.with_database("analytics");
        assert_eq!(with_db.url("mysql"), "mysql://stat:pw@10.0.0.5:3306/analytics");
        assert_eq!(with_db.info(), "10.0.0.5:3306/analytics");
    }

    #[test]
    fn test_redis_urls() {
        let mut config = RedisConfig {
            host: "cache".into(),
            port: 6379,
            db: 2,
            password: None,
        };
        assert_eq!(config.url(), "redis://cache:6379/2");
        assert_eq!(config.info(), "cache:6379 db:2");

        config.password = Some("pw".into());
        assert_eq!(config.url(), "redis://:pw@cache:6379/2");
    }
}
