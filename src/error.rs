//! SLL Error Types

use thiserror::Error;

/// Result type alias for SLL operations
pub type Result<T> = std::result::Result<T, Error>;

/// SLL error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid host config XML: {0}")]
    Xml(#[from] roxmltree::Error),

    // Locker errors
    #[error("Locker! {0}")]
    Locker(String),

    // Script errors
    #[error("Script! {0}")]
    Script(String),

    // Database errors
    #[error("DB! {0}")]
    Database(#[from] sqlx::Error),

    #[error("DB! Can't connect to {db_info} after {attempts} attempts: {reason}")]
    DbConnect {
        db_info: String,
        attempts: usize,
        reason: String,
    },

    #[error("Problem with SQL query.\nDescription:\n\t{message}\nDB info:\n\t{db_info}\nSQL:\n\t{sql}\nSQL Args:\n\t{args}")]
    SqlQuery {
        db_info: String,
        sql: String,
        args: String,
        message: String,
    },

    // Demultiplexor errors
    #[error("Demultiplexor! {0}")]
    Demultiplexor(String),

    #[error("Demultiplexor! {0}")]
    DemultiplexorCritical(String),

    // Cache errors
    #[error("Redis error on {info}: {reason}")]
    Redis { info: String, reason: String },

    // Notification errors
    #[error("EmailSender! {0}")]
    Email(String),

    // Cipher errors
    #[error("Crypto! {0}")]
    Crypto(String),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    DateParse(#[from] chrono::ParseError),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a query error for the given database and statement
    pub fn sql_query(db_info: &str, sql: &str, args: Option<String>, cause: impl std::fmt::Display) -> Self {
        Error::SqlQuery {
            db_info: db_info.to_string(),
            sql: sql.to_string(),
            args: args.unwrap_or_else(|| "None".to_string()),
            message: cause.to_string(),
        }
    }

    /// Check if this error should stop the script
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::Locker(_)
                | Error::Script(_)
                | Error::Database(_)
                | Error::DbConnect { .. }
                | Error::DemultiplexorCritical(_)
        )
    }

    /// Process exit code used when a critical error terminates the script
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Locker(_) => 1,
            Error::Database(_) | Error::DbConnect { .. } => 2,
            Error::Script(_) => 3,
            Error::DemultiplexorCritical(_) => 4,
            _ => 1,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(e) => is_transient(e),
            Error::Redis { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Connection-level sqlx failures that may clear up on another attempt
pub(crate) fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
