//! Redis Wrapper

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::config::{RedisConfig, RedisTuning};
use crate::error::{Error, Result};
use crate::logger::{paint, palette};

/// Redis client with PING-verified connect
pub struct RedisClient {
    config: RedisConfig,
    attempts: usize,
    retry_delay: Duration,
    connection: Option<MultiplexedConnection>,
}

impl RedisClient {
    pub fn new(config: RedisConfig, attempts: usize) -> Self {
        Self {
            config,
            attempts: attempts.max(1),
            retry_delay: Duration::from_millis(100),
            connection: None,
        }
    }

    pub fn with_tuning(config: RedisConfig, tuning: &RedisTuning) -> Self {
        Self {
            retry_delay: Duration::from_millis(tuning.retry_delay_ms),
            ..Self::new(config, tuning.connect_attempts)
        }
    }

    /// `host:port db:N`
    pub fn info(&self) -> String {
        self.config.info()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect and PING; no-op when already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let info = self.info();
        let client = redis::Client::open(self.config.url()).map_err(|e| Error::Redis {
            info: info.clone(),
            reason: e.to_string(),
        })?;

        let strategy = FixedInterval::new(self.retry_delay).take(self.attempts - 1);
        let (client, info_ref) = (&client, info.as_str());
        let result = Retry::spawn(strategy, move || async move {
            let attempt = async {
                let mut con = client.get_multiplexed_async_connection().await?;
                redis::cmd("PING").query_async::<_, String>(&mut con).await?;
                Ok::<_, redis::RedisError>(con)
            };
            attempt.await.map_err(|e| {
                tracing::error!("Can't connect to redis {}. Ping() fail! {}", info_ref, e);
                e
            })
        })
        .await;

        match result {
            Ok(con) => {
                tracing::info!(
                    "[CONNECT] Connect to REDIS: {}. {}",
                    paint(&info, palette::TARGET),
                    paint("OPENED!", palette::OPENED)
                );
                self.connection = Some(con);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Can't connect to Redis server! {}", info);
                Err(Error::Redis {
                    info,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn cleanup(&mut self) {
        tracing::info!(
            "[CLEANUP] Connect to REDIS: {}. {}",
            paint(self.info(), palette::TARGET),
            paint("CLOSED!", palette::CLOSED)
        );
        self.connection = None;
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        self.cleanup();
        self.connect().await
    }

    /// Handle for issuing commands; cheap to clone
    pub fn connection(&self) -> Result<MultiplexedConnection> {
        self.connection.clone().ok_or_else(|| Error::Redis {
            info: self.info(),
            reason: "not connected".to_string(),
        })
    }

    fn redis_error(&self, e: redis::RedisError) -> Error {
        Error::Redis {
            info: self.info(),
            reason: e.to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| self.redis_error(e))
    }

    /// SET, with an expiry when `ttl` is given
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut con = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<_, ()>(&mut con)
            .await
            .map_err(|e| self.redis_error(e))
    }

    /// DEL, returning the number of removed keys
    pub async fn del(&self, key: &str) -> Result<u64> {
        let mut con = self.connection()?;
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(|e| self.redis_error(e))
    }
}
