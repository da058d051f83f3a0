//! Postgres transport via pgmq.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.delete, pgmq.set_vt, pgmq.metrics. The visibility timeout passed to
//! pgmq.read is the lease; set_vt implements both touch (lease from now) and
//! release (visible after delay).

use super::{Delivery, DeliveryTag, PutOptions, QueueStats, Transport, TransportError};
use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// pgmq's queue name limit (the underlying table name carries a prefix).
const MAX_QUEUE_NAME_LEN: usize = 47;

#[derive(Debug, Clone)]
pub struct PgmqConfig {
    pub database_url: SecretString,
    pub queue: String,
    pub max_connections: u32,
}

impl PgmqConfig {
    pub fn new(database_url: SecretString, queue: impl Into<String>) -> Self {
        Self {
            database_url,
            queue: queue.into(),
            max_connections: 10,
        }
    }
}

pub struct PgmqTransport {
    config: PgmqConfig,
    /// SQL for the visible-row count; built once since the queue table name
    /// cannot be bound as a parameter.
    visible_sql: String,
    pool: Option<PgPool>,
}

impl PgmqTransport {
    /// Build a transport bound to the configured queue.
    ///
    /// Fails with [`Error::InvalidArgument`] if the queue name is not a
    /// valid pgmq identifier.
    pub fn new(config: PgmqConfig) -> Result<Self> {
        validate_queue_name(&config.queue)?;
        let visible_sql = format!(
            "SELECT count(*) FROM pgmq.q_{} WHERE vt <= clock_timestamp()",
            config.queue
        );
        Ok(Self {
            config,
            visible_sql,
            pool: None,
        })
    }

    fn pool(&self) -> std::result::Result<&PgPool, TransportError> {
        self.pool
            .as_ref()
            .ok_or_else(|| TransportError::Disconnected("not connected".to_owned()))
    }
}

impl Transport for PgmqTransport {
    async fn connect(&mut self) -> std::result::Result<(), TransportError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(self.config.database_url.expose_secret())
            .await
            .map_err(map_sqlx)?;
        // Idempotent: creates the queue tables on first use.
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.config.queue)
            .execute(&pool)
            .await
            .map_err(map_sqlx)?;
        self.pool = Some(pool);
        Ok(())
    }

    async fn reconnect(&mut self) -> std::result::Result<(), TransportError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.connect().await
    }

    fn queue_name(&self) -> &str {
        &self.config.queue
    }

    /// pgmq.read returns immediately; the client polls.
    fn max_wait(&self) -> Option<Duration> {
        None
    }

    async fn put(
        &mut self,
        body: &str,
        opts: &PutOptions,
    ) -> std::result::Result<(), TransportError> {
        // lease_duration and priority are ignored: pgmq fixes visibility at
        // read time and has no priorities.
        let _: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2::jsonb, $3)")
            .bind(&self.config.queue)
            .bind(body)
            .bind(opts.delay.as_secs() as i32)
            .fetch_one(self.pool()?)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn reserve(
        &mut self,
        _wait: Duration,
        lease: Duration,
    ) -> std::result::Result<Option<Delivery>, TransportError> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)")
        .bind(&self.config.queue)
        .bind(lease.as_secs() as i32)
        .fetch_optional(self.pool()?)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(|(msg_id, read_ct, _enqueued_at, vt, message)| Delivery {
            tag: DeliveryTag(msg_id.to_string()),
            body: message.to_string(),
            deadline: Some(vt),
            delivery_count: read_ct.max(0) as u32,
        }))
    }

    async fn delete(&mut self, tag: &DeliveryTag) -> std::result::Result<(), TransportError> {
        let msg_id = parse_tag(tag)?;
        let row: (bool,) = sqlx::query_as("SELECT pgmq.delete($1, $2)")
            .bind(&self.config.queue)
            .bind(msg_id)
            .fetch_one(self.pool()?)
            .await
            .map_err(map_sqlx)?;
        if !row.0 {
            return Err(TransportError::Failed(format!(
                "message {msg_id} not found in queue {}",
                self.config.queue
            )));
        }
        Ok(())
    }

    async fn touch(
        &mut self,
        tag: &DeliveryTag,
        lease: Duration,
    ) -> std::result::Result<(), TransportError> {
        self.set_vt(tag, lease).await
    }

    async fn release(
        &mut self,
        tag: &DeliveryTag,
        delay: Duration,
        _priority: u32,
    ) -> std::result::Result<(), TransportError> {
        self.set_vt(tag, delay).await
    }

    async fn stats(&mut self) -> std::result::Result<QueueStats, TransportError> {
        let pool = self.pool()?;
        let (total,): (i64,) = sqlx::query_as("SELECT queue_length FROM pgmq.metrics($1)")
            .bind(&self.config.queue)
            .fetch_one(pool)
            .await
            .map_err(map_sqlx)?;
        let (visible,): (i64,) = sqlx::query_as(&self.visible_sql)
            .fetch_one(pool)
            .await
            .map_err(map_sqlx)?;
        // pgmq does not distinguish reserved from delayed; everything
        // invisible is reported as reserved.
        Ok(QueueStats {
            ready: visible.max(0) as u64,
            reserved: Some((total - visible).max(0) as u64),
            delayed: None,
        })
    }
}

impl PgmqTransport {
    /// Set the visibility timeout of a leased message to `vt` from now.
    async fn set_vt(
        &mut self,
        tag: &DeliveryTag,
        vt: Duration,
    ) -> std::result::Result<(), TransportError> {
        let msg_id = parse_tag(tag)?;
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(&self.config.queue)
            .bind(msg_id)
            .bind(vt.as_secs() as i32)
            .fetch_optional(self.pool()?)
            .await
            .map_err(map_sqlx)?;
        if row.is_none() {
            return Err(TransportError::Failed(format!(
                "message {msg_id} not found in queue {}",
                self.config.queue
            )));
        }
        Ok(())
    }
}

fn validate_queue_name(queue: &str) -> Result<()> {
    let valid = !queue.is_empty()
        && queue.len() <= MAX_QUEUE_NAME_LEN
        && queue.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && queue.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::InvalidArgument(format!(
            "queue name {queue:?} is not a valid pgmq identifier"
        )));
    }
    Ok(())
}

fn parse_tag(tag: &DeliveryTag) -> std::result::Result<i64, TransportError> {
    tag.0
        .parse::<i64>()
        .map_err(|_| TransportError::Failed(format!("malformed delivery tag {tag}")))
}

fn map_sqlx(err: sqlx::Error) -> TransportError {
    match err {
        sqlx::Error::Io(io) => TransportError::Disconnected(io.to_string()),
        sqlx::Error::PoolTimedOut => {
            TransportError::Disconnected("connection pool timed out".to_owned())
        }
        sqlx::Error::PoolClosed => TransportError::Disconnected("connection pool closed".to_owned()),
        other => TransportError::Backend(other.to_string()),
    }
}
