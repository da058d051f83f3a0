//! Transport capability interface.
//!
//! A transport binds one session to one named queue and exposes the minimal
//! operation set the client needs: put, reserve, delete, touch, release,
//! stats. The client is generic over this trait; each backend gets a variant
//! implementation rather than its own client type.

pub mod memory;
pub mod pgmq;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Priority given to enqueued and released messages when the caller does not
/// specify one. Lower values are delivered first on transports that order by
/// priority; transports without priorities ignore it.
pub const DEFAULT_PRIORITY: u32 = 2_147_483_648;

/// Backend-assigned identifier for one delivery of one message, used to
/// acknowledge, touch, or release it. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeliveryTag(pub String);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message handed out by [`Transport::reserve`].
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Raw serialized body as stored by the backend.
    pub body: String,
    /// Approximate moment the lease lapses and the message becomes
    /// redeliverable. Not every backend reports it.
    pub deadline: Option<DateTime<Utc>>,
    /// How many times the backend has handed this message out, where known.
    pub delivery_count: u32,
}

/// Enqueue parameters forwarded to the backend.
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Seconds-granularity delay before the message becomes visible.
    pub delay: Duration,
    /// Lease duration hint for backends that fix it at enqueue time.
    pub lease_duration: Duration,
    pub priority: u32,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            lease_duration: Duration::from_secs(3600),
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Backend-reported message counts. `ready` is always available; the rest
/// only on backends that expose them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub ready: u64,
    pub reserved: Option<u64>,
    pub delayed: Option<u64>,
}

impl QueueStats {
    /// Ready plus reserved plus delayed, where exposed.
    pub fn total(&self) -> u64 {
        self.ready + self.reserved.unwrap_or(0) + self.delayed.unwrap_or(0)
    }
}

/// Transport-level failure, classified for the retry loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session to the backend was severed. Retried after a full
    /// reconnect.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// I/O failure that did not sever the session. Retried in place.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Transient backend-side failure. Retried in place.
    #[error("backend error: {0}")]
    Backend(String),

    /// Permanent command failure (e.g. unknown delivery tag). Never retried.
    #[error("command failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Whether the failure looks like a severed connection and warrants a
    /// reconnect before the next attempt.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }

    /// Whether another attempt can succeed at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Failed(_))
    }
}

/// Minimal capability interface any queue backend must satisfy.
///
/// A transport instance is bound to one named queue for its whole life.
/// Methods take `&mut self`: the owning client is single-threaded and
/// reconnects mutate the session.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Establish the session bound to the named queue.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Tear down and re-establish the session (re-authenticate, re-watch
    /// the queue).
    async fn reconnect(&mut self) -> Result<(), TransportError>;

    /// Name of the queue this transport is bound to.
    fn queue_name(&self) -> &str;

    /// `Some(max)` if the backend can natively wait up to `max` for a
    /// message inside [`reserve`](Self::reserve); `None` if it only supports
    /// single non-blocking attempts and the client must poll.
    fn max_wait(&self) -> Option<Duration>;

    /// Enqueue one serialized message.
    async fn put(&mut self, body: &str, opts: &PutOptions) -> Result<(), TransportError>;

    /// Attempt to lease one message for `lease`. Waits up to `wait` on
    /// native-wait backends; poll-based backends attempt once and return.
    /// `Ok(None)` means nothing was available.
    async fn reserve(
        &mut self,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<Delivery>, TransportError>;

    /// Acknowledge: remove the leased message permanently.
    async fn delete(&mut self, tag: &DeliveryTag) -> Result<(), TransportError>;

    /// Extend the visibility deadline of a leased message to `lease` from
    /// now.
    async fn touch(&mut self, tag: &DeliveryTag, lease: Duration) -> Result<(), TransportError>;

    /// Return a leased message to the ready state after `delay`.
    async fn release(
        &mut self,
        tag: &DeliveryTag,
        delay: Duration,
        priority: u32,
    ) -> Result<(), TransportError>;

    /// Current message counts for the bound queue.
    async fn stats(&mut self) -> Result<QueueStats, TransportError>;
}

/// Visibility deadline `lease` from now, when representable.
pub(crate) fn deadline_after(lease: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(lease).ok().map(|d| Utc::now() + d)
}
