//! Lease-based work queue client.
//!
//! One client instance handles one outstanding lease at a time; mutual
//! exclusion over message ownership is delegated to the backend's
//! visibility mechanism. Callers that want parallelism run one client per
//! worker, all bound to the same named queue.

mod availability;

use crate::codec::PayloadCodec;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_lease_outcome, start_lease_span};
use crate::transport::{
    DEFAULT_PRIORITY, Delivery, DeliveryTag, PutOptions, Transport, TransportError, deadline_after,
};
use availability::AvailabilityCache;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Client tuning. Passed explicitly to the constructor — there is no
/// ambient configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    /// Lease duration used when an operation does not specify one.
    pub default_lease: Duration,
    /// Minimum wait between attempts of a blocking dequeue.
    pub poll_interval: Duration,
    /// How long a confirmed-empty probe result is served from cache.
    pub availability_ttl: Duration,
    /// Ceiling on the encoded payload size.
    pub max_payload_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_lease: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(20),
            availability_ttl: Duration::from_secs(300),
            max_payload_bytes: 65_300,
        }
    }
}

/// Parameters for [`WorkQueueClient::enqueue_with`].
///
/// No backend offers a non-blocking or timed enqueue, so `block` and
/// `timeout` must keep their defaults; they exist so the invalid call shape
/// is rejected explicitly instead of silently reinterpreted.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub block: bool,
    pub timeout: Option<Duration>,
    /// Delay before the message becomes visible to consumers.
    pub delay: Duration,
    /// Lease duration hint for backends that fix it at enqueue time.
    pub lease_duration: Option<Duration>,
    pub priority: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            block: true,
            timeout: None,
            delay: Duration::ZERO,
            lease_duration: None,
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Parameters for [`WorkQueueClient::dequeue_with`].
///
/// Valid shapes: `block` with no timeout (wait indefinitely), `block` with a
/// timeout (bounded wait, zero meaning try-once), or non-blocking with no
/// timeout (single attempt). Anything else is an [`Error::InvalidArgument`].
#[derive(Debug, Clone)]
pub struct DequeueOptions {
    pub block: bool,
    pub timeout: Option<Duration>,
    pub lease_duration: Option<Duration>,
}

impl Default for DequeueOptions {
    fn default() -> Self {
        Self {
            block: true,
            timeout: None,
            lease_duration: None,
        }
    }
}

/// The in-flight claim on one dequeued message.
///
/// Valid until acknowledged, released, or past its deadline, after which
/// the backend requeues the message for another consumer.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    pub tag: DeliveryTag,
    /// Approximate visibility deadline, where the backend reports one.
    pub deadline: Option<DateTime<Utc>>,
    /// How many times the backend has delivered this message.
    pub delivery_count: u32,
    span: tracing::Span,
}

/// Uniform at-least-once work queue semantics over a pluggable transport.
pub struct WorkQueueClient<T: Transport> {
    transport: T,
    options: ClientOptions,
    codec: PayloadCodec,
    lease: Option<LeaseHandle>,
    availability: AvailabilityCache,
}

impl<T: Transport> WorkQueueClient<T> {
    /// Connect the transport and build a client, retrying per the policy.
    pub async fn connect(mut transport: T, options: ClientOptions) -> Result<Self> {
        let mut last_err: Option<TransportError> = None;
        for attempt in 0..options.retry.attempts {
            let connected = transport.connect().await;
            match connected {
                Ok(()) => {
                    info!(queue = transport.queue_name(), "connected");
                    return Ok(Self {
                        codec: PayloadCodec::new(options.max_payload_bytes),
                        availability: AvailabilityCache::new(options.availability_ttl),
                        lease: None,
                        transport,
                        options,
                    });
                }
                Err(err) => {
                    warn!(
                        queue = transport.queue_name(),
                        attempt,
                        error = %err,
                        "connect failed"
                    );
                    let delay = options.retry.delay(attempt);
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(Error::BackendUnavailable(match last_err {
            Some(err) => format!("cannot connect to queue {}: {err}", transport.queue_name()),
            None => format!(
                "cannot connect to queue {}: no attempts permitted",
                transport.queue_name()
            ),
        }))
    }

    /// Enqueue one payload with default options.
    pub async fn enqueue(&mut self, payload: &Value) -> Result<()> {
        self.enqueue_with(payload, EnqueueOptions::default()).await
    }

    /// Enqueue one payload. Only default blocking semantics are supported.
    pub async fn enqueue_with(&mut self, payload: &Value, opts: EnqueueOptions) -> Result<()> {
        if !opts.block || opts.timeout.is_some() {
            return Err(Error::InvalidArgument(
                "enqueue supports default blocking semantics only".to_owned(),
            ));
        }
        let body = self.codec.encode(payload)?;
        let put = PutOptions {
            delay: opts.delay,
            lease_duration: opts.lease_duration.unwrap_or(self.options.default_lease),
            priority: opts.priority,
        };
        // No retry wrapper here: a put that failed mid-flight may still have
        // landed, and replaying it would duplicate the message.
        self.transport.put(&body, &put).await?;
        // First-hand knowledge that the queue is non-empty.
        self.availability.clear();
        self.record_op("put");
        Ok(())
    }

    /// Dequeue one message, waiting indefinitely.
    pub async fn dequeue(&mut self) -> Result<Value> {
        self.dequeue_with(DequeueOptions::default()).await
    }

    /// Single non-blocking dequeue attempt. [`Error::Empty`] if nothing is
    /// available.
    pub async fn dequeue_nowait(&mut self) -> Result<Value> {
        self.dequeue_with(DequeueOptions {
            block: false,
            timeout: None,
            lease_duration: None,
        })
        .await
    }

    /// Dequeue one message and record its lease as the current lease.
    ///
    /// Fails fast with [`Error::LeaseAlreadyHeld`] while a previous lease is
    /// outstanding.
    pub async fn dequeue_with(&mut self, opts: DequeueOptions) -> Result<Value> {
        if self.lease.is_some() {
            return Err(Error::LeaseAlreadyHeld);
        }
        let lease = opts.lease_duration.unwrap_or(self.options.default_lease);
        let started = Instant::now();
        let delivery = match (opts.block, opts.timeout) {
            (true, None) => self.reserve_indefinitely(lease).await?,
            (true, Some(timeout)) => self
                .reserve_until(timeout, lease)
                .await?
                .ok_or(Error::Empty)?,
            (false, None) => self
                .reserve_once(Duration::ZERO, lease)
                .await?
                .ok_or(Error::Empty)?,
            (false, Some(_)) => {
                return Err(Error::InvalidArgument(
                    "non-blocking dequeue does not take a timeout".to_owned(),
                ));
            }
        };
        metrics::dequeue_wait_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new(
                "queue",
                self.transport.queue_name().to_string(),
            )],
        );
        self.accept(delivery)
    }

    /// Delete the currently leased message from the backend.
    ///
    /// Must be called exactly once per successful dequeue; an unacknowledged
    /// message is redelivered after its lease lapses. On transport failure
    /// the lease is retained so the caller can retry or release.
    pub async fn acknowledge(&mut self) -> Result<()> {
        let tag = self.held_tag()?;
        self.run_with_retry("delete", async |t: &mut T| t.delete(&tag).await)
            .await?;
        if let Some(lease) = self.lease.take() {
            record_lease_outcome(&lease.span, "acknowledged");
        }
        self.record_op("delete");
        Ok(())
    }

    /// Extend the current lease by the default lease duration. Idempotent.
    pub async fn extend_lease(&mut self) -> Result<()> {
        self.extend_lease_for(self.options.default_lease).await
    }

    /// Extend the current lease to `lease` from now. Idempotent.
    pub async fn extend_lease_for(&mut self, lease: Duration) -> Result<()> {
        let tag = self.held_tag()?;
        self.run_with_retry("touch", async |t: &mut T| t.touch(&tag, lease).await)
            .await?;
        if let Some(held) = self.lease.as_mut() {
            held.deadline = deadline_after(lease);
        }
        self.record_op("touch");
        Ok(())
    }

    /// Return the currently leased message to the ready state immediately.
    pub async fn release(&mut self) -> Result<()> {
        self.release_with(Duration::ZERO, DEFAULT_PRIORITY).await
    }

    /// Return the currently leased message to the ready state after `delay`.
    pub async fn release_with(&mut self, delay: Duration, priority: u32) -> Result<()> {
        let tag = self.held_tag()?;
        self.run_with_retry("release", async |t: &mut T| {
            t.release(&tag, delay, priority).await
        })
        .await?;
        if let Some(lease) = self.lease.take() {
            record_lease_outcome(&lease.span, "released");
        }
        self.record_op("release");
        Ok(())
    }

    /// Backend-reported message count: ready plus reserved plus delayed,
    /// where the backend exposes them. Best-effort.
    pub async fn approximate_size(&mut self) -> Result<u64> {
        let stats = self
            .run_with_retry("stats", async |t: &mut T| t.stats().await)
            .await?;
        Ok(stats.map(|s| s.total()).unwrap_or(0))
    }

    /// Whether the queue reports no messages at all.
    pub async fn is_empty(&mut self) -> Result<bool> {
        Ok(self.approximate_size().await? == 0)
    }

    /// Whether at least one message appears ready, suitable for autoscaler
    /// probes.
    ///
    /// A confirmed-empty result is cached for the configured TTL and served
    /// without a backend call; a positive result is never cached. Transport
    /// failures that outlive the retry budget are surfaced, not silently
    /// mapped to `false`.
    pub async fn has_available(&mut self) -> Result<bool> {
        if self.availability.is_cached_empty() {
            return Ok(false);
        }
        let stats = self
            .run_with_retry("stats", async |t: &mut T| t.stats().await)
            .await?;
        match stats {
            Some(stats) if stats.ready > 0 => Ok(true),
            Some(_) => {
                self.availability.note_empty();
                Ok(false)
            }
            // Retry budget spent without a recorded error: neutral result.
            None => Ok(false),
        }
    }

    /// Dequeue and acknowledge until the queue is empty. Returns the number
    /// of messages drained.
    pub async fn drain(&mut self) -> Result<u64> {
        let mut drained = 0;
        loop {
            match self.dequeue_nowait().await {
                Ok(_) => {
                    self.acknowledge().await?;
                    drained += 1;
                }
                Err(Error::Empty) => return Ok(drained),
                Err(err) => return Err(err),
            }
        }
    }

    /// The currently held lease, if any.
    pub fn current_lease(&self) -> Option<&LeaseHandle> {
        self.lease.as_ref()
    }

    async fn reserve_indefinitely(&mut self, lease: Duration) -> Result<Delivery> {
        let poll = self.options.poll_interval;
        loop {
            // Native-wait transports wait up to one poll interval per
            // attempt; poll-based ones try once and the client sleeps.
            let native = self.transport.max_wait().map(|max| poll.min(max));
            let reserved = self
                .reserve_once(native.unwrap_or(Duration::ZERO), lease)
                .await?;
            if let Some(delivery) = reserved {
                return Ok(delivery);
            }
            if native.is_none() {
                tokio::time::sleep(poll).await;
            }
        }
    }

    async fn reserve_until(
        &mut self,
        timeout: Duration,
        lease: Duration,
    ) -> Result<Option<Delivery>> {
        // Pass-through zero means try once.
        if timeout.is_zero() {
            return self.reserve_once(Duration::ZERO, lease).await;
        }
        match self.transport.max_wait() {
            Some(max) => {
                if timeout > max {
                    return Err(Error::InvalidArgument(format!(
                        "timeout {timeout:?} exceeds the backend's maximum wait {max:?}"
                    )));
                }
                self.reserve_once(timeout, lease).await
            }
            None => {
                // Poll-based backend: repeat non-blocking attempts until the
                // deadline lapses.
                let deadline = Instant::now() + timeout;
                loop {
                    let reserved = self.reserve_once(Duration::ZERO, lease).await?;
                    if reserved.is_some() {
                        return Ok(reserved);
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let nap = self.options.poll_interval.min(deadline - now);
                    tokio::time::sleep(nap).await;
                }
            }
        }
    }

    async fn reserve_once(&mut self, wait: Duration, lease: Duration) -> Result<Option<Delivery>> {
        let reserved = self
            .run_with_retry("reserve", async |t: &mut T| t.reserve(wait, lease).await)
            .await?;
        Ok(reserved.flatten())
    }

    fn accept(&mut self, delivery: Delivery) -> Result<Value> {
        let queue = self.transport.queue_name().to_string();
        let value = self.codec.decode(&delivery.body);
        let span = start_lease_span(&queue, &delivery.tag);
        self.record_op("reserve");
        self.lease = Some(LeaseHandle {
            tag: delivery.tag,
            deadline: delivery.deadline,
            delivery_count: delivery.delivery_count,
            span,
        });
        Ok(value)
    }

    fn held_tag(&self) -> Result<DeliveryTag> {
        self.lease
            .as_ref()
            .map(|lease| lease.tag.clone())
            .ok_or(Error::NoActiveLease)
    }

    /// Run one transport call under the shared retry policy.
    ///
    /// Severed connections trigger a full reconnect before the next attempt;
    /// permanent failures surface immediately. `Ok(None)` means the budget
    /// ran out without any error being recorded (a zero-attempt policy);
    /// callers fall back to their neutral value.
    async fn run_with_retry<R, F>(&mut self, operation: &'static str, mut op: F) -> Result<Option<R>>
    where
        F: AsyncFnMut(&mut T) -> std::result::Result<R, TransportError>,
    {
        let mut last_err: Option<TransportError> = None;
        for attempt in 0..self.options.retry.attempts {
            let outcome = op(&mut self.transport).await;
            match outcome {
                Ok(value) => return Ok(Some(value)),
                Err(err) if !err.is_retryable() => return Err(Error::Transport(err)),
                Err(err) => {
                    warn!(
                        queue = self.transport.queue_name(),
                        operation,
                        attempt,
                        error = %err,
                        "transport call failed, backing off"
                    );
                    metrics::transport_retries().add(1, &[KeyValue::new("operation", operation)]);
                    let severed = err.is_disconnect();
                    last_err = Some(err);
                    tokio::time::sleep(self.options.retry.delay(attempt)).await;
                    if severed {
                        self.reconnect().await?;
                    }
                }
            }
        }
        match last_err {
            Some(err) => Err(Error::Transport(err)),
            None => Ok(None),
        }
    }

    /// Re-establish the transport session, bounded by the retry policy.
    async fn reconnect(&mut self) -> Result<()> {
        metrics::transport_reconnects().add(
            1,
            &[KeyValue::new(
                "queue",
                self.transport.queue_name().to_string(),
            )],
        );
        for attempt in 0..self.options.retry.attempts {
            let outcome = self.transport.reconnect().await;
            match outcome {
                Ok(()) => {
                    info!(queue = self.transport.queue_name(), "reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        queue = self.transport.queue_name(),
                        attempt,
                        error = %err,
                        "reconnect failed"
                    );
                    tokio::time::sleep(self.options.retry.delay(attempt)).await;
                }
            }
        }
        Err(Error::BackendUnavailable(format!(
            "cannot reconnect to queue {}",
            self.transport.queue_name()
        )))
    }

    fn record_op(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.transport.queue_name().to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}
