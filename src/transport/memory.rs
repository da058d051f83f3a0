//! In-process transport.
//!
//! The local work-queue variant: one shared queue behind a mutex, with
//! delayed visibility, priority ordering, and lease deadlines that requeue
//! expired messages. Cloning a transport shares the underlying queue, so two
//! clients over clones behave like two workers on one backend queue.

use super::{
    DEFAULT_PRIORITY, Delivery, DeliveryTag, PutOptions, QueueStats, Transport, TransportError,
    deadline_after,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Granularity of the internal wait loop inside `reserve`.
const WAIT_TICK: Duration = Duration::from_millis(10);

/// Longest native wait `reserve` accepts, mirroring managed backends that
/// cap their long-poll window.
const MAX_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    queue: String,
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    ready: Vec<StoredMessage>,
    in_flight: HashMap<Uuid, InFlight>,
}

#[derive(Debug)]
struct StoredMessage {
    id: Uuid,
    seq: u64,
    body: String,
    priority: u32,
    available_at: Instant,
    delivery_count: u32,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    deadline: Instant,
}

impl MemoryTransport {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory queue mutex poisoned")
    }
}

impl State {
    /// Move every expired lease back to the ready list. This is what makes
    /// an unacknowledged message redeliverable.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(flight) = self.in_flight.remove(&id) {
                self.ready.push(flight.message);
            }
        }
    }

    /// Take the next visible message: lowest priority value wins, ties go to
    /// the oldest sequence number.
    fn take_next(&mut self, now: Instant) -> Option<StoredMessage> {
        self.requeue_expired(now);
        let idx = self
            .ready
            .iter()
            .enumerate()
            .filter(|(_, m)| m.available_at <= now)
            .min_by_key(|(_, m)| (m.priority, m.seq))
            .map(|(i, _)| i)?;
        Some(self.ready.swap_remove(idx))
    }
}

impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn max_wait(&self) -> Option<Duration> {
        Some(MAX_WAIT)
    }

    async fn put(&mut self, body: &str, opts: &PutOptions) -> Result<(), TransportError> {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ready.push(StoredMessage {
            id: Uuid::new_v4(),
            seq,
            body: body.to_owned(),
            priority: opts.priority,
            available_at: Instant::now() + opts.delay,
            delivery_count: 0,
        });
        Ok(())
    }

    async fn reserve(
        &mut self,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        let wait = wait.min(MAX_WAIT);
        let give_up = Instant::now() + wait;
        loop {
            {
                let mut state = self.lock();
                let now = Instant::now();
                if let Some(mut message) = state.take_next(now) {
                    message.delivery_count += 1;
                    let delivery = Delivery {
                        tag: DeliveryTag(message.id.to_string()),
                        body: message.body.clone(),
                        deadline: deadline_after(lease),
                        delivery_count: message.delivery_count,
                    };
                    let id = message.id;
                    state.in_flight.insert(
                        id,
                        InFlight {
                            message,
                            deadline: now + lease,
                        },
                    );
                    return Ok(Some(delivery));
                }
            }
            if Instant::now() >= give_up {
                return Ok(None);
            }
            tokio::time::sleep(WAIT_TICK).await;
        }
    }

    async fn delete(&mut self, tag: &DeliveryTag) -> Result<(), TransportError> {
        let id = parse_tag(tag)?;
        let mut state = self.lock();
        state
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TransportError::Failed(format!("unknown delivery tag {tag}")))
    }

    async fn touch(&mut self, tag: &DeliveryTag, lease: Duration) -> Result<(), TransportError> {
        let id = parse_tag(tag)?;
        let mut state = self.lock();
        let flight = state
            .in_flight
            .get_mut(&id)
            .ok_or_else(|| TransportError::Failed(format!("unknown delivery tag {tag}")))?;
        flight.deadline = Instant::now() + lease;
        Ok(())
    }

    async fn release(
        &mut self,
        tag: &DeliveryTag,
        delay: Duration,
        priority: u32,
    ) -> Result<(), TransportError> {
        let id = parse_tag(tag)?;
        let mut state = self.lock();
        let mut flight = state
            .in_flight
            .remove(&id)
            .ok_or_else(|| TransportError::Failed(format!("unknown delivery tag {tag}")))?;
        flight.message.available_at = Instant::now() + delay;
        // DEFAULT_PRIORITY means keep the message's original priority.
        if priority != DEFAULT_PRIORITY {
            flight.message.priority = priority;
        }
        state.ready.push(flight.message);
        Ok(())
    }

    async fn stats(&mut self) -> Result<QueueStats, TransportError> {
        let mut state = self.lock();
        let now = Instant::now();
        state.requeue_expired(now);
        let ready = state.ready.iter().filter(|m| m.available_at <= now).count();
        let delayed = state.ready.len() - ready;
        Ok(QueueStats {
            ready: ready as u64,
            reserved: Some(state.in_flight.len() as u64),
            delayed: Some(delayed as u64),
        })
    }
}

fn parse_tag(tag: &DeliveryTag) -> Result<Uuid, TransportError> {
    Uuid::parse_str(&tag.0)
        .map_err(|_| TransportError::Failed(format!("malformed delivery tag {tag}")))
}
