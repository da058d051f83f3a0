//! Negative-result cache for the autoscaler availability probe.

use std::time::{Duration, Instant};

/// Remembers only "nothing available", for a bounded time. A positive probe
/// result is never stored, so a change in queue depth is observed on the
/// next call.
#[derive(Debug)]
pub(crate) struct AvailabilityCache {
    ttl: Duration,
    empty_until: Option<Instant>,
}

impl AvailabilityCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            empty_until: None,
        }
    }

    /// Whether a confirmed-empty result is still being served from cache.
    pub(crate) fn is_cached_empty(&self) -> bool {
        self.empty_until.is_some_and(|until| Instant::now() < until)
    }

    /// Cache a confirmed-empty backend state for the configured TTL.
    pub(crate) fn note_empty(&mut self) {
        self.empty_until = Some(Instant::now() + self.ttl);
    }

    /// Drop the cached state (the queue is known to be non-empty).
    pub(crate) fn clear(&mut self) {
        self.empty_until = None;
    }
}
