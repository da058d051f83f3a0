//! Error types for leaseq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad combination of call parameters. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload too large or not encodable.
    #[error("payload rejected: {0}")]
    Serialization(String),

    /// acknowledge/touch/release called with no message leased.
    #[error("no active lease")]
    NoActiveLease,

    /// dequeue called while a previous lease is still held.
    #[error("a lease is already held; acknowledge or release it first")]
    LeaseAlreadyHeld,

    /// Non-blocking dequeue found nothing.
    #[error("queue is empty")]
    Empty,

    /// Transport operation failed after the retry budget was exhausted.
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// The reconnect loop itself was exhausted.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
