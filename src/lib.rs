//! # leaseq
//!
//! Uniform at-least-once work queue client over pluggable transports.
//!
//! Provides the lease/acknowledge message lifecycle (reserve, acknowledge,
//! touch, release), bounded retry with transport reconnect, a payload codec
//! policy, an autoscaler-friendly availability probe, and OpenTelemetry
//! observability.

pub mod codec;
pub mod config;
pub mod error;
pub mod queue;
pub mod retry;
pub mod telemetry;
pub mod transport;
