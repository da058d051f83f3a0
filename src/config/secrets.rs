//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for working with
//! secrets in the leaseq context.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
