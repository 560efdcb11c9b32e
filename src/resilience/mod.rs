//! Failure handling for the two backends.
//!
//! - [`retry`]: bounded exponential backoff for local store statements
//! - [`circuit_breaker`]: fail-fast wrapper around remote store calls

pub mod circuit_breaker;
pub mod retry;
