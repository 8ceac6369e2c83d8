//! Proxy Freeze Check - authenticated proxy checker
//!
//! Probes a list of forward HTTP proxies, checks that each one can reach the
//! internet with its credentials, and watches a streamed download through it
//! for the "TLS freeze" signature: a connection that hands over a small,
//! fixed payload budget and then stalls without closing.

pub mod proxy;
pub mod report;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
