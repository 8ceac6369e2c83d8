//! Proxy module for parsing and checking proxies
//!
//! This module provides functionality for:
//! - Parsing proxies in `host:port:username:password` format
//! - Checking proxies with a two-stage probe (egress IP, then streamed download)
//! - Detecting byte-bounded stalls on the streamed download
//! - Running checks under a bounded admission gate

pub mod checker;
pub mod dispatch;
pub mod models;
pub mod parser;
pub mod stall;

pub use checker::{timeout_from_secs, CheckerConfig, IpEndpoint, ProxyChecker};
pub use dispatch::dispatch;
pub use models::{ProxyConfig, ProxyResult, ProxyStatus};
pub use parser::{LoadedProxies, ParsedLine, ProxyParser};
pub use stall::{StallDetector, StallOutcome, StallPolicy};
