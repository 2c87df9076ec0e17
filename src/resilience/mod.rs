//! Resilience helpers.
//!
//! # Design Decisions
//! - Every external call has a deadline (`timeouts.upstream_secs`)
//! - Reconnects back off exponentially with jitter
//! - The only request replay is the single refresh-and-retry in the
//!   authorization stage; nothing here retries proxied requests

pub mod backoff;
