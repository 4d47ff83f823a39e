//! Client-side request throttling.
//!
//! GET requests draw from the read bucket, POST requests from the write
//! bucket, so a burst of screens cannot starve dashboard reads.

use std::num::NonZeroU32;
use std::sync::Arc;

use common::config::RateLimitConfig;
use common::Error;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovLimiter};

type DirectLimiter = GovLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Dual rate limiter with separate buckets for reads and writes.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    read_limiter: Arc<DirectLimiter>,
    write_limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Create from configured per-second budgets. Zero budgets are rejected.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, Error> {
        let reads = NonZeroU32::new(config.reads_per_sec)
            .ok_or_else(|| Error::Config("rate_limit.reads_per_sec must be > 0".into()))?;
        let writes = NonZeroU32::new(config.writes_per_sec)
            .ok_or_else(|| Error::Config("rate_limit.writes_per_sec must be > 0".into()))?;

        Ok(Self::with_limits(reads, writes))
    }

    pub fn with_limits(reads_per_sec: NonZeroU32, writes_per_sec: NonZeroU32) -> Self {
        Self {
            read_limiter: Arc::new(GovLimiter::direct(Quota::per_second(reads_per_sec))),
            write_limiter: Arc::new(GovLimiter::direct(Quota::per_second(writes_per_sec))),
        }
    }

    /// Wait until a read slot is available.
    pub async fn wait_read(&self) {
        self.read_limiter.until_ready().await;
    }

    /// Wait until a write slot is available.
    pub async fn wait_write(&self) {
        self.write_limiter.until_ready().await;
    }

    #[cfg(test)]
    fn try_read(&self) -> bool {
        self.read_limiter.check().is_ok()
    }
}
