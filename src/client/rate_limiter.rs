//! Minimum-spacing rate limiter shared across sampler instances.
//!
//! Epistemic foundation:
//! - K_i: providers throttle by model; spacing requests avoids tripping it
//! - K_i: every sampler targeting the same (backend, model) must share one
//!   spacing policy, process-wide
//! - I^R: the minimum delay is a config parameter, zero disables

use crate::models::Backend;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Identifies a shared spacing policy scope: backend family × model.
pub type LimiterKey = (Backend, String);

/// Enforces a minimum delay between dispatches for one limiter key.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    /// Time of the previous dispatch. The whole read-compare-sleep-update
    /// sequence runs under this lock, so concurrent callers never compute
    /// elapsed windows against a stale timestamp.
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Suspend the calling task until `min_delay` has elapsed since the
    /// previous dispatch, then record the new dispatch time.
    ///
    /// With a zero delay this returns immediately without touching the
    /// lock. Returns the duration actually waited.
    pub async fn wait_if_needed(&self) -> Duration {
        if self.min_delay.is_zero() {
            return Duration::ZERO;
        }

        let mut last = self.last_dispatch.lock().await;
        let wait = match *last {
            Some(previous) => self.min_delay.saturating_sub(previous.elapsed()),
            None => Duration::ZERO,
        };

        if !wait.is_zero() {
            if wait > Duration::from_millis(100) {
                debug!(wait_ms = wait.as_millis() as u64, "Waiting before next API call");
            }
            tokio::time::sleep(wait).await;
        }

        *last = Some(Instant::now());
        wait
    }
}

/// Process-wide registry of shared limiters.
///
/// Samplers acquire limiters by key; all instances with the same key get
/// the same limiter, so the minimum spacing holds across them. The delay
/// is frozen when a key's limiter is first created; later acquires with
/// a different delay reuse the existing one unchanged.
///
/// Injected into each sampler so tests can substitute a fresh registry;
/// `RateLimiterRegistry::global()` is the default process-wide instance.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    limiters: DashMap<LimiterKey, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            limiters: DashMap::new(),
        }
    }

    /// Get or create the limiter for a (backend, model) key.
    pub fn acquire(&self, backend: Backend, model: &str, min_delay: Duration) -> Arc<RateLimiter> {
        self.limiters
            .entry((backend, model.to_string()))
            .or_insert_with(|| Arc::new(RateLimiter::new(min_delay)))
            .clone()
    }

    /// Number of keys with a limiter.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// The default process-wide registry: created on first use, lives for
    /// the rest of the process.
    pub fn global() -> &'static Arc<RateLimiterRegistry> {
        static GLOBAL: OnceLock<Arc<RateLimiterRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(RateLimiterRegistry::new()))
    }
}
