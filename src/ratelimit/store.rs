//! Identifier-keyed registry of token buckets with stale visitor eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::backend::AdmissionStore;
use super::bucket::{self, TokenBucket};
use super::clock::{Clock, SystemClock};
use super::sweeper::CleanupTask;
use crate::error::Result;

/// Staleness window used when none (or zero) is configured.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3 * 60);
/// Period of the background sweep when none (or zero) is configured.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Construction parameters for a [`VisitorStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Tokens added per second to each visitor's bucket
    pub rate: f64,
    /// Bucket capacity, and the allowance of a newly seen identifier
    pub burst: u32,
    /// How long a visitor may go unseen before it can be evicted
    pub expires_in: Duration,
    /// How often the background task sweeps for stale visitors
    pub cleanup_interval: Duration,
}

impl StoreConfig {
    /// Create a configuration with the default expiry and sweep period.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            expires_in: DEFAULT_EXPIRES_IN,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Set the staleness window. Zero selects [`DEFAULT_EXPIRES_IN`].
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Set the sweep period. Zero selects [`DEFAULT_CLEANUP_INTERVAL`].
    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the unit of work may proceed
    pub allowed: bool,
    /// Whole tokens left for the identifier after this check
    pub remaining: u32,
    /// How long until the identifier has a token again
    pub retry_after: Duration,
}

/// Per-identifier state.
#[derive(Debug)]
struct Visitor {
    /// Token bucket, locked independently of the visitor map
    limiter: Arc<Mutex<TokenBucket>>,
    /// Last admission check for this identifier; only touched under the map lock
    last_seen: Instant,
}

/// Registry mapping identifiers to independent token buckets.
///
/// The visitor map sits behind a single mutex that serializes lookup,
/// creation, `last_seen` updates and eviction. Each bucket has its own lock,
/// so token arithmetic for one identifier never holds up checks for another,
/// while checks for the same identifier are still applied one at a time.
///
/// Stale visitors are removed by [`cleanup_stale_visitors`](Self::cleanup_stale_visitors),
/// which the background task started by [`start`](Self::start) calls every
/// `cleanup_interval`.
#[derive(Debug)]
pub struct VisitorStore<C: Clock = SystemClock> {
    visitors: Mutex<HashMap<String, Visitor>>,
    rate: f64,
    burst: u32,
    expires_in: Duration,
    cleanup_interval: Duration,
    clock: C,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl VisitorStore {
    /// Create a store using the system clock, without a background sweep.
    ///
    /// A store built this way never evicts on its own: visitors accumulate
    /// until [`cleanup_stale_visitors`](VisitorStore::cleanup_stale_visitors)
    /// is called or the sweep is started with
    /// [`spawn_cleanup`](VisitorStore::spawn_cleanup). Use
    /// [`start`](Self::start) to get a store that sweeps.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a store and start its background sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: StoreConfig) -> Result<Arc<Self>> {
        let store = Arc::new(Self::new(config)?);
        store.spawn_cleanup();
        Ok(store)
    }
}

impl<C: Clock> VisitorStore<C> {
    /// Create a store reading time from `clock`.
    ///
    /// Like [`new`](VisitorStore::new), no background sweep is started.
    pub fn with_clock(config: StoreConfig, clock: C) -> Result<Self> {
        bucket::validate(config.rate, config.burst)?;

        let expires_in = if config.expires_in.is_zero() {
            DEFAULT_EXPIRES_IN
        } else {
            config.expires_in
        };
        let cleanup_interval = if config.cleanup_interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            config.cleanup_interval
        };

        Ok(Self {
            visitors: Mutex::new(HashMap::new()),
            rate: config.rate,
            burst: config.burst,
            expires_in,
            cleanup_interval,
            clock,
            cleanup: Mutex::new(None),
        })
    }

    /// Check whether `identifier` may proceed, consuming a token if so.
    pub fn allow(&self, identifier: &str) -> bool {
        self.check(identifier).allowed
    }

    /// Check whether `identifier` may proceed and report its remaining allowance.
    pub fn check(&self, identifier: &str) -> Decision {
        let limiter = self.touch(identifier);

        // Reading the clock under the bucket lock keeps refills for one
        // identifier in the same order as their timestamps.
        let mut bucket = limiter.lock();
        let allowed = bucket.try_consume(self.clock.now());
        let decision = Decision {
            allowed,
            remaining: bucket.remaining(),
            retry_after: bucket.time_to_next_token(),
        };
        drop(bucket);

        trace!(
            identifier = %identifier,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Admission check"
        );

        decision
    }

    /// Look up or create the visitor and record that it was seen now.
    fn touch(&self, identifier: &str) -> Arc<Mutex<TokenBucket>> {
        let mut visitors = self.visitors.lock();
        let now = self.clock.now();

        if let Some(visitor) = visitors.get_mut(identifier) {
            visitor.last_seen = visitor.last_seen.max(now);
            return Arc::clone(&visitor.limiter);
        }

        debug!(
            identifier = %identifier,
            rate = self.rate,
            burst = self.burst,
            "Creating new visitor"
        );

        let bucket = TokenBucket::full(self.rate, self.burst, now);
        let limiter = Arc::new(Mutex::new(bucket));
        visitors.insert(
            identifier.to_string(),
            Visitor {
                limiter: Arc::clone(&limiter),
                last_seen: now,
            },
        );
        limiter
    }

    /// Remove every visitor not seen within `expires_in`.
    ///
    /// Returns the number of visitors removed.
    pub fn cleanup_stale_visitors(&self) -> usize {
        let mut visitors = self.visitors.lock();
        let now = self.clock.now();
        let before = visitors.len();

        let expires_in = self.expires_in;
        visitors.retain(|_, visitor| now.saturating_duration_since(visitor.last_seen) <= expires_in);

        let removed = before - visitors.len();
        debug!(
            removed = removed,
            remaining = visitors.len(),
            "Cleaned up stale visitors"
        );
        removed
    }

    /// Start the background sweep, replacing any running one.
    ///
    /// The task holds only a weak reference, so it ends once the last `Arc`
    /// to the store is dropped. Must be called from within a Tokio runtime.
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let task = CleanupTask::spawn(Arc::downgrade(self), self.cleanup_interval);
        let previous = self.cleanup.lock().replace(task);
        drop(previous);
    }

    /// Stop the background sweep. Returns `false` if none was running.
    pub fn stop_cleanup(&self) -> bool {
        self.cleanup.lock().take().is_some()
    }

    /// Whether a background sweep is currently running.
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Get the number of tracked visitors.
    pub fn visitor_count(&self) -> usize {
        self.visitors.lock().len()
    }

    /// Whether `identifier` currently has a visitor entry.
    pub fn contains(&self, identifier: &str) -> bool {
        self.visitors.lock().contains_key(identifier)
    }

    /// Drop every visitor.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.visitors.lock().clear();
    }

    /// Tokens per second granted to each visitor.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket capacity of each visitor.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Effective staleness window.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Effective sweep period.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
}

impl<C: Clock> AdmissionStore for VisitorStore<C> {
    fn allow(&self, identifier: &str) -> bool {
        self.check(identifier).allowed
    }
}
