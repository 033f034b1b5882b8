//! Token bucket implementation.

use std::time::{Duration, Instant};

use crate::error::{Result, TurnstileError};

/// Slack for the availability check.
///
/// `Duration` truncates to whole nanoseconds, so waiting exactly `1/rate`
/// can refill a hair under one token.
const TOKEN_EPSILON: f64 = 1e-6;

/// A token bucket refilled continuously at `rate` tokens per second.
///
/// The balance is carried as an `f64` and only compared against whole tokens
/// when consuming, so fractional refills accumulate without rounding loss.
/// The bucket itself is not synchronized; the store guards each one with its
/// own lock.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Maximum tokens the bucket can hold
    burst: u32,
    /// Balance as of `last_refill`, always within `[0, burst]`
    tokens: f64,
    /// When the balance was last brought up to date
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Fails if `rate` is not a finite positive number or `burst` is zero.
    pub fn new(rate: f64, burst: u32, now: Instant) -> Result<Self> {
        validate(rate, burst)?;
        Ok(Self::full(rate, burst, now))
    }

    /// Create a full bucket from parameters that already passed [`validate`].
    pub(crate) fn full(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            rate,
            burst,
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed up to `now`, then take one token if available.
    ///
    /// Returns `true` if a token was consumed. A denied call leaves the
    /// refilled balance in place and never drives it negative.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            // At most TOKEN_EPSILON of a token is forgiven; the balance stays non-negative.
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Time until the next whole token is available, as of the last refill.
    ///
    /// Saturates at `Duration::MAX` for rates too small to represent the wait.
    pub fn time_to_next_token(&self) -> Duration {
        let missing = 1.0 - self.tokens;
        if missing <= TOKEN_EPSILON {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(missing / self.rate).unwrap_or(Duration::MAX)
        }
    }

    /// Tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Balance as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Whole tokens left as of the last refill.
    pub fn remaining(&self) -> u32 {
        (self.tokens + TOKEN_EPSILON).floor() as u32
    }

    fn refill(&mut self, now: Instant) {
        // A caller holding an older reading adds nothing and keeps the newer timestamp.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let capacity = f64::from(self.burst);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(capacity);
        self.last_refill = now;
    }
}

/// Check the parameters shared by every bucket of a store.
pub(crate) fn validate(rate: f64, burst: u32) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(TurnstileError::InvalidRate(rate));
    }
    if burst == 0 {
        return Err(TurnstileError::InvalidBurst(burst));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bucket_starts_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(1.0, 3, now).unwrap();

        assert_eq!(bucket.tokens(), 3.0);
        assert_eq!(bucket.remaining(), 3);
        assert_eq!(bucket.time_to_next_token(), Duration::ZERO);
    }

    #[test]
    fn test_burst_exhaustion() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 3, now).unwrap();

        for _ in 0..3 {
            assert!(bucket.try_consume(now));
        }

        // The 4th immediate request should be rejected
        assert!(!bucket.try_consume(now));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_refill_after_one_interval_yields_one_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 2, start).unwrap();

        assert!(bucket.try_consume(start));
        assert!(bucket.try_consume(start));
        assert!(!bucket.try_consume(start));

        let later = start + Duration::from_millis(500);
        assert!(bucket.try_consume(later));
        assert!(!bucket.try_consume(later));
    }

    #[test]
    fn test_refill_with_non_terminating_interval() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3.0, 1, start).unwrap();
        assert!(bucket.try_consume(start));

        // 1/3 s truncates to 333_333_333 ns
        let later = start + Duration::from_secs_f64(1.0 / 3.0);
        assert!(bucket.try_consume(later));
        assert_eq!(bucket.tokens(), 0.0);
        assert!(!bucket.try_consume(later));
    }

    #[test]
    fn test_fractional_refill_accumulates() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 1, start).unwrap();
        assert!(bucket.try_consume(start));

        // Four steps of 250ms add up to exactly one token
        let mut now = start;
        for _ in 0..3 {
            now += Duration::from_millis(250);
            assert!(!bucket.try_consume(now));
        }
        now += Duration::from_millis(250);
        assert!(bucket.try_consume(now));
    }

    #[test]
    fn test_refill_is_clamped_to_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3, start).unwrap();
        assert!(bucket.try_consume(start));

        let later = start + Duration::from_secs(60);
        assert!(bucket.try_consume(later));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_stale_timestamp_adds_nothing() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 1, start).unwrap();
        let later = start + Duration::from_secs(1);

        assert!(bucket.try_consume(later));
        assert!(!bucket.try_consume(start));
        // The newer refill timestamp is kept, so one more second is still required
        assert!(!bucket.try_consume(later + Duration::from_millis(900)));
        assert!(bucket.try_consume(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_time_to_next_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 1, start).unwrap();
        assert!(bucket.try_consume(start));

        assert_eq!(bucket.time_to_next_token(), Duration::from_millis(500));
    }

    #[test]
    fn test_time_to_next_token_saturates_for_tiny_rate() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1e-20, 1, start).unwrap();
        assert!(bucket.try_consume(start));

        assert_eq!(bucket.time_to_next_token(), Duration::MAX);
        assert!(!bucket.try_consume(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_accessors() {
        let bucket = TokenBucket::new(2.5, 7, Instant::now()).unwrap();

        assert_eq!(bucket.rate(), 2.5);
        assert_eq!(bucket.burst(), 7);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let now = Instant::now();
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = TokenBucket::new(rate, 3, now).unwrap_err();
            assert!(matches!(err, TurnstileError::InvalidRate(_)));
        }
    }

    #[test]
    fn test_zero_burst_rejected() {
        let err = TokenBucket::new(1.0, 0, Instant::now()).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidBurst(0)));
    }
}
