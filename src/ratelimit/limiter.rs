//! Adjustable-rate token bucket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Emission parameters derived from a rate.
#[derive(Debug, Clone, Copy)]
struct Params {
    /// Nanoseconds for one token to accrue
    interval: u64,
    /// How far ahead of `now` the arrival time may run and still admit a request
    tolerance: u64,
    /// Maximum number of banked tokens
    capacity: f64,
}

impl Params {
    fn new(rate: f64, max_burst_secs: f64) -> Self {
        let rate = rate.max(f64::MIN_POSITIVE);
        let interval = (NANOS_PER_SEC / rate).round().max(1.0) as u64;
        let capacity = (rate * max_burst_secs).max(1.0);
        let tolerance = ((capacity - 1.0) * interval as f64) as u64;

        Self {
            interval,
            tolerance,
            capacity,
        }
    }
}

/// A token bucket whose accrual rate can be changed while it is in use.
///
/// State is a single theoretical arrival time (the instant at which the bucket would
/// be drained if every banked token were spent) stored in an `AtomicU64`, so
/// `try_acquire` is a compare-and-swap loop and never blocks. The rate is stored as
/// the bit pattern of an `f64`; readers always see either the old or the new rate.
///
/// Only one writer is expected to call `set_rate` at a time.
pub struct TokenRateLimiter {
    origin: Instant,
    max_burst_secs: f64,
    rate_bits: AtomicU64,
    /// Theoretical arrival time in nanoseconds since `origin`
    tat: AtomicU64,
}

impl TokenRateLimiter {
    /// Create a limiter admitting `rate` requests per second, banking at most
    /// `max_burst_secs` worth of tokens while idle.
    ///
    /// The limiter starts with a single token available.
    pub fn new(rate: f64, max_burst_secs: f64) -> Self {
        Self::starting_at(rate, max_burst_secs, Instant::now())
    }

    pub(crate) fn starting_at(rate: f64, max_burst_secs: f64, origin: Instant) -> Self {
        debug_assert!(rate.is_finite() && rate > 0.0, "rate must be positive: {}", rate);

        let params = Params::new(rate, max_burst_secs);
        Self {
            origin,
            max_burst_secs,
            rate_bits: AtomicU64::new(rate.to_bits()),
            tat: AtomicU64::new(params.tolerance),
        }
    }

    /// Current rate in requests per second.
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    /// Consume one token if one is available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Change the accrual rate, keeping the tokens banked so far.
    ///
    /// Banked tokens are clamped to the capacity implied by the new rate.
    /// Non-positive or non-finite rates are ignored.
    pub fn set_rate(&self, rate: f64) {
        self.set_rate_at(rate, Instant::now());
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> bool {
        let now = self.nanos_since_origin(now);
        let mut tat = self.tat.load(Ordering::Acquire);

        loop {
            let params = Params::new(self.rate(), self.max_burst_secs);
            let base = tat.max(now);
            if base - now > params.tolerance {
                return false;
            }

            match self.tat.compare_exchange_weak(
                tat,
                base.saturating_add(params.interval),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => tat = current,
            }
        }
    }

    pub(crate) fn set_rate_at(&self, rate: f64, now: Instant) {
        if !rate.is_finite() || rate <= 0.0 {
            return;
        }

        let now = self.nanos_since_origin(now);
        let old = Params::new(self.rate(), self.max_burst_secs);
        let new = Params::new(rate, self.max_burst_secs);
        let mut tat = self.tat.load(Ordering::Acquire);

        loop {
            let debt = tat.max(now) - now;
            let banked =
                (old.capacity - debt as f64 / old.interval as f64).clamp(0.0, new.capacity);
            let refill = ((new.capacity - banked) * new.interval as f64) as u64;
            let rebased = now.saturating_add(refill);

            match self
                .tat
                .compare_exchange_weak(tat, rebased, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => tat = current,
            }
        }

        self.rate_bits.store(rate.to_bits(), Ordering::Release);
    }

    fn nanos_since_origin(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_nanos() as u64
    }
}

impl std::fmt::Debug for TokenRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRateLimiter")
            .field("rate", &self.rate())
            .field("max_burst_secs", &self.max_burst_secs)
            .finish()
    }
}
