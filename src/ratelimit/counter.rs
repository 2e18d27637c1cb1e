//! Fixed-window hit counter used for quota utilization reporting.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Number of buckets a window is divided into.
const BUCKETS_PER_WINDOW: u64 = 10;

/// Longest window a counter covers; longer windows are shortened to this.
pub const MAX_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    /// Absolute bucket index (elapsed time / bucket width) this slot was last used for
    stamp: u64,
    count: u64,
}

/// Counts hits over a trailing time window.
///
/// The window is split into a fixed ring of buckets, so memory stays constant no
/// matter how many hits are recorded. Each bucket has its own lock; concurrent
/// `hit()` calls only contend when they land in the same slice of time.
pub struct HitCounter {
    origin: Instant,
    bucket_width: Duration,
    buckets: Box<[Mutex<Bucket>]>,
}

impl HitCounter {
    /// Create a counter over the given window, at most [`MAX_WINDOW`] long.
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub(crate) fn starting_at(window: Duration, origin: Instant) -> Self {
        let window = window.min(MAX_WINDOW);
        let width_nanos = (window.as_nanos() / BUCKETS_PER_WINDOW as u128).max(1);
        let buckets = (0..BUCKETS_PER_WINDOW)
            .map(|_| Mutex::new(Bucket::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            origin,
            bucket_width: Duration::from_nanos(u64::try_from(width_nanos).unwrap_or(u64::MAX)),
            buckets,
        }
    }

    /// Record one hit at the current time.
    pub fn hit(&self) {
        self.hit_at(Instant::now());
    }

    /// Number of hits recorded within the trailing window.
    pub fn count(&self) -> u64 {
        self.count_at(Instant::now())
    }

    /// Length of the window covered by `count()`.
    pub fn window(&self) -> Duration {
        self.bucket_width * BUCKETS_PER_WINDOW as u32
    }

    pub(crate) fn hit_at(&self, now: Instant) {
        let index = self.bucket_index(now);
        let mut bucket = self.buckets[(index % BUCKETS_PER_WINDOW) as usize].lock();

        if bucket.stamp == index {
            bucket.count += 1;
        } else {
            // Slot last held an older slice of time; start it over
            *bucket = Bucket {
                stamp: index,
                count: 1,
            };
        }
    }

    pub(crate) fn count_at(&self, now: Instant) -> u64 {
        let index = self.bucket_index(now);

        self.buckets
            .iter()
            .map(|slot| *slot.lock())
            .filter(|bucket| bucket.stamp <= index && index - bucket.stamp < BUCKETS_PER_WINDOW)
            .map(|bucket| bucket.count)
            .sum()
    }

    fn bucket_index(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos()) as u64
    }
}

impl std::fmt::Debug for HitCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitCounter")
            .field("window", &self.window())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(1);

    #[test]
    fn test_counter_starts_empty() {
        let counter = HitCounter::new(WINDOW);
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.window(), WINDOW);
    }

    #[test]
    fn test_hits_within_window_are_counted() {
        let origin = Instant::now();
        let counter = HitCounter::starting_at(WINDOW, origin);

        counter.hit_at(origin);
        counter.hit_at(origin + Duration::from_millis(150));
        counter.hit_at(origin + Duration::from_millis(950));

        assert_eq!(counter.count_at(origin + Duration::from_millis(960)), 3);
    }

    #[test]
    fn test_hits_expire_after_window() {
        let origin = Instant::now();
        let counter = HitCounter::starting_at(WINDOW, origin);

        counter.hit_at(origin);
        counter.hit_at(origin + Duration::from_millis(500));

        // The bucket holding the first hit has rolled out of the window
        assert_eq!(counter.count_at(origin + Duration::from_millis(1050)), 1);
        assert_eq!(counter.count_at(origin + Duration::from_millis(1600)), 0);
    }

    #[test]
    fn test_reused_bucket_is_reset() {
        let origin = Instant::now();
        let counter = HitCounter::starting_at(WINDOW, origin);

        for _ in 0..5 {
            counter.hit_at(origin + Duration::from_millis(10));
        }
        // Same slot, one full window later
        counter.hit_at(origin + Duration::from_millis(1010));

        assert_eq!(counter.count_at(origin + Duration::from_millis(1020)), 1);
    }

    #[test]
    fn test_oversized_window_is_capped() {
        let origin = Instant::now();
        let counter = HitCounter::starting_at(Duration::MAX, origin);
        assert_eq!(counter.window(), MAX_WINDOW);

        counter.hit_at(origin);
        counter.hit_at(origin + Duration::from_secs(3600));
        assert_eq!(counter.count_at(origin + Duration::from_secs(7200)), 2);

        let from_config = HitCounter::new(Duration::from_millis(u64::MAX));
        assert_eq!(from_config.window(), MAX_WINDOW);
    }

    #[test]
    fn test_concurrent_hits() {
        let counter = Arc::new(HitCounter::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.hit();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count(), 8000);
    }
}
