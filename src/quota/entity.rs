//! Per-table quota state.

use parking_lot::Mutex;
use std::time::Duration;

use crate::quota::store::ConfigVersion;
use crate::ratelimit::{HitCounter, TokenRateLimiter};

/// The inputs a per-node rate was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaSnapshot {
    /// Online nodes serving the table, this node included
    pub num_online_nodes: usize,
    /// Cluster-wide queries per second
    pub overall_rate: f64,
    /// Version of the table config the overall rate was read from
    pub config_version: ConfigVersion,
}

impl QuotaSnapshot {
    /// Create a snapshot; the node count is raised to at least one.
    pub fn new(num_online_nodes: usize, overall_rate: f64, config_version: ConfigVersion) -> Self {
        Self {
            num_online_nodes: num_online_nodes.max(1),
            overall_rate,
            config_version,
        }
    }

    /// This node's share of the overall rate.
    pub fn per_node_rate(&self) -> f64 {
        self.overall_rate / self.num_online_nodes as f64
    }
}

/// Rate limiter, hit counter and bookkeeping for one type-qualified table.
///
/// The admission path only touches the limiter and the hit counter. The snapshot
/// is written by the recompute path and replaced as a whole value.
pub struct QuotaEntity {
    rate_limiter: TokenRateLimiter,
    hit_counter: HitCounter,
    snapshot: Mutex<QuotaSnapshot>,
}

impl QuotaEntity {
    /// Create an entity whose limiter runs at the snapshot's per-node rate.
    pub fn new(snapshot: QuotaSnapshot, hit_window: Duration, max_burst_secs: f64) -> Self {
        Self {
            rate_limiter: TokenRateLimiter::new(snapshot.per_node_rate(), max_burst_secs),
            hit_counter: HitCounter::new(hit_window),
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn rate_limiter(&self) -> &TokenRateLimiter {
        &self.rate_limiter
    }

    pub fn hit_counter(&self) -> &HitCounter {
        &self.hit_counter
    }

    /// The inputs the current rate was derived from.
    pub fn snapshot(&self) -> QuotaSnapshot {
        *self.snapshot.lock()
    }

    pub(crate) fn set_snapshot(&self, snapshot: QuotaSnapshot) {
        *self.snapshot.lock() = snapshot;
    }
}

impl std::fmt::Debug for QuotaEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEntity")
            .field("rate", &self.rate_limiter.rate())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
