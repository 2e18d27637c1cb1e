//! Per-table query quotas divided across the nodes serving each table.
//!
//! Each table's cluster-wide rate is split evenly among the online nodes reported
//! by the current [`ClusterView`](crate::mesh::ClusterView). Every node enforces its
//! share locally with a [`TokenRateLimiter`](crate::ratelimit::TokenRateLimiter);
//! there is no cross-node token exchange.

mod admission;
mod entity;
mod manager;
mod metrics;
mod recompute;
mod registry;
mod store;
mod table;

pub use admission::QueryAdmission;
pub use entity::{QuotaEntity, QuotaSnapshot};
pub use manager::{QueryQuotaManager, QueryQuotaManagerBuilder};
pub use metrics::{MetricsFacadeSink, MetricsSink, QuotaGauge};
pub use recompute::{RecomputeOutcome, RecomputeReport};
pub use registry::QuotaRegistry;
pub use store::{ConfigVersion, InMemoryConfigStore, QuotaConfigStore};
pub use table::{raw_table_name, QuotaConfig, TableConfig, TableTarget, TableType};
