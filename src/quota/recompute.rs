//! Re-dividing table quotas when the cluster view or table configs change.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::entity::{QuotaEntity, QuotaSnapshot};
use super::manager::QueryQuotaManager;
use super::table::QuotaConfig;
use crate::mesh::{online_node_count, ClusterView};

/// Result of handing a cluster view to the quota manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// No view was available; nothing was done
    NoView,
    /// The view's version was already processed
    Unchanged { version: u64 },
    /// Every tracked table was re-evaluated against the view
    Processed(RecomputeReport),
}

/// Summary of one recompute pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeReport {
    /// Version of the view the pass ran against
    pub version: u64,
    /// Rate limiters whose rate was changed
    pub rebuilt: usize,
    /// Rate limiters removed because their table or quota went away
    pub evicted: usize,
    /// Rate limiters left in the registry afterwards
    pub remaining: usize,
    pub elapsed: Duration,
}

enum EntityUpdate {
    Unchanged,
    Rebuilt,
    Evict,
}

impl QueryQuotaManager {
    /// Re-derive every table's per-node rate from a new cluster view.
    ///
    /// A view whose version was already processed is ignored. Tables missing from
    /// the view, deleted from the config store, or whose quota became invalid lose
    /// their rate limiter. Passes are serialized; admission keeps running
    /// concurrently.
    pub fn process_quota_change(&self, view: Option<&ClusterView>) -> RecomputeOutcome {
        debug!("Start processing qps quota change");
        let started = Instant::now();

        let Some(view) = view else {
            warn!("No cluster view available for the broker resource, skipping qps quota change");
            return RecomputeOutcome::NoView;
        };

        let mut last_version = self.last_view_version.lock();
        if *last_version == Some(view.version()) {
            debug!(
                version = view.version(),
                "No qps quota change: cluster view for the broker resource remains the same"
            );
            return RecomputeOutcome::Unchanged {
                version: view.version(),
            };
        }

        let mut rebuilt = 0;
        let mut evicted = 0;
        for (table_name, entity) in self.registry.snapshot_entries() {
            match self.recompute_entity(&table_name, &entity, view) {
                EntityUpdate::Unchanged => {}
                EntityUpdate::Rebuilt => rebuilt += 1,
                EntityUpdate::Evict => {
                    if self.registry.remove_if_same(&table_name, &entity) {
                        evicted += 1;
                    }
                }
            }
        }
        *last_version = Some(view.version());

        let report = RecomputeReport {
            version: view.version(),
            rebuilt,
            evicted,
            remaining: self.registry.len(),
            elapsed: started.elapsed(),
        };
        info!(
            version = report.version,
            elapsed_ms = report.elapsed.as_millis() as u64,
            rebuilt = report.rebuilt,
            evicted = report.evicted,
            remaining = report.remaining,
            "Processed query quota change"
        );
        RecomputeOutcome::Processed(report)
    }

    fn recompute_entity(
        &self,
        table_name: &str,
        entity: &Arc<QuotaEntity>,
        view: &ClusterView,
    ) -> EntityUpdate {
        let Some(state_map) = view.state_map(table_name) else {
            info!(table = %table_name, "No broker resource for table. Removing its rate limit");
            return EntityUpdate::Evict;
        };
        let num_online_nodes = online_node_count(Some(state_map), &self.local_node_id);

        let Some(config_version) = self.stored_config_version(table_name) else {
            info!(
                table = %table_name,
                "Table has been deleted from the config store. Removing its rate limit"
            );
            return EntityUpdate::Evict;
        };

        let previous = entity.snapshot();
        let overall_rate = if config_version != previous.config_version {
            match self.current_overall_rate(table_name) {
                Some(rate) => rate,
                None => {
                    info!(
                        table = %table_name,
                        "Query quota config is missing or invalid. Removing its rate limit"
                    );
                    return EntityUpdate::Evict;
                }
            }
        } else {
            previous.overall_rate
        };

        let latest = QuotaSnapshot::new(num_online_nodes, overall_rate, config_version);
        if latest.num_online_nodes == previous.num_online_nodes
            && latest.overall_rate == previous.overall_rate
        {
            if latest.config_version != previous.config_version {
                entity.set_snapshot(latest);
            }
            trace!(table = %table_name, "Online nodes and overall rate unchanged");
            return EntityUpdate::Unchanged;
        }

        let previous_rate = entity.rate_limiter().rate();
        let latest_rate = latest.per_node_rate();
        let rebuilt = (latest_rate - previous_rate).abs() > self.settings.rate_change_epsilon;
        if rebuilt {
            entity.rate_limiter().set_rate(latest_rate);
            info!(
                table = %table_name,
                overall_rate,
                previous_per_node_rate = previous_rate,
                per_node_rate = latest_rate,
                num_online_nodes = latest.num_online_nodes,
                "Rate limiter for table has been updated"
            );
        }
        entity.set_snapshot(latest);

        if rebuilt {
            EntityUpdate::Rebuilt
        } else {
            EntityUpdate::Unchanged
        }
    }

    /// Freshly read overall rate; lookup failures count as a missing quota.
    fn current_overall_rate(&self, table_name: &str) -> Option<f64> {
        match self.store.quota_config(table_name) {
            Ok(quota) => quota.as_ref().and_then(QuotaConfig::max_qps),
            Err(e) => {
                warn!(table = %table_name, error = %e, "Failed to read table quota config");
                None
            }
        }
    }
}
