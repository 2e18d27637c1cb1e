//! Query admission against per-table quotas.

use tracing::debug;

use super::entity::QuotaEntity;
use super::manager::QueryQuotaManager;
use super::metrics::QuotaGauge;
use super::table::TableTarget;

/// Decides whether a query may run.
pub trait QueryAdmission: Send + Sync {
    /// `true` if a query against `table_name` is admitted.
    fn acquire(&self, table_name: &str) -> bool;
}

impl QueryQuotaManager {
    /// Charge one query against the quota(s) of a table.
    ///
    /// Unqualified names are charged against both the offline and realtime variant,
    /// and the query is admitted only if every variant with a quota admits it. Tables
    /// without a rate limiter are always admitted.
    pub fn acquire(&self, table_name: &str) -> bool {
        let target = TableTarget::resolve(table_name);
        target.table_names().fold(true, |admitted, name| {
            let variant_admitted = match self.registry.get(name) {
                Some(entity) => self.try_acquire_token(name, &entity),
                None => true,
            };
            // Non-short-circuit: every variant is charged
            admitted & variant_admitted
        })
    }

    fn try_acquire_token(&self, table_name: &str, entity: &QuotaEntity) -> bool {
        let hit_counter = entity.hit_counter();
        hit_counter.hit();

        let per_node_rate = entity.rate_limiter().rate();
        if let Some(metrics) = &self.metrics {
            metrics.set_gauge(
                table_name,
                QuotaGauge::CapacityUtilizationRate,
                utilization_percent(hit_counter.count(), per_node_rate),
            );
        }

        if entity.rate_limiter().try_acquire() {
            return true;
        }

        debug!(
            table = %table_name,
            per_node_rate,
            hits = hit_counter.count(),
            "Quota is exceeded for table"
        );
        false
    }
}

impl QueryAdmission for QueryQuotaManager {
    fn acquire(&self, table_name: &str) -> bool {
        QueryQuotaManager::acquire(self, table_name)
    }
}

fn utilization_percent(hits: u64, per_node_rate: f64) -> i64 {
    if per_node_rate > 0.0 {
        (hits as f64 * 100.0 / per_node_rate) as i64
    } else {
        0
    }
}
