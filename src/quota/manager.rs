//! The per-table query quota manager.
//!
//! A [`QueryQuotaManager`] owns the quota registry of one node. Table lifecycle
//! events create and drop entities, cluster view changes re-divide each table's
//! overall rate among the nodes serving it, and the query path asks it for
//! admission.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::entity::{QuotaEntity, QuotaSnapshot};
use super::metrics::MetricsSink;
use super::registry::QuotaRegistry;
use super::store::{ConfigVersion, QuotaConfigStore};
use super::table::{raw_table_name, QuotaConfig, TableConfig};
use crate::config::QuotaSettings;
use crate::error::{QuotaError, Result};
use crate::mesh::{online_node_count, ClusterView};

/// Enforces per-table query quotas on this node.
pub struct QueryQuotaManager {
    pub(super) local_node_id: String,
    pub(super) store: Arc<dyn QuotaConfigStore>,
    pub(super) metrics: Option<Arc<dyn MetricsSink>>,
    pub(super) settings: QuotaSettings,
    pub(super) registry: QuotaRegistry,
    /// Serializes recompute passes and remembers the last view version processed
    pub(super) last_view_version: Mutex<Option<u64>>,
}

impl QueryQuotaManager {
    pub fn builder() -> QueryQuotaManagerBuilder {
        QueryQuotaManagerBuilder::default()
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn settings(&self) -> &QuotaSettings {
        &self.settings
    }

    /// Create the rate limiter for a newly added (or rediscovered) table.
    ///
    /// Tables without a valid quota, or for which no cluster view is available, are
    /// left unlimited. Returns `true` if a rate limiter was registered.
    pub fn init_table_quota(&self, table_config: &TableConfig, view: Option<&ClusterView>) -> bool {
        let table_name = table_config.table_name();
        info!(table = %table_name, "Initializing rate limiter for table");

        self.warn_on_differing_sibling_quota(table_config);
        self.create_rate_limiter(table_name, view, table_config.quota())
    }

    /// Remove the rate limiter of a dropped table.
    pub fn drop_table_quota(&self, table_name: &str) {
        info!(table = %table_name, "Dropping rate limiter for table");
        self.registry.remove(table_name);
    }

    /// Number of tables with an active rate limiter.
    pub fn registry_size(&self) -> usize {
        self.registry.len()
    }

    /// Remove every rate limiter.
    pub fn clear_registry(&self) {
        self.registry.clear();
    }

    /// Inputs of a table's current per-node rate, if it has a rate limiter.
    pub fn quota_snapshot(&self, table_name: &str) -> Option<QuotaSnapshot> {
        self.registry.get(table_name).map(|entity| entity.snapshot())
    }

    /// Current per-node rate of a table, if it has a rate limiter.
    pub fn per_node_rate(&self, table_name: &str) -> Option<f64> {
        self.registry
            .get(table_name)
            .map(|entity| entity.rate_limiter().rate())
    }

    /// Version of the last cluster view a recompute pass completed for.
    pub fn last_processed_version(&self) -> Option<u64> {
        *self.last_view_version.lock()
    }

    /// Offline and realtime variants of a table are limited independently; differing
    /// quotas are allowed but most likely a mistake.
    fn warn_on_differing_sibling_quota(&self, table_config: &TableConfig) {
        let Some(table_type) = table_config.table_type() else {
            return;
        };
        let Some(own_qps) = table_config.quota().and_then(QuotaConfig::raw_max_qps) else {
            return;
        };

        let raw_name = raw_table_name(table_config.table_name());
        let sibling_name = table_type.sibling().table_name_with_type(raw_name);
        let sibling_quota = match self.store.quota_config(&sibling_name) {
            Ok(quota) => quota,
            Err(e) => {
                debug!(table = %sibling_name, error = %e, "Could not read sibling table quota");
                None
            }
        };

        if let Some(sibling_qps) = sibling_quota.as_ref().and_then(QuotaConfig::raw_max_qps) {
            if sibling_qps != own_qps {
                warn!(
                    table = %raw_name,
                    table_qps = %own_qps,
                    sibling_table_qps = %sibling_qps,
                    table_type = ?table_type,
                    "Offline and realtime variants of the table have different query quotas"
                );
            }
        }
    }

    fn create_rate_limiter(
        &self,
        table_name: &str,
        view: Option<&ClusterView>,
        quota: Option<&QuotaConfig>,
    ) -> bool {
        let Some(quota) = quota.filter(|quota| quota.raw_max_qps().is_some()) else {
            info!(table = %table_name, "No qps config specified for table");
            return false;
        };

        let Some(view) = view else {
            warn!(
                table = %table_name,
                "Failed to init qps quota: no cluster view available for the broker resource"
            );
            return false;
        };

        let num_online_nodes = online_node_count(view.state_map(table_name), &self.local_node_id);
        debug!(table = %table_name, num_online_nodes, "Counted online nodes for table");

        let Some(overall_rate) = quota.max_qps() else {
            error!(
                table = %table_name,
                max_queries_per_second = ?quota.max_queries_per_second,
                "Failed to init qps quota: invalid qps value"
            );
            return false;
        };

        let Some(config_version) = self.stored_config_version(table_name) else {
            warn!(
                table = %table_name,
                "Failed to init qps quota: table config has no stored version"
            );
            return false;
        };

        let snapshot = QuotaSnapshot::new(num_online_nodes, overall_rate, config_version);
        let entity = QuotaEntity::new(
            snapshot,
            self.settings.hit_counter_window(),
            self.settings.max_burst_secs,
        );
        self.registry.put(table_name, Arc::new(entity));

        info!(
            table = %table_name,
            overall_rate,
            per_node_rate = snapshot.per_node_rate(),
            num_online_nodes = snapshot.num_online_nodes,
            config_version = %config_version,
            "Rate limiter for table has been initialized"
        );
        true
    }

    pub(super) fn stored_config_version(&self, table_name: &str) -> Option<ConfigVersion> {
        match self.store.config_version(table_name) {
            Ok(version) => version,
            Err(e) => {
                warn!(table = %table_name, error = %e, "Failed to read table config version");
                None
            }
        }
    }
}

impl std::fmt::Debug for QueryQuotaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryQuotaManager")
            .field("local_node_id", &self.local_node_id)
            .field("settings", &self.settings)
            .field("registry_size", &self.registry.len())
            .finish()
    }
}

/// Builds a [`QueryQuotaManager`].
///
/// Setting the local node id or config store twice is reported by `build` as
/// [`QuotaError::AlreadyInitialized`].
#[derive(Default)]
pub struct QueryQuotaManagerBuilder {
    local_node_id: Option<String>,
    store: Option<Arc<dyn QuotaConfigStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    settings: QuotaSettings,
    already_set: Option<&'static str>,
}

impl QueryQuotaManagerBuilder {
    /// Identifier of this node in cluster views.
    pub fn local_node_id(mut self, node_id: impl Into<String>) -> Self {
        if self.local_node_id.replace(node_id.into()).is_some() {
            self.already_set = self.already_set.or(Some("local node id"));
        }
        self
    }

    pub fn config_store(mut self, store: Arc<dyn QuotaConfigStore>) -> Self {
        if self.store.replace(store).is_some() {
            self.already_set = self.already_set.or(Some("config store"));
        }
        self
    }

    /// Optional gauge sink for quota utilization.
    pub fn metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(mut self, settings: QuotaSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<QueryQuotaManager> {
        if let Some(collaborator) = self.already_set {
            return Err(QuotaError::AlreadyInitialized(collaborator));
        }
        let local_node_id = self
            .local_node_id
            .ok_or(QuotaError::MissingCollaborator("local node id"))?;
        let store = self
            .store
            .ok_or(QuotaError::MissingCollaborator("config store"))?;

        Ok(QueryQuotaManager {
            local_node_id,
            store,
            metrics: self.metrics,
            settings: self.settings,
            registry: QuotaRegistry::new(),
            last_view_version: Mutex::new(None),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::mesh::NodeState;
    use crate::quota::store::InMemoryConfigStore;

    pub(crate) const LOCAL_NODE: &str = "broker-0";

    /// A store whose every lookup fails.
    pub(crate) struct FailingStore;

    impl QuotaConfigStore for FailingStore {
        fn quota_config(&self, table_name: &str) -> Result<Option<QuotaConfig>> {
            Err(QuotaError::Store {
                table: table_name.to_string(),
                reason: "connection lost".to_string(),
            })
        }

        fn config_version(&self, table_name: &str) -> Result<Option<ConfigVersion>> {
            Err(QuotaError::Store {
                table: table_name.to_string(),
                reason: "connection lost".to_string(),
            })
        }
    }

    pub(crate) fn manager_with_store(store: Arc<dyn QuotaConfigStore>) -> QueryQuotaManager {
        QueryQuotaManager::builder()
            .local_node_id(LOCAL_NODE)
            .config_store(store)
            .build()
            .unwrap()
    }

    /// A view in which `table` is served by the local node plus `others` online peers.
    pub(crate) fn view_with_online_nodes(version: u64, table: &str, others: usize) -> ClusterView {
        let mut view = ClusterView::new(version);
        view.set_node_state(table, LOCAL_NODE, NodeState::Online);
        for i in 1..=others {
            view.set_node_state(table, &format!("broker-{}", i), NodeState::Online);
        }
        view
    }

    /// Store a quota and register the table with the manager.
    pub(crate) fn register(
        manager: &QueryQuotaManager,
        store: &InMemoryConfigStore,
        table: &str,
        qps: &str,
        view: &ClusterView,
    ) -> bool {
        let config = TableConfig::new(table, Some(QuotaConfig::new(qps)));
        store.put_table_config(&config);
        manager.init_table_quota(&config, Some(view))
    }
}
