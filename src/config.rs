//! Configuration management for tablequota.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{QuotaError, Result};
use crate::mesh::ClusterConfig;
use crate::quota::{QuotaConfig, TableConfig};

/// Prefix for environment variable overrides, e.g. `TABLEQUOTA__NODE__NODE_ID`.
const ENV_PREFIX: &str = "TABLEQUOTA";

/// Main configuration for the tablequota service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TablequotaConfig {
    /// Identity of this node
    #[serde(default)]
    pub node: NodeConfig,

    /// Gossip membership configuration
    #[serde(default)]
    pub cluster: GossipConfig,

    /// Quota enforcement tuning
    #[serde(default)]
    pub quota: QuotaSettings,

    /// Tables whose quotas are loaded at startup
    #[serde(default)]
    pub tables: Vec<TableQuotaEntry>,
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier; a random one is generated when unset
    #[serde(default)]
    pub node_id: Option<String>,

    /// Name of the cluster resource whose view lists the nodes serving each table
    #[serde(default = "default_broker_resource")]
    pub broker_resource: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            broker_resource: default_broker_resource(),
        }
    }
}

fn default_broker_resource() -> String {
    "brokerResource".to_string()
}

/// Gossip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Address to listen on for gossip
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address advertised to peers (defaults to the listen address)
    #[serde(default)]
    pub advertise_addr: Option<SocketAddr>,

    /// Seed nodes used to join an existing cluster
    #[serde(default)]
    pub seed_nodes: Vec<String>,

    /// Cluster identifier; peers must match
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Gossip interval in milliseconds
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,

    /// Grace period before a dead node's state is deleted, in seconds
    #[serde(default = "default_dead_node_grace_period")]
    pub dead_node_grace_period_secs: u64,

    /// How often the membership view is polled for changes, in milliseconds
    #[serde(default = "default_membership_poll_interval")]
    pub membership_poll_interval_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            advertise_addr: None,
            seed_nodes: Vec::new(),
            cluster_id: default_cluster_id(),
            gossip_interval_ms: default_gossip_interval(),
            dead_node_grace_period_secs: default_dead_node_grace_period(),
            membership_poll_interval_ms: default_membership_poll_interval(),
        }
    }
}

impl GossipConfig {
    /// Interval between membership view polls.
    pub fn membership_poll_interval(&self) -> Duration {
        Duration::from_millis(self.membership_poll_interval_ms.max(1))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}

fn default_cluster_id() -> String {
    "tablequota".to_string()
}

fn default_gossip_interval() -> u64 {
    100
}

fn default_dead_node_grace_period() -> u64 {
    3600
}

fn default_membership_poll_interval() -> u64 {
    1000
}

/// Tuning knobs for per-table quota enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Length of the hit counter window in milliseconds
    #[serde(default = "default_hit_counter_window")]
    pub hit_counter_window_ms: u64,

    /// Seconds worth of tokens a limiter may bank while idle
    #[serde(default = "default_max_burst_secs")]
    pub max_burst_secs: f64,

    /// Per-node rate changes smaller than this are not applied
    #[serde(default = "default_rate_change_epsilon")]
    pub rate_change_epsilon: f64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            hit_counter_window_ms: default_hit_counter_window(),
            max_burst_secs: default_max_burst_secs(),
            rate_change_epsilon: default_rate_change_epsilon(),
        }
    }
}

impl QuotaSettings {
    /// Hit counter window as a duration.
    pub fn hit_counter_window(&self) -> Duration {
        Duration::from_millis(self.hit_counter_window_ms.max(1))
    }
}

fn default_hit_counter_window() -> u64 {
    1000
}

fn default_max_burst_secs() -> f64 {
    1.0
}

fn default_rate_change_epsilon() -> f64 {
    0.001
}

/// A table quota entry as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableQuotaEntry {
    /// Table name including its type suffix, e.g. `events_OFFLINE`
    pub table: String,

    /// Cluster-wide queries per second; kept as a string so invalid values can be reported
    #[serde(default)]
    pub max_queries_per_second: Option<String>,
}

impl From<&TableQuotaEntry> for TableConfig {
    fn from(entry: &TableQuotaEntry) -> Self {
        TableConfig::new(
            &entry.table,
            entry
                .max_queries_per_second
                .as_ref()
                .map(|qps| QuotaConfig::new(qps.clone())),
        )
    }
}

impl TablequotaConfig {
    /// Load configuration from a YAML file, layered with `TABLEQUOTA__*` environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| QuotaError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| QuotaError::Config(e.to_string()))
    }

    /// Node identifier, generating a random one when none is configured.
    pub fn resolve_node_id(&self) -> String {
        self.node
            .node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Build the gossip cluster configuration for a node.
    pub fn cluster_config(&self, node_id: &str) -> ClusterConfig {
        ClusterConfig {
            node_id: node_id.to_string(),
            listen_addr: self.cluster.listen_addr,
            advertise_addr: self.cluster.advertise_addr.unwrap_or(self.cluster.listen_addr),
            seed_nodes: self.cluster.seed_nodes.clone(),
            cluster_id: self.cluster.cluster_id.clone(),
            gossip_interval: Duration::from_millis(self.cluster.gossip_interval_ms),
            dead_node_grace_period: Duration::from_secs(self.cluster.dead_node_grace_period_secs),
        }
    }

    /// Table configurations for every configured entry.
    pub fn table_configs(&self) -> Vec<TableConfig> {
        self.tables.iter().map(TableConfig::from).collect()
    }
}
