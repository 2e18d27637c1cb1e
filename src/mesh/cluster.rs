//! Cluster membership using Chitchat.
//!
//! Every node gossips the state it serves each table in, under keys of the form
//! `resource|{resource}|{table}`. Reading those keys back from every live node
//! yields a [`ClusterView`] of the resource.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use thiserror::Error;
use tracing::{debug, info};

use super::view::{ClusterView, MembershipSource, NodeState, StateMap};

/// Errors that can occur in cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to start cluster: {0}")]
    StartError(String),
    #[error("Failed to shut down cluster: {0}")]
    ShutdownError(String),
}

/// Configuration for the cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Unique node identifier.
    pub node_id: String,
    /// The address to listen on for gossip.
    pub listen_addr: SocketAddr,
    /// The address to advertise to other nodes.
    pub advertise_addr: SocketAddr,
    /// Seed nodes to bootstrap cluster membership.
    pub seed_nodes: Vec<String>,
    /// Cluster identifier (nodes must have matching cluster IDs).
    pub cluster_id: String,
    /// How often to gossip with peers.
    pub gossip_interval: Duration,
    /// Grace period before considering a dead node's state deletable.
    pub dead_node_grace_period: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 7946));
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: default_addr,
            advertise_addr: default_addr,
            seed_nodes: Vec::new(),
            cluster_id: "tablequota".to_string(),
            gossip_interval: Duration::from_millis(100),
            dead_node_grace_period: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Chitchat key holding a node's state for one table of a resource.
pub fn table_state_key(resource: &str, table_name: &str) -> String {
    format!("resource|{}|{}", resource, table_name)
}

/// Last view handed out for a resource.
#[derive(Debug, Default)]
struct TrackedView {
    version: u64,
    tables: HashMap<String, StateMap>,
}

/// The cluster handle for gossiped table membership.
pub struct Cluster {
    /// Our node ID.
    node_id: String,
    /// Chitchat handle.
    handle: ChitchatHandle,
    /// Tables read back into views, per resource
    watched: parking_lot::Mutex<HashMap<String, BTreeSet<String>>>,
    views: parking_lot::Mutex<HashMap<String, TrackedView>>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.node_id)
            .field("watched", &*self.watched.lock())
            .finish()
    }
}

impl Cluster {
    /// Create and start a new cluster node.
    pub async fn start(config: ClusterConfig) -> Result<Self, ClusterError> {
        info!(
            node_id = %config.node_id,
            listen_addr = %config.listen_addr,
            advertise_addr = %config.advertise_addr,
            seed_nodes = ?config.seed_nodes,
            cluster_id = %config.cluster_id,
            "Starting cluster node"
        );

        let chitchat_id = ChitchatId {
            node_id: config.node_id.clone(),
            generation_id: 0,
            gossip_advertise_addr: config.advertise_addr,
        };

        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: config.cluster_id.clone(),
            gossip_interval: config.gossip_interval,
            listen_addr: config.listen_addr,
            seed_nodes: config.seed_nodes.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: config.gossip_interval,
                ..Default::default()
            },
            marked_for_deletion_grace_period: config.dead_node_grace_period,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let transport = UdpTransport;
        let handle = spawn_chitchat(chitchat_config, Vec::new(), &transport)
            .await
            .map_err(|e| ClusterError::StartError(e.to_string()))?;

        info!("Cluster node started successfully");

        Ok(Self {
            node_id: config.node_id,
            handle,
            watched: parking_lot::Mutex::new(HashMap::new()),
            views: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Get our node ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Gossip this node's state for a table and include the table in future views.
    pub async fn publish_table_state(&self, resource: &str, table_name: &str, state: NodeState) {
        let key = table_state_key(resource, table_name);
        {
            let chitchat_arc = self.handle.chitchat();
            let mut chitchat = chitchat_arc.lock().await;
            chitchat.self_node_state().set(&key, state.as_str().to_string());
        }
        debug!(key = %key, state = %state, "Published table state");

        self.watch_table(resource, table_name);
    }

    /// Include a table in future views of a resource without publishing a state for it.
    pub fn watch_table(&self, resource: &str, table_name: &str) {
        self.watched
            .lock()
            .entry(resource.to_string())
            .or_default()
            .insert(table_name.to_string());
    }

    /// Get the number of live nodes in the cluster.
    pub async fn live_node_count(&self) -> usize {
        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;
        chitchat.live_nodes().count()
    }

    /// Read every watched table's state from every live node.
    async fn collect_tables(&self, resource: &str) -> HashMap<String, StateMap> {
        let watched: Vec<String> = self
            .watched
            .lock()
            .get(resource)
            .map(|tables| tables.iter().cloned().collect())
            .unwrap_or_default();

        let chitchat_arc = self.handle.chitchat();
        let chitchat = chitchat_arc.lock().await;

        let mut tables = HashMap::new();
        for table_name in watched {
            let key = table_state_key(resource, &table_name);
            let mut states = StateMap::new();
            for node_id in chitchat.live_nodes() {
                let state = chitchat
                    .node_state(node_id)
                    .and_then(|node_state| node_state.get(&key));
                if let Some(state) = state {
                    states.insert(node_id.node_id.clone(), NodeState::from(state));
                }
            }
            if !states.is_empty() {
                tables.insert(table_name, states);
            }
        }
        tables
    }

    /// Shutdown the cluster node gracefully.
    pub async fn shutdown(self) -> Result<(), ClusterError> {
        info!(node_id = %self.node_id, "Shutting down cluster node");
        self.handle
            .shutdown()
            .await
            .map_err(|e| ClusterError::ShutdownError(format!("{:?}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MembershipSource for Cluster {
    fn local_node_id(&self) -> &str {
        &self.node_id
    }

    /// The version moves forward whenever the assembled table states differ from
    /// the previous view of the resource.
    async fn current_view(&self, resource: &str) -> Option<ClusterView> {
        let tables = self.collect_tables(resource).await;

        let mut views = self.views.lock();
        let tracked = views.entry(resource.to_string()).or_default();
        if tracked.version == 0 || tracked.tables != tables {
            tracked.version += 1;
            tracked.tables = tables;
            debug!(
                resource = %resource,
                version = tracked.version,
                tables = tracked.tables.len(),
                "Cluster view changed"
            );
        }

        Some(ClusterView::from_tables(tracked.version, tracked.tables.clone()))
    }
}
