//! Versioned cluster view snapshots.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Lifecycle state of a node for one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeState {
    Online,
    Offline,
    Error,
    Dropped,
    /// Any state string this crate does not interpret
    Other(String),
}

impl NodeState {
    pub fn as_str(&self) -> &str {
        match self {
            NodeState::Online => "ONLINE",
            NodeState::Offline => "OFFLINE",
            NodeState::Error => "ERROR",
            NodeState::Dropped => "DROPPED",
            NodeState::Other(state) => state.as_str(),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, NodeState::Online)
    }
}

impl From<&str> for NodeState {
    fn from(state: &str) -> Self {
        match state {
            "ONLINE" => NodeState::Online,
            "OFFLINE" => NodeState::Offline,
            "ERROR" => NodeState::Error,
            "DROPPED" => NodeState::Dropped,
            other => NodeState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node id → state, for one table.
pub type StateMap = HashMap<String, NodeState>;

/// Which nodes serve which tables, as of one version of the cluster state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterView {
    version: u64,
    tables: HashMap<String, StateMap>,
}

impl ClusterView {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            tables: HashMap::new(),
        }
    }

    pub fn from_tables(version: u64, tables: HashMap<String, StateMap>) -> Self {
        Self { version, tables }
    }

    /// Add a node's state for a table.
    pub fn with_node_state(mut self, table_name: &str, node_id: &str, state: NodeState) -> Self {
        self.set_node_state(table_name, node_id, state);
        self
    }

    pub fn set_node_state(&mut self, table_name: &str, node_id: &str, state: NodeState) {
        self.tables
            .entry(table_name.to_string())
            .or_default()
            .insert(node_id.to_string(), state);
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Node states for a table, or `None` if the table is not part of the view.
    pub fn state_map(&self, table_name: &str) -> Option<&StateMap> {
        self.tables.get(table_name)
    }

    pub fn tables(&self) -> &HashMap<String, StateMap> {
        &self.tables
    }
}

/// Number of online nodes serving a table, counting `local_node_id` exactly once.
///
/// The local node is always counted, whatever its reported state. A missing state
/// map means no other node serves the table yet.
pub fn online_node_count(state_map: Option<&StateMap>, local_node_id: &str) -> usize {
    let others = state_map
        .map(|states| {
            states
                .iter()
                .filter(|(node_id, state)| node_id.as_str() != local_node_id && state.is_online())
                .count()
        })
        .unwrap_or(0);

    others + 1
}

/// Source of cluster views.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Identifier of this node as it appears in cluster views.
    fn local_node_id(&self) -> &str;

    /// Current view of a resource, or `None` if it is not available.
    async fn current_view(&self, resource: &str) -> Option<ClusterView>;
}

/// A membership source whose views are set by hand.
///
/// Useful for embedding without a gossip cluster and for tests.
#[derive(Debug)]
pub struct StaticMembership {
    local_node_id: String,
    views: RwLock<HashMap<String, ClusterView>>,
}

impl StaticMembership {
    pub fn new(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            views: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_view(&self, resource: &str, view: ClusterView) {
        self.views.write().insert(resource.to_string(), view);
    }

    pub fn clear_view(&self, resource: &str) {
        self.views.write().remove(resource);
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    async fn current_view(&self, resource: &str) -> Option<ClusterView> {
        self.views.read().get(resource).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_parsing() {
        assert_eq!(NodeState::from("ONLINE"), NodeState::Online);
        assert_eq!(NodeState::from("OFFLINE"), NodeState::Offline);
        assert_eq!(NodeState::from("ERROR"), NodeState::Error);
        assert_eq!(NodeState::from("DROPPED"), NodeState::Dropped);
        assert_eq!(
            NodeState::from("BOOTSTRAP"),
            NodeState::Other("BOOTSTRAP".to_string())
        );
        assert_eq!(NodeState::from("online"), NodeState::Other("online".to_string()));
        assert_eq!(NodeState::Online.to_string(), "ONLINE");
    }

    #[test]
    fn test_online_count_excludes_local_node() {
        let view = ClusterView::new(1)
            .with_node_state("events_OFFLINE", "local", NodeState::Online)
            .with_node_state("events_OFFLINE", "b", NodeState::Online)
            .with_node_state("events_OFFLINE", "c", NodeState::Offline)
            .with_node_state("events_OFFLINE", "d", NodeState::Online);

        assert_eq!(online_node_count(view.state_map("events_OFFLINE"), "local"), 3);
    }

    #[test]
    fn test_local_node_counted_even_when_offline() {
        let view = ClusterView::new(1)
            .with_node_state("events_OFFLINE", "local", NodeState::Offline)
            .with_node_state("events_OFFLINE", "b", NodeState::Online);

        assert_eq!(online_node_count(view.state_map("events_OFFLINE"), "local"), 2);
    }

    #[test]
    fn test_missing_state_map_counts_only_local_node() {
        let view = ClusterView::new(1);
        assert!(view.state_map("events_OFFLINE").is_none());
        assert_eq!(online_node_count(view.state_map("events_OFFLINE"), "local"), 1);
    }

    #[test]
    fn test_static_membership() {
        let membership = StaticMembership::new("local");
        assert_eq!(membership.local_node_id(), "local");
        assert!(tokio_test::block_on(membership.current_view("brokerResource")).is_none());

        membership.set_view("brokerResource", ClusterView::new(4));
        let view = tokio_test::block_on(membership.current_view("brokerResource"));
        assert_eq!(view.map(|v| v.version()), Some(4));

        membership.clear_view("brokerResource");
        assert!(tokio_test::block_on(membership.current_view("brokerResource")).is_none());
    }
}
