//! Cluster membership.
//!
//! Nodes learn which peers serve which tables from versioned [`ClusterView`]s.
//! [`Cluster`] builds them from chitchat gossip, [`StaticMembership`] holds views
//! set by hand, and [`QuotaChangeHandler`] feeds them to the quota manager.

mod cluster;
mod view;
mod watcher;

pub use cluster::{table_state_key, Cluster, ClusterConfig, ClusterError};
pub use view::{
    online_node_count, ClusterView, MembershipSource, NodeState, StateMap, StaticMembership,
};
pub use watcher::{ChangeType, QuotaChangeHandler};
