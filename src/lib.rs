//! Tablequota - Cluster-wide Per-Table Query Quotas
//!
//! This crate enforces a configured queries-per-second limit for each table
//! across a cluster of query-routing nodes. Every node admits queries against its
//! own share of the limit, derived from the number of online nodes serving the
//! table. Membership is learned through gossip, so no node ever asks another
//! before admitting a query.

pub mod config;
pub mod error;
pub mod mesh;
pub mod quota;
pub mod ratelimit;
