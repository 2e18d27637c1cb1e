//! Error types for the quota controller.

use thiserror::Error;

use crate::mesh::ClusterError;

/// Main error type for quota controller operations.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration store lookups that failed (as opposed to finding nothing)
    #[error("Config store error for table {table}: {reason}")]
    Store { table: String, reason: String },

    /// A collaborator was attached to the manager builder more than once
    #[error("Query quota manager is already initialized with a {0}")]
    AlreadyInitialized(&'static str),

    /// The manager builder was finished without a required collaborator
    #[error("Query quota manager is missing a {0}")]
    MissingCollaborator(&'static str),

    /// A cluster change notification of a kind the quota manager does not handle
    #[error("Illegal change type: {0}")]
    IllegalChangeType(String),

    /// Gossip cluster errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quota controller operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
