//! Turns cluster change notifications into quota recompute passes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::view::MembershipSource;
use crate::error::{QuotaError, Result};
use crate::quota::{QueryQuotaManager, RecomputeOutcome};

/// Shortest polling period `run` accepts.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Kind of cluster change a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The externally observed node-to-table assignment changed
    ExternalView,
    /// The desired node-to-table assignment changed
    IdealState,
    /// A node's live instance record changed
    LiveInstance,
}

/// Feeds cluster views of one resource to a quota manager.
pub struct QuotaChangeHandler {
    manager: Arc<QueryQuotaManager>,
    source: Arc<dyn MembershipSource>,
    resource: String,
}

impl QuotaChangeHandler {
    pub fn new(
        manager: Arc<QueryQuotaManager>,
        source: Arc<dyn MembershipSource>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            source,
            resource: resource.into(),
        }
    }

    pub fn manager(&self) -> &Arc<QueryQuotaManager> {
        &self.manager
    }

    /// Recompute quotas after a cluster change. Only external view changes are handled.
    pub async fn process_cluster_change(
        &self,
        change_type: ChangeType,
    ) -> Result<RecomputeOutcome> {
        if change_type != ChangeType::ExternalView {
            return Err(QuotaError::IllegalChangeType(format!("{:?}", change_type)));
        }

        let view = self.source.current_view(&self.resource).await;
        Ok(self.manager.process_quota_change(view.as_ref()))
    }

    /// Poll the membership source until `shutdown` completes.
    ///
    /// Views whose version was already processed are skipped by the manager, so
    /// polling is cheap while the cluster is stable. A zero `poll_interval` is
    /// raised to one millisecond.
    pub async fn run<F>(&self, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        info!(
            resource = %self.resource,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Starting quota change handler"
        );

        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let outcome = self.process_cluster_change(ChangeType::ExternalView).await;
                    if let Ok(outcome) = outcome {
                        debug!(outcome = ?outcome, "Processed cluster change");
                    }
                }
            }
        }

        info!(resource = %self.resource, "Quota change handler stopped");
    }
}

impl std::fmt::Debug for QuotaChangeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaChangeHandler")
            .field("resource", &self.resource)
            .field("manager", &self.manager)
            .finish()
    }
}
