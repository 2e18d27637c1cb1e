//! Gauge emission for quota utilization.

use metrics::{describe_gauge, gauge};
use std::sync::Once;

/// Gauges reported per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaGauge {
    /// Hits in the last window as a percentage of the per-node rate
    CapacityUtilizationRate,
}

impl QuotaGauge {
    pub fn name(&self) -> &'static str {
        match self {
            QuotaGauge::CapacityUtilizationRate => "query_quota_capacity_utilization_rate",
        }
    }
}

/// Destination for per-table gauges. Calls are fire-and-forget.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, table_name: &str, gauge: QuotaGauge, value: i64);
}

static DESCRIBE: Once = Once::new();

/// Forwards gauges to the globally installed `metrics` recorder.
///
/// Without an installed recorder the gauges are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacadeSink;

impl MetricsFacadeSink {
    pub fn new() -> Self {
        DESCRIBE.call_once(|| {
            describe_gauge!(
                QuotaGauge::CapacityUtilizationRate.name(),
                "Percentage of the per-node query quota used in the last window"
            );
        });
        Self
    }
}

impl MetricsSink for MetricsFacadeSink {
    fn set_gauge(&self, table_name: &str, quota_gauge: QuotaGauge, value: i64) {
        gauge!(quota_gauge.name(), "table" => table_name.to_string()).set(value as f64);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn test_gauge_names() {
        assert_eq!(
            QuotaGauge::CapacityUtilizationRate.name(),
            "query_quota_capacity_utilization_rate"
        );
    }

    #[test]
    fn test_facade_sink_without_recorder() {
        let sink = MetricsFacadeSink::new();
        sink.set_gauge("events_OFFLINE", QuotaGauge::CapacityUtilizationRate, 42);
    }

    #[test]
    fn test_recording_sink_keeps_last_value() {
        let sink = RecordingSink::default();
        sink.set_gauge("events_OFFLINE", QuotaGauge::CapacityUtilizationRate, 10);
        sink.set_gauge("events_OFFLINE", QuotaGauge::CapacityUtilizationRate, 20);

        assert_eq!(
            sink.value("events_OFFLINE", QuotaGauge::CapacityUtilizationRate),
            Some(20)
        );
        assert_eq!(
            sink.value("events_REALTIME", QuotaGauge::CapacityUtilizationRate),
            None
        );
    }
}
