//! Table names, serving variants and per-table quota configuration.

use serde::{Deserialize, Serialize};

/// Serving variant of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableType {
    Offline,
    Realtime,
}

impl TableType {
    /// Suffix appended to a raw table name for this variant.
    pub fn suffix(&self) -> &'static str {
        match self {
            TableType::Offline => "_OFFLINE",
            TableType::Realtime => "_REALTIME",
        }
    }

    /// The other serving variant.
    pub fn sibling(&self) -> TableType {
        match self {
            TableType::Offline => TableType::Realtime,
            TableType::Realtime => TableType::Offline,
        }
    }

    /// Detect the variant from a type-qualified table name.
    pub fn from_table_name(table_name: &str) -> Option<TableType> {
        [TableType::Offline, TableType::Realtime]
            .into_iter()
            .find(|table_type| table_name.ends_with(table_type.suffix()))
    }

    /// Qualify a table name with this variant's suffix.
    ///
    /// Names that already carry the suffix are returned unchanged.
    pub fn table_name_with_type(&self, table_name: &str) -> String {
        if table_name.ends_with(self.suffix()) {
            table_name.to_string()
        } else {
            format!("{}{}", table_name, self.suffix())
        }
    }
}

/// Strip the type suffix, if any, from a table name.
pub fn raw_table_name(table_name: &str) -> &str {
    match TableType::from_table_name(table_name) {
        Some(table_type) => &table_name[..table_name.len() - table_type.suffix().len()],
        None => table_name,
    }
}

/// The concrete table(s) a query against a table name must be admitted by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableTarget {
    /// A type-qualified offline table
    Offline(String),
    /// A type-qualified realtime table
    Realtime(String),
    /// An unqualified name, covering both variants
    Both { offline: String, realtime: String },
}

impl TableTarget {
    /// Resolve a possibly unqualified table name.
    pub fn resolve(table_name: &str) -> Self {
        match TableType::from_table_name(table_name) {
            Some(TableType::Offline) => TableTarget::Offline(table_name.to_string()),
            Some(TableType::Realtime) => TableTarget::Realtime(table_name.to_string()),
            None => TableTarget::Both {
                offline: TableType::Offline.table_name_with_type(table_name),
                realtime: TableType::Realtime.table_name_with_type(table_name),
            },
        }
    }

    /// Type-qualified names of every resolved variant, offline first.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        let (first, second) = match self {
            TableTarget::Offline(name) | TableTarget::Realtime(name) => (name.as_str(), None),
            TableTarget::Both { offline, realtime } => (offline.as_str(), Some(realtime.as_str())),
        };
        std::iter::once(first).chain(second)
    }
}

/// Query quota settings of a single table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Cluster-wide queries per second, as configured
    #[serde(default)]
    pub max_queries_per_second: Option<String>,
}

impl QuotaConfig {
    /// Create a quota config from a configured queries-per-second value.
    pub fn new(max_queries_per_second: impl Into<String>) -> Self {
        Self {
            max_queries_per_second: Some(max_queries_per_second.into()),
        }
    }

    /// The configured value, if present and non-empty.
    pub fn raw_max_qps(&self) -> Option<&str> {
        self.max_queries_per_second
            .as_deref()
            .map(str::trim)
            .filter(|qps| !qps.is_empty())
    }

    /// The configured rate, if it is a finite positive number.
    pub fn max_qps(&self) -> Option<f64> {
        self.raw_max_qps()?
            .parse::<f64>()
            .ok()
            .filter(|qps| qps.is_finite() && *qps > 0.0)
    }
}

/// A type-qualified table and its quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    table_name: String,
    #[serde(default)]
    quota: Option<QuotaConfig>,
}

impl TableConfig {
    /// Create a table config. `table_name` should carry a type suffix.
    pub fn new(table_name: &str, quota: Option<QuotaConfig>) -> Self {
        Self {
            table_name: table_name.to_string(),
            quota,
        }
    }

    /// Table name including its type suffix.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Serving variant, when the name is type-qualified.
    pub fn table_type(&self) -> Option<TableType> {
        TableType::from_table_name(&self.table_name)
    }

    pub fn quota(&self) -> Option<&QuotaConfig> {
        self.quota.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_type_detection() {
        assert_eq!(TableType::from_table_name("events_OFFLINE"), Some(TableType::Offline));
        assert_eq!(TableType::from_table_name("events_REALTIME"), Some(TableType::Realtime));
        assert_eq!(TableType::from_table_name("events"), None);
        assert_eq!(TableType::from_table_name("events_offline"), None);
    }

    #[test]
    fn test_table_name_with_type() {
        assert_eq!(TableType::Offline.table_name_with_type("events"), "events_OFFLINE");
        assert_eq!(TableType::Realtime.table_name_with_type("events"), "events_REALTIME");
        assert_eq!(
            TableType::Realtime.table_name_with_type("events_REALTIME"),
            "events_REALTIME"
        );
    }

    #[test]
    fn test_raw_table_name() {
        assert_eq!(raw_table_name("events_OFFLINE"), "events");
        assert_eq!(raw_table_name("events_REALTIME"), "events");
        assert_eq!(raw_table_name("events"), "events");
    }

    #[test]
    fn test_resolve_qualified_names() {
        assert_eq!(
            TableTarget::resolve("events_OFFLINE"),
            TableTarget::Offline("events_OFFLINE".to_string())
        );
        assert_eq!(
            TableTarget::resolve("events_REALTIME"),
            TableTarget::Realtime("events_REALTIME".to_string())
        );
    }

    #[test]
    fn test_resolve_unqualified_name() {
        let target = TableTarget::resolve("events");
        assert_eq!(
            target,
            TableTarget::Both {
                offline: "events_OFFLINE".to_string(),
                realtime: "events_REALTIME".to_string(),
            }
        );
        assert_eq!(
            target.table_names().collect::<Vec<_>>(),
            vec!["events_OFFLINE", "events_REALTIME"]
        );
    }

    #[test]
    fn test_single_target_names() {
        let target = TableTarget::resolve("events_OFFLINE");
        assert_eq!(target.table_names().collect::<Vec<_>>(), vec!["events_OFFLINE"]);
    }

    #[test]
    fn test_quota_validity() {
        assert_eq!(QuotaConfig::new("100").max_qps(), Some(100.0));
        assert_eq!(QuotaConfig::new(" 2.5 ").max_qps(), Some(2.5));
        assert_eq!(QuotaConfig::new("abc").max_qps(), None);
        assert_eq!(QuotaConfig::new("0").max_qps(), None);
        assert_eq!(QuotaConfig::new("-5").max_qps(), None);
        assert_eq!(QuotaConfig::new("NaN").max_qps(), None);
        assert_eq!(QuotaConfig::new("inf").max_qps(), None);
        assert_eq!(QuotaConfig::new("").raw_max_qps(), None);
        assert_eq!(QuotaConfig::default().max_qps(), None);
    }

    #[test]
    fn test_table_config_accessors() {
        let config = TableConfig::new("events_REALTIME", Some(QuotaConfig::new("10")));
        assert_eq!(config.table_name(), "events_REALTIME");
        assert_eq!(config.table_type(), Some(TableType::Realtime));
        assert_eq!(config.quota().and_then(QuotaConfig::max_qps), Some(10.0));
    }
}
