//! Table quota configuration store.
//!
//! The quota manager reads quota configs and their version stamps through the
//! [`QuotaConfigStore`] trait. [`InMemoryConfigStore`] is a versioned in-process
//! implementation, loadable from YAML.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::table::{QuotaConfig, TableConfig};
use crate::config::TableQuotaEntry;
use crate::error::{QuotaError, Result};

/// Version stamp of a stored table config. Every write produces a larger stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigVersion(pub u64);

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of per-table quota configuration.
///
/// `Ok(None)` means the table has no stored config. Errors are reserved for
/// lookups that could not be answered.
pub trait QuotaConfigStore: Send + Sync {
    /// Quota config of a type-qualified table.
    fn quota_config(&self, table_name: &str) -> Result<Option<QuotaConfig>>;

    /// Version of a type-qualified table's stored config.
    fn config_version(&self, table_name: &str) -> Result<Option<ConfigVersion>>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    quota: Option<QuotaConfig>,
    version: ConfigVersion,
}

#[derive(Debug, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    tables: Vec<TableQuotaEntry>,
}

/// Versioned in-memory table config store.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    next_version: AtomicU64,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given table configs.
    pub fn from_table_configs<'a, I>(configs: I) -> Self
    where
        I: IntoIterator<Item = &'a TableConfig>,
    {
        let store = Self::new();
        for config in configs {
            store.put_table_config(config);
        }
        store
    }

    /// Load table configs from a YAML document with a top-level `tables` list.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: StoreDocument = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse table configs: {}", e)))?;
        let configs: Vec<TableConfig> = document.tables.iter().map(TableConfig::from).collect();
        Ok(Self::from_table_configs(&configs))
    }

    /// Load table configs from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading table quota configs");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Store a table's config and return its new version.
    pub fn put_table_config(&self, config: &TableConfig) -> ConfigVersion {
        self.set_quota(config.table_name(), config.quota().cloned())
    }

    /// Replace a table's quota and return its new version.
    pub fn set_quota(&self, table_name: &str, quota: Option<QuotaConfig>) -> ConfigVersion {
        let version = ConfigVersion(self.next_version.fetch_add(1, Ordering::SeqCst));
        debug!(table = %table_name, version = %version, "Storing table quota config");

        self.records
            .write()
            .insert(table_name.to_string(), StoredRecord { quota, version });
        version
    }

    /// Delete a table's config. Returns `true` if the table was present.
    pub fn delete_table(&self, table_name: &str) -> bool {
        self.records.write().remove(table_name).is_some()
    }

    /// Names of all stored tables.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Full table config of a stored table.
    pub fn table_config(&self, table_name: &str) -> Option<TableConfig> {
        self.records
            .read()
            .get(table_name)
            .map(|record| TableConfig::new(table_name, record.quota.clone()))
    }
}

impl QuotaConfigStore for InMemoryConfigStore {
    fn quota_config(&self, table_name: &str) -> Result<Option<QuotaConfig>> {
        Ok(self
            .records
            .read()
            .get(table_name)
            .and_then(|record| record.quota.clone()))
    }

    fn config_version(&self, table_name: &str) -> Result<Option<ConfigVersion>> {
        Ok(self.records.read().get(table_name).map(|record| record.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increase_on_every_write() {
        let store = InMemoryConfigStore::new();
        let v1 = store.set_quota("events_OFFLINE", Some(QuotaConfig::new("10")));
        let v2 = store.set_quota("events_OFFLINE", Some(QuotaConfig::new("20")));
        let v3 = store.set_quota("clicks_REALTIME", None);

        assert!(v1 < v2 && v2 < v3);
        assert_eq!(store.config_version("events_OFFLINE").unwrap(), Some(v2));
        assert_eq!(
            store.quota_config("events_OFFLINE").unwrap(),
            Some(QuotaConfig::new("20"))
        );
    }

    #[test]
    fn test_table_without_quota() {
        let store = InMemoryConfigStore::new();
        store.set_quota("clicks_REALTIME", None);

        assert!(store.config_version("clicks_REALTIME").unwrap().is_some());
        assert_eq!(store.quota_config("clicks_REALTIME").unwrap(), None);
    }

    #[test]
    fn test_delete_table() {
        let store = InMemoryConfigStore::new();
        store.set_quota("events_OFFLINE", Some(QuotaConfig::new("10")));

        assert!(store.delete_table("events_OFFLINE"));
        assert!(!store.delete_table("events_OFFLINE"));
        assert_eq!(store.config_version("events_OFFLINE").unwrap(), None);
        assert_eq!(store.quota_config("events_OFFLINE").unwrap(), None);
    }

    #[test]
    fn test_recreated_table_gets_newer_version() {
        let store = InMemoryConfigStore::new();
        let first = store.set_quota("events_OFFLINE", Some(QuotaConfig::new("10")));
        store.delete_table("events_OFFLINE");
        let second = store.set_quota("events_OFFLINE", Some(QuotaConfig::new("10")));

        assert!(second > first);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
tables:
  - table: events_OFFLINE
    max_queries_per_second: "100"
  - table: events_REALTIME
    max_queries_per_second: "50"
  - table: clicks_OFFLINE
"#;
        let store = InMemoryConfigStore::from_yaml(yaml).unwrap();

        assert_eq!(
            store.table_names(),
            vec!["clicks_OFFLINE", "events_OFFLINE", "events_REALTIME"]
        );
        assert_eq!(
            store
                .quota_config("events_REALTIME")
                .unwrap()
                .and_then(|q| q.max_qps()),
            Some(50.0)
        );
        assert_eq!(
            store.table_config("clicks_OFFLINE"),
            Some(TableConfig::new("clicks_OFFLINE", None))
        );
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir()
            .join(format!("tablequota-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "tables:\n  - table: events_OFFLINE\n    max_queries_per_second: \"25\"\n",
        )
        .unwrap();

        let store = InMemoryConfigStore::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(store.table_names(), vec!["events_OFFLINE"]);
        assert_eq!(
            store
                .quota_config("events_OFFLINE")
                .unwrap()
                .and_then(|q| q.max_qps()),
            Some(25.0)
        );
    }

    #[test]
    fn test_from_missing_file() {
        let path = std::env::temp_dir()
            .join(format!("tablequota-{}.yaml", uuid::Uuid::new_v4()));
        assert!(matches!(
            InMemoryConfigStore::from_file(&path),
            Err(QuotaError::Io(_))
        ));
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = InMemoryConfigStore::from_yaml("tables: [1, 2");
        assert!(matches!(result, Err(QuotaError::Config(_))));
    }
}
