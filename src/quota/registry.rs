//! Concurrent table → quota entity map.

use dashmap::DashMap;
use std::sync::Arc;

use super::entity::QuotaEntity;

/// Quota entities keyed by type-qualified table name.
///
/// Lookups hand out `Arc` clones, so callers never hold a shard lock while they
/// acquire tokens or recompute rates.
#[derive(Debug, Default)]
pub struct QuotaRegistry {
    entities: DashMap<String, Arc<QuotaEntity>>,
}

impl QuotaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any previous one for the table.
    pub fn put(&self, table_name: &str, entity: Arc<QuotaEntity>) -> Option<Arc<QuotaEntity>> {
        self.entities.insert(table_name.to_string(), entity)
    }

    pub fn get(&self, table_name: &str) -> Option<Arc<QuotaEntity>> {
        self.entities.get(table_name).map(|entry| entry.value().clone())
    }

    /// Remove the entity for a table. Removing an unknown table is a no-op.
    pub fn remove(&self, table_name: &str) -> Option<Arc<QuotaEntity>> {
        self.entities.remove(table_name).map(|(_, entity)| entity)
    }

    /// Remove the entity for a table only if it is still `expected`.
    ///
    /// Returns `true` if the entity was removed.
    pub fn remove_if_same(&self, table_name: &str, expected: &Arc<QuotaEntity>) -> bool {
        self.entities
            .remove_if(table_name, |_, current| Arc::ptr_eq(current, expected))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&self) {
        self.entities.clear();
    }

    /// Point-in-time copy of all entries.
    ///
    /// The registry can be freely mutated, including removal of the entries being
    /// visited, while the returned entries are processed.
    pub fn snapshot_entries(&self) -> Vec<(String, Arc<QuotaEntity>)> {
        self.entities
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::entity::QuotaSnapshot;
    use crate::quota::store::ConfigVersion;
    use std::time::Duration;

    fn entity(rate: f64) -> Arc<QuotaEntity> {
        Arc::new(QuotaEntity::new(
            QuotaSnapshot::new(1, rate, ConfigVersion(0)),
            Duration::from_secs(1),
            1.0,
        ))
    }

    #[test]
    fn test_put_get_remove() {
        let registry = QuotaRegistry::new();
        assert!(registry.is_empty());

        registry.put("events_OFFLINE", entity(10.0));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("events_OFFLINE").map(|e| e.rate_limiter().rate()),
            Some(10.0)
        );
        assert!(registry.get("events_REALTIME").is_none());

        assert!(registry.remove("events_OFFLINE").is_some());
        assert!(registry.remove("events_OFFLINE").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_put_replaces() {
        let registry = QuotaRegistry::new();
        registry.put("events_OFFLINE", entity(10.0));
        let previous = registry.put("events_OFFLINE", entity(20.0));

        assert_eq!(previous.map(|e| e.rate_limiter().rate()), Some(10.0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_if_same_ignores_replaced_entity() {
        let registry = QuotaRegistry::new();
        let stale = entity(10.0);
        registry.put("events_OFFLINE", stale.clone());
        registry.put("events_OFFLINE", entity(20.0));

        assert!(!registry.remove_if_same("events_OFFLINE", &stale));
        assert_eq!(registry.len(), 1);

        let current = registry.get("events_OFFLINE").unwrap();
        assert!(registry.remove_if_same("events_OFFLINE", &current));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_while_iterating_snapshot() {
        let registry = QuotaRegistry::new();
        for i in 0..10 {
            registry.put(&format!("table{}_OFFLINE", i), entity(i as f64 + 1.0));
        }

        for (table, _) in registry.snapshot_entries() {
            registry.remove(&table);
        }

        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_mutation() {
        let registry = Arc::new(QuotaRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let table = format!("t{}_{}_OFFLINE", t, i);
                        registry.put(&table, entity(1.0));
                        let _ = registry.snapshot_entries();
                        if i % 2 == 0 {
                            registry.remove(&table);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 200);
    }
}
