use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::KVError;
use crate::table::ConfigTable;
use crate::traits::ConfigStore;

/// MemoryStore is an in-process ConfigStore.
///
/// Used when no user is logged in (nothing is persisted) and in tests.
/// The write lock serializes concurrent writes.
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, ConfigTable>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of tables across all owners.
    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> KVError {
    KVError::Storage("memory store lock poisoned".to_string())
}

impl ConfigStore for MemoryStore {
    fn get(&self, table_name: &str) -> Result<Option<ConfigTable>, KVError> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.get(table_name).cloned())
    }

    fn put(&self, table: &ConfigTable) -> Result<(), KVError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.insert(table.name.clone(), table.clone());
        Ok(())
    }

    fn delete(&self, table_name: &str) -> Result<bool, KVError> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.remove(table_name).is_some())
    }

    fn list(&self, owner: &str) -> Result<Vec<String>, KVError> {
        let tables = self.tables.read().map_err(poisoned)?;
        // BTreeMap iteration is already sorted by name.
        Ok(tables
            .values()
            .filter(|t| t.owner == owner)
            .map(|t| t.name.clone())
            .collect())
    }
}
