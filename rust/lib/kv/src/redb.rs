use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::KVError;
use crate::table::ConfigTable;
use crate::traits::ConfigStore;

/// Table name → JSON-encoded ConfigTable.
const TABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("config_tables");

/// Owner index: `{owner}\0{table_name}` → table name.
const OWNERS: TableDefinition<&str, &str> = TableDefinition::new("config_owners");

fn owner_key(owner: &str, table_name: &str) -> String {
    format!("{}\0{}", owner, table_name)
}

/// RedbStore is a ConfigStore backed by redb, a pure-Rust embedded
/// key-value database.
///
/// A table and its owner index entry are always written in the same write
/// transaction. redb allows a single writer at a time, so writes to the same
/// table name are serialized.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, KVError> {
        let db = Database::create(path).map_err(|e| KVError::Storage(e.to_string()))?;

        // Ensure both tables exist so readers never hit a missing table.
        let write_txn = db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            write_txn
                .open_table(TABLES)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            write_txn
                .open_table(OWNERS)
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;

        debug!("RedbStore: opened {:?}", path);
        Ok(Self { db: Arc::new(db) })
    }
}

impl ConfigStore for RedbStore {
    fn get(&self, table_name: &str) -> Result<Option<ConfigTable>, KVError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let table = read_txn
            .open_table(TABLES)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        match table.get(table_name) {
            Ok(Some(val)) => Ok(Some(ConfigTable::from_bytes(val.value())?)),
            Ok(None) => Ok(None),
            Err(e) => Err(KVError::Storage(e.to_string())),
        }
    }

    fn put(&self, config: &ConfigTable) -> Result<(), KVError> {
        let bytes = config.to_bytes()?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        {
            let mut tables = write_txn
                .open_table(TABLES)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            let mut owners = write_txn
                .open_table(OWNERS)
                .map_err(|e| KVError::Storage(e.to_string()))?;

            // Re-owning a table moves its index entry.
            let previous_owner = match tables
                .get(config.name.as_str())
                .map_err(|e| KVError::Storage(e.to_string()))?
            {
                Some(val) => Some(ConfigTable::from_bytes(val.value())?.owner),
                None => None,
            };
            if let Some(prev) = previous_owner {
                if prev != config.owner {
                    owners
                        .remove(owner_key(&prev, &config.name).as_str())
                        .map_err(|e| KVError::Storage(e.to_string()))?;
                }
            }

            tables
                .insert(config.name.as_str(), bytes.as_slice())
                .map_err(|e| KVError::Storage(e.to_string()))?;
            owners
                .insert(
                    owner_key(&config.owner, &config.name).as_str(),
                    config.name.as_str(),
                )
                .map_err(|e| KVError::Storage(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, table_name: &str) -> Result<bool, KVError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let existed;
        {
            let mut tables = write_txn
                .open_table(TABLES)
                .map_err(|e| KVError::Storage(e.to_string()))?;
            let mut owners = write_txn
                .open_table(OWNERS)
                .map_err(|e| KVError::Storage(e.to_string()))?;

            let removed_owner = match tables
                .remove(table_name)
                .map_err(|e| KVError::Storage(e.to_string()))?
            {
                Some(val) => Some(ConfigTable::from_bytes(val.value())?.owner),
                None => None,
            };
            existed = removed_owner.is_some();
            if let Some(owner) = removed_owner {
                owners
                    .remove(owner_key(&owner, table_name).as_str())
                    .map_err(|e| KVError::Storage(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        Ok(existed)
    }

    fn list(&self, owner: &str) -> Result<Vec<String>, KVError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| KVError::Storage(e.to_string()))?;
        let owners = read_txn
            .open_table(OWNERS)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        let prefix = owner_key(owner, "");
        let mut results = Vec::new();
        let iter = owners
            .range(prefix.as_str()..)
            .map_err(|e| KVError::Storage(e.to_string()))?;

        for entry in iter {
            let entry = entry.map_err(|e| KVError::Storage(e.to_string()))?;
            if !entry.0.value().starts_with(&prefix) {
                break;
            }
            results.push(entry.1.value().to_string());
        }

        Ok(results)
    }
}
