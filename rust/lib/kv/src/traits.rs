use crate::error::KVError;
use crate::table::ConfigTable;

/// ConfigStore persists named configuration tables, each owned by one user
/// account.
///
/// Table names are globally unique storage keys. Implementations serialize
/// concurrent writes to the same table name; a `put` replaces the whole table.
pub trait ConfigStore: Send + Sync {
    /// Get a table by name. Returns None if the table does not exist.
    fn get(&self, table_name: &str) -> Result<Option<ConfigTable>, KVError>;

    /// Create or replace a table. The table carries its own name and owner.
    fn put(&self, table: &ConfigTable) -> Result<(), KVError>;

    /// Delete a table. Returns false if no such table existed.
    fn delete(&self, table_name: &str) -> Result<bool, KVError>;

    /// List the names of all tables owned by `owner`, sorted by name.
    fn list(&self, owner: &str) -> Result<Vec<String>, KVError>;
}
