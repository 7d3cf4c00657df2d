use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::KVError;

/// One row of a configuration table: an address-keyed value with optional
/// attributes.
///
/// Addresses are slash-rooted paths, e.g. `/Description/Manufacturer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub address: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl TableRow {
    pub fn new(address: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            value: value.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A named configuration table owned by one user account.
///
/// This is the unit the [`ConfigStore`](crate::ConfigStore) reads and writes:
/// `put` replaces the whole table, there are no partial row updates at the
/// storage level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTable {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

impl ConfigTable {
    /// Create an empty table.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            rows: Vec::new(),
        }
    }

    /// Create a table from rows.
    pub fn with_rows(
        name: impl Into<String>,
        owner: impl Into<String>,
        rows: Vec<TableRow>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            rows,
        }
    }

    /// Get the value stored at an address.
    pub fn get_value(&self, address: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.address == address)
            .map(|r| r.value.as_str())
    }

    /// Set the value at an address, appending a new row if absent.
    /// Attributes of an existing row are kept.
    pub fn set_value(&mut self, address: &str, value: impl Into<String>) {
        let value = value.into();
        match self.rows.iter_mut().find(|r| r.address == address) {
            Some(row) => row.value = value,
            None => self.rows.push(TableRow::new(address, value)),
        }
    }

    /// Remove the row at an address. Returns true if a row was removed.
    pub fn remove(&mut self, address: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.address != address);
        self.rows.len() != before
    }

    /// Rows whose address lies under `prefix` (e.g. `/Updates`).
    pub fn rows_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a TableRow> + 'a {
        let scoped = format!("{}/", prefix.trim_end_matches('/'));
        self.rows
            .iter()
            .filter(move |r| r.address.starts_with(&scoped))
    }

    /// Check the table is structurally well-formed.
    ///
    /// - at least one row
    /// - every address is non-empty, slash-rooted and has no empty segment
    /// - addresses are unique
    pub fn validate(&self) -> Result<(), String> {
        if self.rows.is_empty() {
            return Err(format!("table '{}' has no rows", self.name));
        }

        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            let addr = row.address.as_str();
            if !addr.starts_with('/') || addr.len() < 2 {
                return Err(format!("invalid address '{}'", addr));
            }
            if addr[1..].split('/').any(|seg| seg.is_empty()) {
                return Err(format!("empty segment in address '{}'", addr));
            }
            if !seen.insert(addr) {
                return Err(format!("duplicate address '{}'", addr));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, KVError> {
        serde_json::to_vec(self).map_err(|e| KVError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KVError> {
        serde_json::from_slice(bytes).map_err(|e| KVError::Serialization(e.to_string()))
    }
}
