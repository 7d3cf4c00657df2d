use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use trakhound_core::{now_rfc3339, Role, ServiceError};
use trakhound_kv::{BackupSink, ConfigStore, ConfigTable, KVError, TableRow};

use crate::model::{address, bool_value, enabled_address, update_id_address, DeviceConfiguration};
use crate::token::UpdateTokenGenerator;

// Collisions on a fresh 20-letter id are not expected; bounded anyway.
const MAX_ID_ATTEMPTS: usize = 8;

fn read_err(e: KVError) -> ServiceError {
    ServiceError::StoreRead(e.to_string())
}

fn write_err(e: KVError) -> ServiceError {
    ServiceError::StoreWrite(e.to_string())
}

/// DeviceConfigurationService is the only component that mutates device
/// configurations.
///
/// Every mutation is a read-modify-write of one table, serialized per table
/// name. Methods block on the store and are meant to run on a blocking
/// thread (see [`crate::worker::WriteLanes`]).
pub struct DeviceConfigurationService {
    store: Arc<dyn ConfigStore>,
    backups: Arc<dyn BackupSink>,
    tokens: Arc<dyn UpdateTokenGenerator>,
    /// Role whose token Save and SetIndex regenerate.
    role: Role,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceConfigurationService {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        backups: Arc<dyn BackupSink>,
        tokens: Arc<dyn UpdateTokenGenerator>,
        role: Role,
    ) -> Self {
        Self {
            store,
            backups,
            tokens,
            role,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    fn table_lock(&self, table_name: &str) -> Result<Arc<Mutex<()>>, ServiceError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ServiceError::Internal("table lock map poisoned".into()))?;
        Ok(Arc::clone(locks.entry(table_name.to_string()).or_default()))
    }

    fn load(&self, table_name: &str) -> Result<ConfigTable, ServiceError> {
        self.store
            .get(table_name)
            .map_err(read_err)?
            .ok_or_else(|| ServiceError::NotFound(format!("device table '{}' not found", table_name)))
    }

    fn persist(&self, table: &ConfigTable) -> Result<DeviceConfiguration, ServiceError> {
        if let Err(e) = self.store.put(table) {
            error!("failed to write device table {}: {}", table.name, e);
            return Err(write_err(e));
        }
        DeviceConfiguration::from_table(table.clone()).map_err(ServiceError::Internal)
    }

    /// Run `f` on the current contents of `table_name` while holding that
    /// table's lock, then write the result back.
    fn modify<F>(&self, table_name: &str, f: F) -> Result<DeviceConfiguration, ServiceError>
    where
        F: FnOnce(&mut ConfigTable) -> Result<(), ServiceError>,
    {
        let lock = self.table_lock(table_name)?;
        let _guard = lock
            .lock()
            .map_err(|_| ServiceError::Internal(format!("lock for '{}' poisoned", table_name)))?;

        let mut table = self.load(table_name)?;
        f(&mut table)?;
        self.persist(&table)
    }

    // =======================================================================
    // Queries
    // =======================================================================

    /// All devices owned by `owner`, sorted by index then table name.
    ///
    /// An empty owner (nobody logged in) has no devices. Tables that cannot
    /// be projected are skipped.
    pub fn list(&self, owner: &str) -> Result<Vec<DeviceConfiguration>, ServiceError> {
        if owner.is_empty() {
            return Ok(Vec::new());
        }

        let names = self.store.list(owner).map_err(read_err)?;
        let mut devices = Vec::with_capacity(names.len());
        for name in names {
            let Some(table) = self.store.get(&name).map_err(read_err)? else {
                // Deleted between list and get.
                continue;
            };
            match DeviceConfiguration::from_table(table) {
                Ok(d) => devices.push(d),
                Err(e) => warn!("skipping malformed device table {}: {}", name, e),
            }
        }

        devices.sort_by(|a, b| {
            a.index
                .cmp(&b.index)
                .then_with(|| a.table_name.cmp(&b.table_name))
        });
        debug!("listed {} devices for {}", devices.len(), owner);
        Ok(devices)
    }

    pub fn get(&self, table_name: &str) -> Result<DeviceConfiguration, ServiceError> {
        let table = self.load(table_name)?;
        DeviceConfiguration::from_table(table).map_err(ServiceError::StoreRead)
    }

    // =======================================================================
    // Mutations
    // =======================================================================

    /// Create a device for `owner` from `payload`.
    ///
    /// Assigns a fresh unique id, table name `{owner}_{uniqueId}`, both update
    /// tokens, disabled flags for both roles and the next index.
    pub fn add(&self, owner: &str, payload: &ConfigTable) -> Result<DeviceConfiguration, ServiceError> {
        if owner.is_empty() {
            return Err(ServiceError::Validation("owner is required".into()));
        }
        payload.validate().map_err(ServiceError::Validation)?;

        let mut attempt = 0;
        let (unique_id, table_name) = loop {
            let id = self.tokens.next_token();
            let name = format!("{}_{}", owner, id);
            if self.store.get(&name).map_err(read_err)?.is_none() {
                break (id, name);
            }
            attempt += 1;
            if attempt >= MAX_ID_ATTEMPTS {
                return Err(ServiceError::Internal("could not allocate a unique device id".into()));
            }
        };

        let index = self.store.list(owner).map_err(read_err)?.len();

        let mut rows = vec![
            TableRow::new(address::UNIQUE_ID, unique_id.as_str()),
            TableRow::new(address::CLIENT_ENABLED, bool_value(false)),
            TableRow::new(address::SERVER_ENABLED, bool_value(false)),
            TableRow::new(address::CLIENT_UPDATE_ID, self.tokens.next_token()),
            TableRow::new(address::SERVER_UPDATE_ID, self.tokens.next_token()),
            TableRow::new(address::INDEX, index.to_string()),
        ];
        rows.extend(
            payload
                .rows
                .iter()
                .filter(|r| !address::is_managed(&r.address))
                .cloned(),
        );

        let table = ConfigTable::with_rows(table_name, owner, rows);
        let device = self.persist(&table)?;
        info!("added device {} for {}", device.unique_id, owner);
        Ok(device)
    }

    /// Enable or disable `record` for `role`, minting a new token for that role.
    pub fn set_enabled(
        &self,
        record: &DeviceConfiguration,
        role: Role,
        enabled: bool,
    ) -> Result<DeviceConfiguration, ServiceError> {
        let token = self.tokens.next_token();
        let device = self.modify(&record.table_name, |table| {
            table.set_value(enabled_address(role), bool_value(enabled));
            table.set_value(update_id_address(role), token);
            Ok(())
        })?;
        info!(
            "device {} {} {}",
            device.unique_id,
            role,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(device)
    }

    /// Replace the configuration of `record` with `payload`.
    ///
    /// Managed rows keep their stored values, except the active role's update
    /// token which is regenerated. The previous table is backed up first; a
    /// failed backup is logged and the save goes ahead.
    pub fn save(
        &self,
        record: &DeviceConfiguration,
        payload: &ConfigTable,
    ) -> Result<DeviceConfiguration, ServiceError> {
        payload.validate().map_err(ServiceError::Validation)?;

        let token = self.tokens.next_token();
        let role = self.role;
        let device = self.modify(&record.table_name, |table| {
            match self.backups.backup(&table.owner, table, &now_rfc3339()) {
                Ok(path) => debug!("backed up {} to {:?}", table.name, path),
                Err(e) => warn!("backup of {} failed, saving anyway: {}", table.name, e),
            }

            let mut rows: Vec<TableRow> = address::MANAGED
                .iter()
                .filter_map(|addr| {
                    table
                        .rows
                        .iter()
                        .find(|r| r.address == *addr)
                        .cloned()
                })
                .collect();
            rows.extend(
                payload
                    .rows
                    .iter()
                    .filter(|r| !address::is_managed(&r.address))
                    .cloned(),
            );
            table.rows = rows;
            table.set_value(update_id_address(role), token);
            Ok(())
        })?;
        info!("saved device {}", device.unique_id);
        Ok(device)
    }

    /// Move `record` to display position `index`, regenerating the active
    /// role's token.
    pub fn set_index(
        &self,
        record: &DeviceConfiguration,
        index: usize,
    ) -> Result<DeviceConfiguration, ServiceError> {
        let token = self.tokens.next_token();
        let role = self.role;
        let device = self.modify(&record.table_name, |table| {
            table.set_value(address::INDEX, index.to_string());
            table.set_value(update_id_address(role), token);
            Ok(())
        })?;
        debug!("device {} moved to index {}", device.unique_id, index);
        Ok(device)
    }

    /// Delete the table backing `record`.
    pub fn remove(&self, record: &DeviceConfiguration) -> Result<(), ServiceError> {
        let lock = self.table_lock(&record.table_name)?;
        {
            let _guard = lock.lock().map_err(|_| {
                ServiceError::Internal(format!("lock for '{}' poisoned", record.table_name))
            })?;
            let existed = self.store.delete(&record.table_name).map_err(|e| {
                error!("failed to delete device table {}: {}", record.table_name, e);
                write_err(e)
            })?;
            if !existed {
                return Err(ServiceError::NotFound(format!(
                    "device table '{}' not found",
                    record.table_name
                )));
            }
        }

        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&record.table_name);
        }
        info!("removed device {}", record.unique_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use trakhound_kv::{MemoryStore, NullBackupSink};

    use crate::token::RandomTokenGenerator;

    struct RecordingSink {
        saved: Mutex<Vec<ConfigTable>>,
    }

    impl BackupSink for RecordingSink {
        fn backup(&self, _owner: &str, table: &ConfigTable, _saved_at: &str) -> Result<PathBuf, KVError> {
            self.saved.lock().unwrap().push(table.clone());
            Ok(PathBuf::from("mem"))
        }
    }

    struct BrokenSink(AtomicUsize);

    impl BackupSink for BrokenSink {
        fn backup(&self, _owner: &str, _table: &ConfigTable, _saved_at: &str) -> Result<PathBuf, KVError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(KVError::Storage("disk full".into()))
        }
    }

    fn service_with(backups: Arc<dyn BackupSink>, role: Role) -> DeviceConfigurationService {
        DeviceConfigurationService::new(
            Arc::new(MemoryStore::new()),
            backups,
            Arc::new(RandomTokenGenerator::default()),
            role,
        )
    }

    fn service() -> DeviceConfigurationService {
        service_with(Arc::new(NullBackupSink), Role::Client)
    }

    fn payload(model: &str) -> ConfigTable {
        ConfigTable::with_rows(
            "draft",
            "",
            vec![
                TableRow::new(address::MANUFACTURER, "Okuma"),
                TableRow::new(address::MODEL, model),
            ],
        )
    }

    #[test]
    fn add_assigns_identity_and_tokens() {
        let svc = service();
        let d = svc.add("alice", &payload("LB3000")).unwrap();

        assert_eq!(d.unique_id.len(), 20);
        assert_eq!(d.table_name, format!("alice_{}", d.unique_id));
        assert_eq!(d.owner, "alice");
        assert!(!d.client_enabled && !d.server_enabled);
        assert_eq!(d.client_update_id.len(), 20);
        assert_eq!(d.server_update_id.len(), 20);
        assert_ne!(d.client_update_id, d.server_update_id);
        assert_eq!(d.index, 0);
        assert_eq!(d.model, "LB3000");

        let second = svc.add("alice", &payload("MU5000")).unwrap();
        assert_eq!(second.index, 1);
    }

    #[test]
    fn add_ignores_managed_rows_in_payload() {
        let svc = service();
        let mut p = payload("LB3000");
        p.set_value(address::UNIQUE_ID, "FORGED");
        p.set_value(address::CLIENT_ENABLED, "True");

        let d = svc.add("alice", &p).unwrap();
        assert_ne!(d.unique_id, "FORGED");
        assert!(!d.client_enabled);
    }

    #[test]
    fn add_rejects_bad_input() {
        let svc = service();
        assert!(matches!(
            svc.add("", &payload("x")),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            svc.add("alice", &ConfigTable::new("empty", "")),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn list_is_scoped_and_ordered() {
        let svc = service();
        let a = svc.add("alice", &payload("A")).unwrap();
        let b = svc.add("alice", &payload("B")).unwrap();
        svc.add("bob", &payload("C")).unwrap();

        svc.set_index(&a, 5).unwrap();

        let list = svc.list("alice").unwrap();
        let ids: Vec<_> = list.iter().map(|d| d.unique_id.clone()).collect();
        assert_eq!(ids, vec![b.unique_id, a.unique_id]);

        assert!(svc.list("").unwrap().is_empty());
        assert!(svc.list("carol").unwrap().is_empty());
    }

    #[test]
    fn list_skips_malformed_tables() {
        let svc = service();
        svc.add("alice", &payload("A")).unwrap();
        svc.store()
            .put(&ConfigTable::with_rows(
                "alice_broken",
                "alice",
                vec![TableRow::new(address::MODEL, "no id")],
            ))
            .unwrap();

        assert_eq!(svc.list("alice").unwrap().len(), 1);
    }

    #[test]
    fn set_enabled_changes_only_that_role() {
        let svc = service();
        let d = svc.add("alice", &payload("A")).unwrap();

        let updated = svc.set_enabled(&d, Role::Server, true).unwrap();
        assert!(updated.server_enabled);
        assert!(!updated.client_enabled);
        assert_ne!(updated.server_update_id, d.server_update_id);
        assert_eq!(updated.client_update_id, d.client_update_id);

        let reloaded = svc.get(&d.table_name).unwrap();
        assert_eq!(reloaded, updated);
    }

    #[test]
    fn save_keeps_managed_rows_and_regenerates_active_token() {
        let svc = service_with(Arc::new(NullBackupSink), Role::Server);
        let d = svc.add("alice", &payload("A")).unwrap();
        let d = svc.set_enabled(&d, Role::Client, true).unwrap();

        let mut p = payload("B");
        p.set_value("/Agent/Address", "10.0.0.5");
        p.set_value(address::CLIENT_ENABLED, "False");

        let saved = svc.save(&d, &p).unwrap();
        assert_eq!(saved.unique_id, d.unique_id);
        assert!(saved.client_enabled);
        assert_eq!(saved.index, d.index);
        assert_eq!(saved.client_update_id, d.client_update_id);
        assert_ne!(saved.server_update_id, d.server_update_id);
        assert_eq!(saved.model, "B");
        assert_eq!(saved.payload.get_value("/Agent/Address"), Some("10.0.0.5"));

        let user: Vec<_> = saved.user_rows().into_iter().map(|r| r.address).collect();
        assert_eq!(user, vec![address::MANUFACTURER, address::MODEL, "/Agent/Address"]);
    }

    #[test]
    fn save_backs_up_previous_payload() {
        let sink = Arc::new(RecordingSink {
            saved: Mutex::new(Vec::new()),
        });
        let svc = service_with(sink.clone(), Role::Client);
        let d = svc.add("alice", &payload("A")).unwrap();

        svc.save(&d, &payload("B")).unwrap();

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].get_value(address::MODEL), Some("A"));
    }

    #[test]
    fn save_proceeds_when_backup_fails() {
        let sink = Arc::new(BrokenSink(AtomicUsize::new(0)));
        let svc = service_with(sink.clone(), Role::Client);
        let d = svc.add("alice", &payload("A")).unwrap();

        let saved = svc.save(&d, &payload("B")).unwrap();
        assert_eq!(saved.model, "B");
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn save_rejects_invalid_payload_without_touching_store() {
        let svc = service();
        let d = svc.add("alice", &payload("A")).unwrap();
        let bad = ConfigTable::with_rows("x", "", vec![TableRow::new("Model", "B")]);

        assert!(matches!(svc.save(&d, &bad), Err(ServiceError::Validation(_))));
        assert_eq!(svc.get(&d.table_name).unwrap(), d);
    }

    #[test]
    fn set_index_regenerates_active_token() {
        let svc = service();
        let d = svc.add("alice", &payload("A")).unwrap();
        let moved = svc.set_index(&d, 3).unwrap();
        assert_eq!(moved.index, 3);
        assert_ne!(moved.client_update_id, d.client_update_id);
        assert_eq!(moved.server_update_id, d.server_update_id);
    }

    #[test]
    fn remove_then_missing() {
        let svc = service();
        let d = svc.add("alice", &payload("A")).unwrap();

        svc.remove(&d).unwrap();
        assert!(svc.list("alice").unwrap().is_empty());
        assert!(matches!(svc.remove(&d), Err(ServiceError::NotFound(_))));
        assert!(matches!(svc.get(&d.table_name), Err(ServiceError::NotFound(_))));
        assert!(matches!(
            svc.set_enabled(&d, Role::Client, true),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_set_enabled_on_one_table_loses_no_update() {
        let svc = Arc::new(service());
        let d = svc.add("alice", &payload("A")).unwrap();

        let handles: Vec<_> = [Role::Client, Role::Server]
            .into_iter()
            .map(|role| {
                let svc = Arc::clone(&svc);
                let d = d.clone();
                std::thread::spawn(move || svc.set_enabled(&d, role, true).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let after = svc.get(&d.table_name).unwrap();
        assert!(after.client_enabled);
        assert!(after.server_enabled);
    }
}
