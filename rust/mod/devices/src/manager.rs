use std::sync::Arc;

use tracing::info;

use trakhound_core::{ManagerConfig, ServiceError};
use trakhound_flux::StateStore;
use trakhound_kv::{BackupSink, ConfigStore, FileBackupSink, MemoryStore, NullBackupSink, RedbStore};

use crate::controller::DeviceListController;
use crate::plugin::PageRegistry;
use crate::service::DeviceConfigurationService;
use crate::token::RandomTokenGenerator;
use crate::updates::UpdateChannel;

/// DeviceManager wires storage, the device service, the device list and the
/// update channel together.
pub struct DeviceManager {
    pub flux: Arc<StateStore>,
    pub service: Arc<DeviceConfigurationService>,
    pub devices: DeviceListController,
    pub updates: UpdateChannel,
    pub pages: PageRegistry,
}

impl DeviceManager {
    /// Open the redb store and backup directory named by `config`.
    pub fn open(config: &ManagerConfig) -> Result<Self, ServiceError> {
        let db_path = config.resolve_db_path();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::StoreRead(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let store = RedbStore::open(&db_path).map_err(|e| ServiceError::StoreRead(e.to_string()))?;
        let backups = FileBackupSink::new(config.resolve_backup_dir());

        info!(
            "device manager opened (db={}, backups={}, role={})",
            db_path.display(),
            backups.dir().display(),
            config.role
        );
        Ok(Self::assemble(Arc::new(store), Arc::new(backups), config))
    }

    /// Nothing persisted, no backups. Used before login and in tests.
    pub fn in_memory(config: &ManagerConfig) -> Self {
        Self::assemble(Arc::new(MemoryStore::new()), Arc::new(NullBackupSink), config)
    }

    fn assemble(
        store: Arc<dyn ConfigStore>,
        backups: Arc<dyn BackupSink>,
        config: &ManagerConfig,
    ) -> Self {
        let flux = Arc::new(StateStore::new());
        let service = Arc::new(DeviceConfigurationService::new(
            Arc::clone(&store),
            backups,
            Arc::new(RandomTokenGenerator::new(config.token_length)),
            config.role,
        ));
        let devices = DeviceListController::new(Arc::clone(&service), Arc::clone(&flux));

        Self {
            flux,
            service,
            devices,
            updates: UpdateChannel::new(store),
            pages: PageRegistry::builtin(),
        }
    }
}
