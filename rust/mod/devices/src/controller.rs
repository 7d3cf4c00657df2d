use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use trakhound_core::{Role, ServiceError};
use trakhound_flux::StateStore;
use trakhound_kv::ConfigTable;

use crate::model::{DeviceConfiguration, DeviceSummary};
use crate::service::DeviceConfigurationService;
use crate::worker::{Supersede, WriteLanes};

/// Path the device list is published at.
pub const DEVICE_LIST_PATH: &str = "devices/list";

const REFRESH_KEY: &str = "devices/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListPhase {
    Empty,
    Loading,
    Loaded,
}

/// Snapshot of the device list as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceListState {
    pub phase: ListPhase,
    pub owner: Option<String>,
    /// Devices in display order.
    pub devices: Vec<DeviceSummary>,
    /// User-facing message from the last failed operation.
    pub error: Option<String>,
}

impl Default for DeviceListState {
    fn default() -> Self {
        Self {
            phase: ListPhase::Empty,
            owner: None,
            devices: Vec::new(),
            error: None,
        }
    }
}

impl DeviceListState {
    /// Phase implied by the current contents.
    fn settled_phase(&self) -> ListPhase {
        if self.devices.is_empty() {
            ListPhase::Empty
        } else {
            ListPhase::Loaded
        }
    }
}

struct Inner {
    state: DeviceListState,
    /// Last loaded record per unique id. Same keys as `state.devices`.
    records: HashMap<String, DeviceConfiguration>,
    /// Bumped on every committed change.
    version: u64,
}

impl Inner {
    /// Replace the record and summary of a device still in the list.
    /// Returns false if the device is no longer listed.
    fn merge(&mut self, record: DeviceConfiguration) -> bool {
        let Some(slot) = self
            .state
            .devices
            .iter_mut()
            .find(|d| d.unique_id == record.unique_id)
        else {
            return false;
        };
        *slot = record.summary();
        self.records.insert(record.unique_id.clone(), record);
        true
    }
}

/// DeviceListController owns the ordered device list and publishes every
/// change to a [`StateStore`] at [`DEVICE_LIST_PATH`].
///
/// All store work happens off the caller's task: refreshes on the blocking
/// pool, mutations on per-table [`WriteLanes`]. Only the most recently
/// issued refresh can change the visible list, and a mutation that completes
/// after the list was reloaded only touches devices still in it.
///
/// Subscribers are called without the controller's lock held, so a handler
/// may read the controller. Handlers must not mutate it.
pub struct DeviceListController {
    service: Arc<DeviceConfigurationService>,
    flux: Arc<StateStore>,
    lanes: WriteLanes,
    refreshes: Supersede,
    inner: Mutex<Inner>,
    /// Version of the last state handed to flux.
    published: Mutex<u64>,
}

impl DeviceListController {
    pub fn new(service: Arc<DeviceConfigurationService>, flux: Arc<StateStore>) -> Self {
        let controller = Self {
            service,
            flux,
            lanes: WriteLanes::new(),
            refreshes: Supersede::new(),
            inner: Mutex::new(Inner {
                state: DeviceListState::default(),
                records: HashMap::new(),
                version: 0,
            }),
            published: Mutex::new(0),
        };
        controller.commit(controller.lock());
        controller
    }

    /// Current published state.
    pub fn state(&self) -> DeviceListState {
        self.flux
            .get_as::<DeviceListState>(DEVICE_LIST_PATH)
            .unwrap_or_default()
    }

    /// Last loaded record for `unique_id`.
    pub fn record(&self, unique_id: &str) -> Option<DeviceConfiguration> {
        self.lock().records.get(unique_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Release `inner` and publish its state.
    ///
    /// The snapshot is taken under the lock; flux is updated after the lock
    /// is dropped. A snapshot older than one already published is skipped.
    fn commit(&self, mut inner: MutexGuard<'_, Inner>) {
        inner.version += 1;
        let version = inner.version;
        let state = inner.state.clone();
        drop(inner);

        let mut published = self.published.lock().unwrap_or_else(|e| e.into_inner());
        if version > *published {
            *published = version;
            self.flux.set(DEVICE_LIST_PATH, state);
        }
    }

    fn fail(&self, mut inner: MutexGuard<'_, Inner>, e: &ServiceError) {
        warn!("device list operation failed [{}]: {}", e.error_code(), e);
        inner.state.error = Some(e.user_message());
        self.commit(inner);
    }

    fn find(&self, unique_id: &str) -> Result<DeviceConfiguration, ServiceError> {
        self.record(unique_id)
            .ok_or_else(|| ServiceError::NotFound(format!("device '{}' is not in the list", unique_id)))
    }

    // =======================================================================
    // Refresh
    // =======================================================================

    /// Reload the whole list for `owner`.
    ///
    /// Supersedes any refresh still in flight; a superseded refresh returns
    /// `Ok(())` without touching the list.
    pub async fn refresh(&self, owner: &str) -> Result<(), ServiceError> {
        let ticket = {
            let mut inner = self.lock();
            let ticket = self.refreshes.begin(REFRESH_KEY);
            inner.state.owner = Some(owner.to_string());
            inner.state.phase = ListPhase::Loading;
            inner.state.error = None;
            self.commit(inner);
            ticket
        };
        debug!("refresh #{} for {} started", ticket.generation(), owner);

        let service = Arc::clone(&self.service);
        let owner_name = owner.to_string();
        let result = tokio::select! {
            biased;
            _ = ticket.token().cancelled() => {
                debug!("refresh #{} superseded", ticket.generation());
                return Ok(());
            }
            joined = tokio::task::spawn_blocking(move || service.list(&owner_name)) => {
                joined.unwrap_or_else(|e| Err(ServiceError::Internal(format!("refresh worker failed: {}", e))))
            }
        };

        let mut inner = self.lock();
        if !self.refreshes.is_current(&ticket) {
            debug!("refresh #{} finished late, discarded", ticket.generation());
            return Ok(());
        }
        self.refreshes.finish(&ticket);

        match result {
            Ok(records) => {
                inner.state.devices = records.iter().map(DeviceConfiguration::summary).collect();
                inner.records = records
                    .into_iter()
                    .map(|r| (r.unique_id.clone(), r))
                    .collect();
                inner.state.phase = inner.state.settled_phase();
                inner.state.error = None;
                info!("device list loaded: {} devices for {}", inner.state.devices.len(), owner);
                self.commit(inner);
                Ok(())
            }
            Err(e) => {
                inner.state.phase = inner.state.settled_phase();
                self.fail(inner, &e);
                Err(e)
            }
        }
    }

    /// Forget the list (logout). Pending refreshes are superseded.
    pub fn clear(&self) {
        let mut inner = self.lock();
        self.refreshes.cancel(REFRESH_KEY);
        inner.records.clear();
        inner.state = DeviceListState::default();
        info!("device list cleared");
        self.commit(inner);
    }

    // =======================================================================
    // Mutations
    // =======================================================================

    /// Move device `unique_id` to position `new_index`, shifting the others.
    ///
    /// Every device whose position changes is persisted. If any of those
    /// writes fails, the ones that succeeded are written back to their old
    /// index and the visible order is left alone. Does nothing if
    /// `new_index` is outside the list or the device is unknown.
    pub async fn reorder(&self, unique_id: &str, new_index: usize) -> Result<(), ServiceError> {
        let changed = {
            let inner = self.lock();
            let devices = &inner.state.devices;
            if new_index >= devices.len() {
                debug!("reorder to {} ignored: list has {} devices", new_index, devices.len());
                return Ok(());
            }
            let Some(from) = devices.iter().position(|d| d.unique_id == unique_id) else {
                debug!("reorder of unknown device {} ignored", unique_id);
                return Ok(());
            };

            let mut order: Vec<&str> = devices.iter().map(|d| d.unique_id.as_str()).collect();
            let moved = order.remove(from);
            order.insert(new_index, moved);

            order
                .iter()
                .enumerate()
                .filter_map(|(i, id)| {
                    inner
                        .records
                        .get(*id)
                        .filter(|r| r.index != i)
                        .map(|r| (r.clone(), i))
                })
                .collect::<Vec<(DeviceConfiguration, usize)>>()
        };

        if changed.is_empty() {
            return Ok(());
        }

        let previous: HashMap<String, usize> = changed
            .iter()
            .map(|(r, _)| (r.unique_id.clone(), r.index))
            .collect();
        let (written, failure) = self.write_indexes(changed).await;

        if let Some(e) = failure {
            let restore = written
                .into_iter()
                .filter_map(|r| previous.get(&r.unique_id).map(|&i| (r, i)))
                .collect();
            let (restored, rollback_failure) = self.write_indexes(restore).await;
            if let Some(re) = rollback_failure {
                error!("reorder rollback incomplete [{}]: {}", re.error_code(), re);
            }

            let mut inner = self.lock();
            for record in restored {
                inner.merge(record);
            }
            self.fail(inner, &e);
            return Err(e);
        }

        // Stored indexes are authoritative; sorting by them also places
        // devices that arrived from a refresh while the writes ran.
        let mut inner = self.lock();
        for record in written {
            inner.merge(record);
        }
        inner.state.devices.sort_by_key(|d| d.index);
        inner.state.error = None;
        debug!("device {} moved to {}", unique_id, new_index);
        self.commit(inner);
        Ok(())
    }

    /// Persist each `(record, index)` pair on its table's lane.
    ///
    /// Returns the record as stored after every write, plus the first error.
    /// A failed write returns the record it was given so callers still see
    /// the last known stored state.
    async fn write_indexes(
        &self,
        writes: Vec<(DeviceConfiguration, usize)>,
    ) -> (Vec<DeviceConfiguration>, Option<ServiceError>) {
        let pending: Vec<_> = writes
            .into_iter()
            .map(|(record, index)| {
                let service = Arc::clone(&self.service);
                let table = record.table_name.clone();
                let job_record = record.clone();
                let fut = self
                    .lanes
                    .submit(&table, move || service.set_index(&job_record, index));
                (record, fut)
            })
            .collect();

        let mut written = Vec::with_capacity(pending.len());
        let mut failure = None;
        for (record, fut) in pending {
            match fut.await {
                Ok(stored) => written.push(stored),
                Err(e) => {
                    debug!("index write for {} failed: {}", record.unique_id, e);
                    failure.get_or_insert(e);
                }
            }
        }
        (written, failure)
    }

    /// Enable or disable a device for `role`.
    pub async fn set_enabled(
        &self,
        unique_id: &str,
        role: Role,
        enabled: bool,
    ) -> Result<DeviceSummary, ServiceError> {
        let record = self.find(unique_id)?;
        let service = Arc::clone(&self.service);
        let table = record.table_name.clone();
        let result = self
            .lanes
            .submit(&table, move || service.set_enabled(&record, role, enabled))
            .await;
        self.apply(result)
    }

    /// Replace a device's configuration with `payload`.
    pub async fn save(
        &self,
        unique_id: &str,
        payload: ConfigTable,
    ) -> Result<DeviceSummary, ServiceError> {
        let record = self.find(unique_id)?;
        let service = Arc::clone(&self.service);
        let table = record.table_name.clone();
        let result = self
            .lanes
            .submit(&table, move || service.save(&record, &payload))
            .await;
        self.apply(result)
    }

    /// Delete a device and drop it from the list.
    pub async fn remove(&self, unique_id: &str) -> Result<(), ServiceError> {
        let record = self.find(unique_id)?;
        let service = Arc::clone(&self.service);
        let table = record.table_name.clone();
        let result = self
            .lanes
            .submit(&table, move || service.remove(&record))
            .await;

        let mut inner = self.lock();
        match result {
            Ok(()) => {
                self.lanes.close(&table);
                inner.records.remove(unique_id);
                inner.state.devices.retain(|d| d.unique_id != unique_id);
                if inner.state.phase != ListPhase::Loading {
                    inner.state.phase = inner.state.settled_phase();
                }
                inner.state.error = None;
                self.commit(inner);
                Ok(())
            }
            Err(e) => {
                self.fail(inner, &e);
                Err(e)
            }
        }
    }

    /// Put a mutated record into the list, or record the failure.
    ///
    /// A device that left the list while the write ran (a refresh for
    /// another owner, a clear) is not brought back.
    fn apply(
        &self,
        result: Result<DeviceConfiguration, ServiceError>,
    ) -> Result<DeviceSummary, ServiceError> {
        let mut inner = self.lock();
        match result {
            Ok(record) => {
                let summary = record.summary();
                if !inner.merge(record) {
                    debug!("device {} left the list, result not shown", summary.unique_id);
                    return Ok(summary);
                }
                inner.state.error = None;
                self.commit(inner);
                Ok(summary)
            }
            Err(e) => {
                self.fail(inner, &e);
                Err(e)
            }
        }
    }
}

impl Drop for DeviceListController {
    fn drop(&mut self) {
        self.refreshes.cancel(REFRESH_KEY);
        self.lanes.shutdown();
    }
}
