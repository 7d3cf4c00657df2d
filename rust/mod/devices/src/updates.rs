use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use trakhound_core::{now_rfc3339, ServiceError};
use trakhound_kv::{ConfigStore, ConfigTable, TableRow};

pub const UPDATES_OWNER: &str = "_system";
pub const UPDATES_TABLE: &str = "trakhound_updates";
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_ADDR: &str = "/SchemaVersion";
const BEHAVIOR_ADDR: &str = "/UpdateBehavior";
const QUEUE_PREFIX: &str = "/Updates";

/// How queued updates are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBehavior {
    /// Install queued updates without asking.
    Automatic,
    /// Ask the user before installing.
    Prompt,
    Disabled,
}

impl UpdateBehavior {
    /// Stored code: 0 = automatic, 1 = prompt, anything else disables updates.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => UpdateBehavior::Automatic,
            "1" => UpdateBehavior::Prompt,
            _ => UpdateBehavior::Disabled,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            UpdateBehavior::Automatic => "0",
            UpdateBehavior::Prompt => "1",
            UpdateBehavior::Disabled => "2",
        }
    }
}

/// Result of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    None,
    Install(Vec<String>),
    Prompt(Vec<String>),
}

/// UpdateChannel keeps the update behavior and the queue of pending updates
/// in a versioned configuration table.
pub struct UpdateChannel {
    store: Arc<dyn ConfigStore>,
    lock: Mutex<()>,
}

impl UpdateChannel {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<ConfigTable, ServiceError> {
        let Some(table) = self
            .store
            .get(UPDATES_TABLE)
            .map_err(|e| ServiceError::StoreRead(e.to_string()))?
        else {
            return Ok(ConfigTable::with_rows(
                UPDATES_TABLE,
                UPDATES_OWNER,
                vec![TableRow::new(SCHEMA_VERSION_ADDR, SCHEMA_VERSION.to_string())],
            ));
        };

        match table.get_value(SCHEMA_VERSION_ADDR).map(str::trim) {
            Some(v) if v.parse::<u32>().ok() == Some(SCHEMA_VERSION) => Ok(table),
            other => Err(ServiceError::StoreRead(format!(
                "unsupported update schema version {:?}",
                other
            ))),
        }
    }

    fn modify<F, T>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut ConfigTable) -> T,
    {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ServiceError::Internal("update channel lock poisoned".into()))?;
        let mut table = self.load()?;
        let out = f(&mut table);
        self.store
            .put(&table)
            .map_err(|e| ServiceError::StoreWrite(e.to_string()))?;
        Ok(out)
    }

    pub fn behavior(&self) -> Result<UpdateBehavior, ServiceError> {
        let table = self.load()?;
        Ok(table
            .get_value(BEHAVIOR_ADDR)
            .map(UpdateBehavior::from_code)
            .unwrap_or(UpdateBehavior::Disabled))
    }

    pub fn set_behavior(&self, behavior: UpdateBehavior) -> Result<(), ServiceError> {
        self.modify(|t| t.set_value(BEHAVIOR_ADDR, behavior.code()))?;
        info!("update behavior set to {:?}", behavior);
        Ok(())
    }

    /// Names of queued updates, in the order they were queued.
    pub fn pending(&self) -> Result<Vec<String>, ServiceError> {
        let table = self.load()?;
        Ok(table
            .rows_under(QUEUE_PREFIX)
            .map(|r| r.address[QUEUE_PREFIX.len() + 1..].to_string())
            .collect())
    }

    /// Queue an update. Queuing the same name twice keeps one entry.
    pub fn enqueue(&self, name: &str) -> Result<(), ServiceError> {
        if name.is_empty() || name.contains('/') {
            return Err(ServiceError::Validation(format!("invalid update name '{}'", name)));
        }
        let addr = format!("{}/{}", QUEUE_PREFIX, name);
        self.modify(|t| {
            if t.get_value(&addr).is_none() {
                t.set_value(&addr, now_rfc3339());
            }
        })?;
        debug!("queued update {}", name);
        Ok(())
    }

    /// Remove an update from the queue. Returns false if it was not queued.
    pub fn dequeue(&self, name: &str) -> Result<bool, ServiceError> {
        let addr = format!("{}/{}", QUEUE_PREFIX, name);
        let removed = self.modify(|t| t.remove(&addr))?;
        if removed {
            debug!("dequeued update {}", name);
        }
        Ok(removed)
    }

    /// Decide what to do with the queue.
    pub fn check(&self) -> Result<UpdateAction, ServiceError> {
        let pending = self.pending()?;
        if pending.is_empty() {
            return Ok(UpdateAction::None);
        }
        Ok(match self.behavior()? {
            UpdateBehavior::Automatic => UpdateAction::Install(pending),
            UpdateBehavior::Prompt => UpdateAction::Prompt(pending),
            UpdateBehavior::Disabled => UpdateAction::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trakhound_kv::MemoryStore;

    fn channel() -> (Arc<MemoryStore>, UpdateChannel) {
        let store = Arc::new(MemoryStore::new());
        let channel = UpdateChannel::new(store.clone());
        (store, channel)
    }

    #[test]
    fn fresh_channel_is_disabled_and_empty() {
        let (store, ch) = channel();
        assert_eq!(ch.behavior().unwrap(), UpdateBehavior::Disabled);
        assert!(ch.pending().unwrap().is_empty());
        assert_eq!(ch.check().unwrap(), UpdateAction::None);
        // Reads do not create the table.
        assert!(store.is_empty());
    }

    #[test]
    fn behavior_codes() {
        assert_eq!(UpdateBehavior::from_code("0"), UpdateBehavior::Automatic);
        assert_eq!(UpdateBehavior::from_code("1"), UpdateBehavior::Prompt);
        assert_eq!(UpdateBehavior::from_code("7"), UpdateBehavior::Disabled);
        assert_eq!(UpdateBehavior::from_code(""), UpdateBehavior::Disabled);
    }

    #[test]
    fn queue_preserves_order_and_dedups() {
        let (store, ch) = channel();
        ch.enqueue("client-1.4").unwrap();
        ch.enqueue("server-1.4").unwrap();
        ch.enqueue("client-1.4").unwrap();
        assert_eq!(ch.pending().unwrap(), vec!["client-1.4", "server-1.4"]);

        assert!(ch.dequeue("client-1.4").unwrap());
        assert!(!ch.dequeue("client-1.4").unwrap());
        assert_eq!(ch.pending().unwrap(), vec!["server-1.4"]);

        let table = store.get(UPDATES_TABLE).unwrap().unwrap();
        assert_eq!(table.owner, UPDATES_OWNER);
        assert_eq!(table.get_value("/SchemaVersion"), Some("1"));
    }

    #[test]
    fn enqueue_rejects_bad_names() {
        let (_, ch) = channel();
        assert!(matches!(ch.enqueue(""), Err(ServiceError::Validation(_))));
        assert!(matches!(ch.enqueue("a/b"), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn check_follows_behavior() {
        let (_, ch) = channel();
        ch.enqueue("client-1.4").unwrap();
        assert_eq!(ch.check().unwrap(), UpdateAction::None);

        ch.set_behavior(UpdateBehavior::Automatic).unwrap();
        assert_eq!(
            ch.check().unwrap(),
            UpdateAction::Install(vec!["client-1.4".to_string()])
        );

        ch.set_behavior(UpdateBehavior::Prompt).unwrap();
        assert_eq!(
            ch.check().unwrap(),
            UpdateAction::Prompt(vec!["client-1.4".to_string()])
        );
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let (store, ch) = channel();
        store
            .put(&ConfigTable::with_rows(
                UPDATES_TABLE,
                UPDATES_OWNER,
                vec![TableRow::new("/SchemaVersion", "2")],
            ))
            .unwrap();

        assert!(matches!(ch.behavior(), Err(ServiceError::StoreRead(_))));
        assert!(matches!(ch.enqueue("x"), Err(ServiceError::StoreRead(_))));
    }
}
