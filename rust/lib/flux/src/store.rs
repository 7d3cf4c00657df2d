use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pattern;

/// A published snapshot. Every reader of a path shares one allocation.
#[derive(Clone)]
pub struct StateValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl StateValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// `None` if the snapshot is not a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateValue<{}>", self.type_name)
    }
}

/// Returned by [`StateStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback type for state change notifications.
pub type ChangeHandler = Arc<dyn Fn(&str, &StateValue) + Send + Sync>;

/// Per-path state store with pattern-matched change notifications.
///
/// - `set(path, value)` stores a value and notifies all matching subscribers.
/// - `get(path)` reads the current value (Arc clone, cheap).
/// - `subscribe(pattern, handler)` registers a change handler.
/// - `unsubscribe(id)` removes a handler.
///
/// Handlers run synchronously on the thread calling `set`, after the store's
/// locks are released, so a handler may read the store.
pub struct StateStore {
    values: RwLock<BTreeMap<String, StateValue>>,
    handlers: RwLock<Vec<HandlerEntry>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
struct HandlerEntry {
    id: SubscriptionId,
    pattern: String,
    handler: ChangeHandler,
}

// A panicking subscriber must not wedge every later reader.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Set a typed value at the given path and notify matching subscribers.
    pub fn set<T: Any + Send + Sync>(&self, path: &str, value: T) {
        self.set_value(path, StateValue::new(value));
    }

    /// Set a pre-built StateValue at the given path and notify matching subscribers.
    pub fn set_value(&self, path: &str, value: StateValue) {
        write(&self.values).insert(path.to_string(), value.clone());

        let matched: Vec<ChangeHandler> = read(&self.handlers)
            .iter()
            .filter(|e| pattern::matches(&e.pattern, path))
            .map(|e| Arc::clone(&e.handler))
            .collect();
        for handler in matched {
            handler(path, &value);
        }
    }

    /// Get the current state value at the given path.
    pub fn get(&self, path: &str) -> Option<StateValue> {
        read(&self.values).get(path).cloned()
    }

    /// Get a clone of the typed value at `path`.
    ///
    /// Returns `None` if the path is unset or holds a different type.
    pub fn get_as<T: Any + Clone>(&self, path: &str) -> Option<T> {
        self.get(path)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// Remove the state value at the given path. Does NOT notify subscribers.
    pub fn remove(&self, path: &str) -> Option<StateValue> {
        write(&self.values).remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        read(&self.values).contains_key(path)
    }

    pub fn len(&self) -> usize {
        read(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to state changes on paths matching `pattern`
    /// (see [`crate::pattern`]).
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &StateValue) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.handlers).push(HandlerEntry {
            id,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler. Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = write(&self.handlers);
        let before = handlers.len();
        handlers.retain(|e| e.id != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        read(&self.handlers).len()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
