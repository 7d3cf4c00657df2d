//! Flux: observable, path-keyed state.
//!
//! Owners publish immutable snapshots with `set(path, value)`; readers take
//! cheap Arc clones with `get(path)` and observe changes with
//! `subscribe(pattern, handler)`.
//!
//! ```ignore
//! use trakhound_flux::StateStore;
//!
//! let store = StateStore::new();
//! store.subscribe("devices/#", |path, _| println!("changed: {}", path));
//! store.set("devices/list", 3u32);
//! ```

pub mod pattern;
pub mod store;

pub use store::{ChangeHandler, StateStore, StateValue, SubscriptionId};
