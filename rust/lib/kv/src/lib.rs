//! Storage layer for device configuration tables.
//!
//! A [`ConfigTable`] is a named set of address/value rows owned by one user
//! account. [`ConfigStore`] persists whole tables; [`BackupSink`] keeps a
//! copy of a table's previous contents before it is overwritten.

pub mod backup;
pub mod error;
pub mod memory;
pub mod redb;
pub mod table;
pub mod traits;

pub use backup::{BackupSink, FileBackupSink, NullBackupSink};
pub use error::KVError;
pub use memory::MemoryStore;
pub use redb::RedbStore;
pub use table::{ConfigTable, TableRow};
pub use traits::ConfigStore;
