//! Device configuration management for TrakHound.
//!
//! - [`DeviceConfigurationService`] is the only writer of device tables.
//!   Every change to a role's enabled flag or configuration mints a new
//!   update token for that role.
//! - [`DeviceListController`] keeps the ordered, observable device list and
//!   runs store work off the caller's task.
//! - [`PageRegistry`] holds the configuration pages; [`UpdateChannel`] holds
//!   update behavior and the pending update queue.

pub mod controller;
pub mod manager;
pub mod model;
pub mod plugin;
pub mod service;
pub mod token;
pub mod updates;
pub mod worker;

pub use controller::{DeviceListController, DeviceListState, ListPhase, DEVICE_LIST_PATH};
pub use manager::DeviceManager;
pub use model::{DeviceConfiguration, DeviceSummary};
pub use plugin::{apply_pages, load_pages, AgentPage, ConfigurationPage, DescriptionPage, PageRegistry};
pub use service::DeviceConfigurationService;
pub use token::{RandomTokenGenerator, UpdateTokenGenerator};
pub use updates::{UpdateAction, UpdateBehavior, UpdateChannel};
pub use worker::{Supersede, Ticket, WriteLanes};
