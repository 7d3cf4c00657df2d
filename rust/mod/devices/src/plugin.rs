use tracing::{debug, warn};

use trakhound_kv::ConfigTable;

use crate::model::address;

/// A configuration page edits one area of a device's configuration.
///
/// `load` fills the page from a stored table, `save` writes the page's
/// fields back into a payload before it is handed to Save.
pub trait ConfigurationPage: Send {
    /// Stable id, used in manifests.
    fn id(&self) -> &'static str;

    fn title(&self) -> &'static str;

    fn load(&mut self, table: &ConfigTable);

    fn save(&self, table: &mut ConfigTable);
}

pub type PageFactory = fn() -> Box<dyn ConfigurationPage>;

/// Table of known configuration pages.
///
/// Pages are registered up front; there is no runtime discovery.
#[derive(Clone, Default)]
pub struct PageRegistry {
    factories: Vec<(&'static str, PageFactory)>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in pages: `description` and `agent`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DescriptionPage::ID, || Box::new(DescriptionPage::default()));
        registry.register(AgentPage::ID, || Box::new(AgentPage::default()));
        registry
    }

    /// Register a page factory. A later registration replaces an earlier one
    /// with the same id.
    pub fn register(&mut self, id: &'static str, factory: PageFactory) {
        match self.factories.iter_mut().find(|(k, _)| *k == id) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((id, factory)),
        }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.factories.iter().map(|(id, _)| *id).collect()
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn ConfigurationPage>> {
        self.factories
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, factory)| factory())
    }

    /// Instantiate the pages named in `ids`, in order. Unknown ids are skipped.
    pub fn from_manifest<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Box<dyn ConfigurationPage>> {
        ids.iter()
            .filter_map(|id| {
                let id = id.as_ref();
                let page = self.create(id);
                if page.is_none() {
                    warn!("unknown configuration page '{}' in manifest, skipped", id);
                }
                page
            })
            .collect()
    }
}

/// Load every page from `table`.
pub fn load_pages(pages: &mut [Box<dyn ConfigurationPage>], table: &ConfigTable) {
    for page in pages.iter_mut() {
        page.load(table);
    }
}

/// Let every page write its fields into `table`.
pub fn apply_pages(pages: &[Box<dyn ConfigurationPage>], table: &mut ConfigTable) {
    for page in pages {
        debug!("applying page {}", page.id());
        page.save(table);
    }
}

// ---------------------------------------------------------------------------
// Built-in pages
// ---------------------------------------------------------------------------

/// Device identification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptionPage {
    pub description: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub device_id: String,
}

impl DescriptionPage {
    pub const ID: &'static str = "description";

    fn fields(&self) -> [(&'static str, &String); 5] {
        [
            (address::DESCRIPTION, &self.description),
            (address::MANUFACTURER, &self.manufacturer),
            (address::MODEL, &self.model),
            (address::SERIAL, &self.serial),
            (address::DEVICE_ID, &self.device_id),
        ]
    }
}

impl ConfigurationPage for DescriptionPage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn title(&self) -> &'static str {
        "Description"
    }

    fn load(&mut self, table: &ConfigTable) {
        let get = |addr| table.get_value(addr).unwrap_or_default().to_string();
        self.description = get(address::DESCRIPTION);
        self.manufacturer = get(address::MANUFACTURER);
        self.model = get(address::MODEL);
        self.serial = get(address::SERIAL);
        self.device_id = get(address::DEVICE_ID);
    }

    fn save(&self, table: &mut ConfigTable) {
        for (addr, value) in self.fields() {
            table.set_value(addr, value.as_str());
        }
    }
}

pub mod agent_address {
    pub const ADDRESS: &str = "/Agent/Address";
    pub const PORT: &str = "/Agent/Port";
    pub const DEVICE_NAME: &str = "/Agent/DeviceName";
    pub const HEARTBEAT: &str = "/Agent/Heartbeat";
}

/// Connection to the device's MTConnect agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPage {
    pub address: String,
    pub port: u16,
    pub device_name: String,
    /// Polling interval in milliseconds.
    pub heartbeat: u32,
}

impl AgentPage {
    pub const ID: &'static str = "agent";
    pub const DEFAULT_PORT: u16 = 5000;
    pub const DEFAULT_HEARTBEAT: u32 = 5000;
}

impl Default for AgentPage {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: Self::DEFAULT_PORT,
            device_name: String::new(),
            heartbeat: Self::DEFAULT_HEARTBEAT,
        }
    }
}

impl ConfigurationPage for AgentPage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn title(&self) -> &'static str {
        "Agent"
    }

    fn load(&mut self, table: &ConfigTable) {
        self.address = table
            .get_value(agent_address::ADDRESS)
            .unwrap_or_default()
            .to_string();
        self.device_name = table
            .get_value(agent_address::DEVICE_NAME)
            .unwrap_or_default()
            .to_string();
        self.port = table
            .get_value(agent_address::PORT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(Self::DEFAULT_PORT);
        self.heartbeat = table
            .get_value(agent_address::HEARTBEAT)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(Self::DEFAULT_HEARTBEAT);
    }

    fn save(&self, table: &mut ConfigTable) {
        table.set_value(agent_address::ADDRESS, self.address.as_str());
        table.set_value(agent_address::PORT, self.port.to_string());
        table.set_value(agent_address::DEVICE_NAME, self.device_name.as_str());
        table.set_value(agent_address::HEARTBEAT, self.heartbeat.to_string());
    }
}
