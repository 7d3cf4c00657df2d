use serde::{Deserialize, Serialize};

use trakhound_core::Role;
use trakhound_kv::{ConfigTable, TableRow};

/// Row addresses inside a device configuration table.
pub mod address {
    pub const UNIQUE_ID: &str = "/UniqueId";
    pub const CLIENT_ENABLED: &str = "/ClientEnabled";
    pub const SERVER_ENABLED: &str = "/ServerEnabled";
    pub const CLIENT_UPDATE_ID: &str = "/ClientUpdateId";
    pub const SERVER_UPDATE_ID: &str = "/ServerUpdateId";
    pub const INDEX: &str = "/Index";

    pub const DESCRIPTION: &str = "/Description/Description";
    pub const MANUFACTURER: &str = "/Description/Manufacturer";
    pub const MODEL: &str = "/Description/Model";
    pub const SERIAL: &str = "/Description/Serial";
    pub const DEVICE_ID: &str = "/Description/Device_Id";

    /// Rows maintained by the service. Callers never set these through Save.
    pub const MANAGED: [&str; 6] = [
        UNIQUE_ID,
        CLIENT_ENABLED,
        SERVER_ENABLED,
        CLIENT_UPDATE_ID,
        SERVER_UPDATE_ID,
        INDEX,
    ];

    pub fn is_managed(addr: &str) -> bool {
        MANAGED.contains(&addr)
    }
}

pub fn enabled_address(role: Role) -> &'static str {
    match role {
        Role::Client => address::CLIENT_ENABLED,
        Role::Server => address::SERVER_ENABLED,
    }
}

pub fn update_id_address(role: Role) -> &'static str {
    match role {
        Role::Client => address::CLIENT_UPDATE_ID,
        Role::Server => address::SERVER_UPDATE_ID,
    }
}

/// Stored representation of a boolean flag.
pub fn bool_value(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

fn parse_bool(s: Option<&str>) -> bool {
    s.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// A device configuration, projected from its stored table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfiguration {
    pub unique_id: String,
    pub table_name: String,
    pub owner: String,
    pub description: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub device_id: String,
    pub client_enabled: bool,
    pub server_enabled: bool,
    pub client_update_id: String,
    pub server_update_id: String,
    pub index: usize,
    pub payload: ConfigTable,
}

impl DeviceConfiguration {
    /// Project a stored table. Fails if the table has no `/UniqueId`.
    pub fn from_table(table: ConfigTable) -> Result<Self, String> {
        let unique_id = match table.get_value(address::UNIQUE_ID) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(format!("table '{}' has no unique id", table.name)),
        };
        let text = |addr: &str| table.get_value(addr).unwrap_or_default().to_string();

        let index = match table.get_value(address::INDEX) {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("table '{}' has invalid index '{}'", table.name, v))?,
            None => 0,
        };

        Ok(Self {
            unique_id,
            table_name: table.name.clone(),
            owner: table.owner.clone(),
            description: text(address::DESCRIPTION),
            manufacturer: text(address::MANUFACTURER),
            model: text(address::MODEL),
            serial: text(address::SERIAL),
            device_id: text(address::DEVICE_ID),
            client_enabled: parse_bool(table.get_value(address::CLIENT_ENABLED)),
            server_enabled: parse_bool(table.get_value(address::SERVER_ENABLED)),
            client_update_id: text(address::CLIENT_UPDATE_ID),
            server_update_id: text(address::SERVER_UPDATE_ID),
            index,
            payload: table,
        })
    }

    pub fn enabled(&self, role: Role) -> bool {
        match role {
            Role::Client => self.client_enabled,
            Role::Server => self.server_enabled,
        }
    }

    pub fn update_id(&self, role: Role) -> &str {
        match role {
            Role::Client => &self.client_update_id,
            Role::Server => &self.server_update_id,
        }
    }

    /// Payload rows that are not maintained by the service.
    pub fn user_rows(&self) -> Vec<TableRow> {
        self.payload
            .rows
            .iter()
            .filter(|r| !address::is_managed(&r.address))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            unique_id: self.unique_id.clone(),
            table_name: self.table_name.clone(),
            description: self.description.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            serial: self.serial.clone(),
            client_enabled: self.client_enabled,
            server_enabled: self.server_enabled,
            client_update_id: self.client_update_id.clone(),
            server_update_id: self.server_update_id.clone(),
            index: self.index,
        }
    }
}

/// The part of a device shown in the device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub unique_id: String,
    pub table_name: String,
    pub description: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub client_enabled: bool,
    pub server_enabled: bool,
    pub client_update_id: String,
    pub server_update_id: String,
    pub index: usize,
}
