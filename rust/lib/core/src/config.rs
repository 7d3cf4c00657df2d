use std::path::PathBuf;

use crate::types::Role;

/// Default length of update tokens and unique ids.
pub const DEFAULT_TOKEN_LENGTH: usize = 20;

/// Device manager configuration.
///
/// Parsed from command-line style `--key=value` arguments, then handed to
/// storage initialization and to the device configuration service.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory for TrakHound data.
    pub data_dir: Option<PathBuf>,

    /// Path to the redb configuration store.
    /// Defaults to `{data_dir}/devices.redb` if not specified.
    pub db_path: Option<PathBuf>,

    /// Scratch directory for configuration backups taken before a save.
    /// Defaults to `{data_dir}/temp` if not specified.
    pub backup_dir: Option<PathBuf>,

    /// Role this manager edits. Save and reorder regenerate this role's token.
    pub role: Role,

    /// Number of characters in generated update tokens and unique ids.
    pub token_length: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_path: None,
            backup_dir: None,
            role: Role::Client,
            token_length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

impl ManagerConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--data-dir=PATH`
    /// - `--db=PATH`
    /// - `--backup-dir=PATH`
    /// - `--role=client|server`
    /// - `--token-length=N` (values below the default are raised to it)
    pub fn from_args(args: &[String]) -> Self {
        let mut config = ManagerConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--data-dir=") {
                config.data_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--db=") {
                config.db_path = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--backup-dir=") {
                config.backup_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--role=") {
                if let Ok(role) = val.parse() {
                    config.role = role;
                }
            } else if let Some(val) = arg.strip_prefix("--token-length=") {
                if let Ok(len) = val.parse::<usize>() {
                    config.token_length = len.max(DEFAULT_TOKEN_LENGTH);
                }
            }
        }

        config
    }

    /// Resolve the redb store path, falling back to `{data_dir}/devices.redb`.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("devices.redb"))
    }

    /// Resolve the backup directory, falling back to `{data_dir}/temp`.
    pub fn resolve_backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.resolve_data_subpath("temp"))
    }

    fn resolve_data_subpath(&self, name: &str) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(|d| d.join(name))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
