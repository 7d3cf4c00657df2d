pub mod config;
pub mod error;
pub mod types;

pub use config::{DEFAULT_TOKEN_LENGTH, ManagerConfig};
pub use error::ServiceError;
pub use types::{Role, now_rfc3339};
