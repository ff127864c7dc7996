pub mod config;
pub mod error;
pub mod types;

pub use config::{GatewayConfig, HubConfig, StorehubConfig};
pub use error::{Result, StorehubError};
pub use types::ConnId;
