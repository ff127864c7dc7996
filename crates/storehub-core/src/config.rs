use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_QUEUE_CAPACITY: usize = 256; // per-connection outbound frames
pub const DEFAULT_CONTROL_CAPACITY: usize = 64; // register/unregister signals in flight
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000; // write loops get this long to drain

/// Top-level config (storehub.toml + STOREHUB_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorehubConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Tuning for the connection hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before the client counts as
    /// slow and gets disconnected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Buffer of the register/unregister channels feeding the event loop.
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,
    /// Upper bound on how long shutdown waits for write loops to flush.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_control_capacity() -> usize {
    DEFAULT_CONTROL_CAPACITY
}
fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl StorehubConfig {
    /// Load config from a TOML file with STOREHUB_* env var overrides.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `STOREHUB_HUB__QUEUE_CAPACITY=32`. A missing file is not an error;
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: StorehubConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("STOREHUB_").split("__"))
            .extract()
            .map_err(|e| crate::error::StorehubError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.storehub/storehub.toml", home)
}
