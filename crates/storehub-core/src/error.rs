use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorehubError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorehubError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            StorehubError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, StorehubError>;
