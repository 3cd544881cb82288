//! Configuration loaded from TOML files
//!
//! # Example
//!
//! ```toml
//! port = 8000
//!
//! [ollama]
//! host = "localhost"
//! port = 11434
//!
//! [generation]
//! model = "mistral:7b-instruct-q4"
//! temperature = 0.7
//! max_tokens = 2000
//!
//! [memory]
//! default_gb = 4.0
//!
//! [memory.models]
//! "llama3:70b" = 40.0
//!
//! [store]
//! backend = "sqlite"
//! db_path = "./data/conversations.db"
//! training_context_limit = 20
//! ```

use std::path::Path;

use super::Config;

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::Validation("generation.model is empty".into()));
        }
        if self.memory.default_gb < 0.0 || self.memory.models.values().any(|gb| *gb < 0.0) {
            return Err(ConfigError::Validation(
                "memory requirements must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
