//! Application configuration
//!
//! Built once at startup from defaults, an optional TOML file and the
//! environment, then shared read-only by every component.

pub mod file;
pub mod prompts;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conversation::GenerationRequest;

pub use file::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ollama: OllamaSettings,
    pub generation: GenerationDefaults,
    pub memory: MemoryRequirements,
    pub store: StoreSettings,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            ollama: OllamaSettings::default(),
            generation: GenerationDefaults::default(),
            memory: MemoryRequirements::default(),
            store: StoreSettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file named by `LLM_CONFIG_FILE` if any,
    /// then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("LLM_CONFIG_FILE") {
            Ok(path) => Config::from_file(&PathBuf::from(path))?,
            Err(_) => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Apply `KEY=value` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.host = v;
        }
        override_parsed(&mut self.port, get("PORT"));

        if let Some(v) = get("OLLAMA_HOST") {
            self.ollama.host = v;
        }
        override_parsed(&mut self.ollama.port, get("OLLAMA_PORT"));

        if let Some(v) = get("DEFAULT_MODEL") {
            self.generation.model = v;
        }
        override_parsed(&mut self.generation.temperature, get("DEFAULT_TEMPERATURE"));
        override_parsed(&mut self.generation.max_tokens, get("DEFAULT_MAX_TOKENS"));
        if let Some(v) = get("SMALLER_MODEL_HINT") {
            self.generation.smaller_model_hint = v;
        }

        override_parsed(&mut self.memory.default_gb, get("MODEL_MEMORY_REQUIREMENT"));

        override_parsed(&mut self.store.backend, get("STORE_BACKEND"));
        if let Some(v) = get("STORE_HOST") {
            self.store.host = v;
        }
        override_parsed(&mut self.store.port, get("STORE_PORT"));
        if let Some(v) = get("STORE_PREFIX") {
            self.store.prefix = v;
        }
        if let Some(v) = get("STORE_DB_PATH") {
            self.store.db_path = PathBuf::from(v);
        }
        if let Some(limit) = get("TRAINING_CONTEXT_LIMIT").and_then(|v| v.parse().ok()) {
            self.store.training_context_limit = Some(limit);
        }

        override_parsed(&mut self.timeouts.generation_secs, get("GENERATION_TIMEOUT_SECS"));
        override_parsed(&mut self.timeouts.telemetry_secs, get("TELEMETRY_TIMEOUT_SECS"));
        override_parsed(&mut self.timeouts.provision_secs, get("PROVISION_TIMEOUT_SECS"));
    }
}

fn override_parsed<T: FromStr>(slot: &mut T, value: Option<String>) {
    if let Some(raw) = value {
        match raw.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(value = %raw, "ignoring unparseable configuration value"),
        }
    }
}

/// Location of the Ollama inference server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: String,
    pub port: u16,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Model parameters applied when a request leaves them unset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Suggested in error messages when the upstream runs out of memory
    pub smaller_model_hint: String,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct-q4".into(),
            temperature: 0.7,
            max_tokens: 2000,
            smaller_model_hint: "mistral:7b-instruct-q4".into(),
        }
    }
}

/// Model parameters after default resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationDefaults {
    pub fn resolve(&self, request: &GenerationRequest) -> ResolvedParams {
        ResolvedParams {
            model: request
                .model
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(&self.model)
                .to_string(),
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
        }
    }
}

/// Memory (in GB) a model needs before generation is considered safe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRequirements {
    pub default_gb: f64,

    /// Per-model overrides keyed by model name
    pub models: HashMap<String, f64>,
}

impl Default for MemoryRequirements {
    fn default() -> Self {
        Self {
            default_gb: 4.0,
            models: HashMap::new(),
        }
    }
}

impl MemoryRequirements {
    pub fn required_for(&self, model: &str) -> f64 {
        self.models.get(model).copied().unwrap_or(self.default_gb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Conversation store reached over HTTP
    #[default]
    Remote,
    /// Embedded SQLite store, also served under the store prefix
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "http" => Ok(StoreBackend::Remote),
            "sqlite" | "local" => Ok(StoreBackend::Sqlite),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Conversation store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub db_path: PathBuf,

    /// Cap on the number of stored interactions spliced into one request
    pub training_context_limit: Option<u32>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Remote,
            host: "admin".into(),
            port: 8001,
            prefix: "/chat".into(),
            db_path: PathBuf::from("./data/conversations.db"),
            training_context_limit: None,
        }
    }
}

impl StoreSettings {
    pub fn base_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.host,
            self.port,
            normalized_prefix(&self.prefix)
        )
    }

    pub fn route_prefix(&self) -> String {
        normalized_prefix(&self.prefix)
    }
}

fn normalized_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Outbound call budgets, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub generation_secs: u64,
    pub telemetry_secs: u64,
    pub provision_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            generation_secs: 30,
            telemetry_secs: 5,
            provision_secs: 300,
        }
    }
}

impl Timeouts {
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    /// Budget for logging and training-context fetches
    pub fn telemetry(&self) -> Duration {
        Duration::from_secs(self.telemetry_secs)
    }

    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision_secs)
    }
}
