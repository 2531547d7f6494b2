//! Configuration loading, validation, and management for DentCoach.
//!
//! Loads configuration from `~/.dentcoach/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use dentcoach_core::provider::GenerationParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.dentcoach/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Repetition control: frequency penalty (-2.0..=2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Repetition control: presence penalty (-2.0..=2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Knowledge base configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Coach persona configuration
    #[serde(default)]
    pub coach: CoachConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("frequency_penalty", &self.frequency_penalty)
            .field("presence_penalty", &self.presence_penalty)
            .field("knowledge", &self.knowledge)
            .field("gateway", &self.gateway)
            .field("coach", &self.coach)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_knowledge_backend")]
    pub backend: String,

    /// SQLite database file. Relative paths resolve against the config dir.
    #[serde(default = "default_knowledge_path")]
    pub path: String,

    /// Estimated-token ceiling for the grounding block (0 = unlimited)
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_knowledge_backend() -> String {
    "sqlite".into()
}
fn default_knowledge_path() -> String {
    "knowledge.sqlite".into()
}
fn default_max_context_tokens() -> usize {
    24_000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            backend: default_knowledge_backend(),
            path: default_knowledge_path(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

impl KnowledgeConfig {
    /// Absolute database path, or the `sqlite::memory:` URL.
    pub fn database_path(&self) -> PathBuf {
        let path = Path::new(&self.path);
        if path.is_absolute() || self.path.starts_with("sqlite:") {
            path.to_path_buf()
        } else {
            AppConfig::config_dir().join(path)
        }
    }

    /// Token budget for the context builder; `None` means unlimited.
    pub fn context_budget(&self) -> Option<usize> {
        (self.max_context_tokens > 0).then_some(self.max_context_tokens)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Print a one-time pairing code at startup that `POST /pair` exchanges
    /// for a bearer token.
    #[serde(default = "default_true")]
    pub require_pairing: bool,

    /// Pre-provisioned bearer tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_tokens: Vec<String>,

    /// Requests per minute per client (0 = unlimited)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: usize,

    /// Origin allowed by CORS
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_true() -> bool {
    true
}
fn default_rate_limit() -> usize {
    60
}
fn default_allowed_origin() -> String {
    "http://localhost:3000".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            require_pairing: true,
            api_tokens: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("require_pairing", &self.require_pairing)
            .field("api_tokens", &format_args!("[{} REDACTED]", self.api_tokens.len()))
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("allowed_origin", &self.allowed_origin)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachConfig {
    /// Replace the built-in persona paragraph of the instruction prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.dentcoach/config.toml).
    ///
    /// Also checks environment variables:
    /// - `DENTCOACH_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `DENTCOACH_PROVIDER`, `DENTCOACH_MODEL`
    /// - `DENTCOACH_DATABASE` (knowledge database path)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let env_key = |name: &str| std::env::var(name).ok().filter(|k| !k.is_empty());
        if let Some(key) = env_key("DENTCOACH_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = env_key("OPENAI_API_KEY");
        }

        if let Ok(provider) = std::env::var("DENTCOACH_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("DENTCOACH_MODEL") {
            self.default_model = model;
        }

        if let Ok(path) = std::env::var("DENTCOACH_DATABASE") {
            self.knowledge.path = path;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".dentcoach")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.default_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "default_max_tokens must be > 0".into(),
            ));
        }

        for (name, penalty) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if penalty.is_some_and(|p| !(-2.0..=2.0).contains(&p)) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between -2.0 and 2.0"
                )));
            }
        }

        if !matches!(self.knowledge.backend.as_str(), "sqlite" | "in_memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown knowledge backend '{}' (expected 'sqlite' or 'in_memory')",
                self.knowledge.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Generation parameters for coach requests.
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.default_temperature,
            max_tokens: Some(self.default_max_tokens),
            top_p: None,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
        }
    }

    /// Model to use: the default provider's override, else `default_model`.
    pub fn model(&self) -> &str {
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.as_deref())
            .unwrap_or(&self.default_model)
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            frequency_penalty: None,
            presence_penalty: None,
            knowledge: KnowledgeConfig::default(),
            gateway: GatewayConfig::default(),
            coach: CoachConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
