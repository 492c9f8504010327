//! TOML Configuration File Support
//!
//! Centralized configuration loading for the conductor, backed by a TOML file
//! at `~/.config/nebula/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`NEBULA_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! The vision backend has no key of its own unless one is set; it then
//! borrows the reasoning backend's key.
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/nebula/conductor.toml` (typically `~/.config/nebula/conductor.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [avatar]
//! app_id = "your-app-id"
//! app_secret = "your-app-secret"
//!
//! [reasoning]
//! base_url = "https://api-inference.modelscope.cn/v1"
//! api_key = "ms-..."
//! model = "deepseek-ai/DeepSeek-V3.2"
//!
//! [vision]
//! model = "Qwen/Qwen3-VL-235B-A22B-Instruct"
//!
//! [dialogue]
//! flush_interval_ms = 300
//! history_limit = 20
//! default_backend = "reasoning"
//! end_of_speech = "explicit_marker"
//! stream_idle_timeout_secs = 60
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::avatar::AvatarConfig;
use crate::backend::{
    BackendKind, BackendProfile, BackendSelector, ChatCompletionClient, DEFAULT_BASE_URL,
};
use crate::conductor::ConductorConfig;
use crate::speech::EndOfSpeechPolicy;

/// Environment variables read by [`load_config`]
pub mod env {
    /// Reasoning backend API key
    pub const API_KEY: &str = "NEBULA_API_KEY";
    /// Vision backend API key
    pub const VISION_API_KEY: &str = "NEBULA_VISION_API_KEY";
    /// Endpoint for both backends
    pub const BASE_URL: &str = "NEBULA_BASE_URL";
    /// Reasoning model id
    pub const REASONING_MODEL: &str = "NEBULA_REASONING_MODEL";
    /// Vision model id
    pub const VISION_MODEL: &str = "NEBULA_VISION_MODEL";
    /// Avatar application id
    pub const AVATAR_APP_ID: &str = "NEBULA_AVATAR_APP_ID";
    /// Avatar application secret
    pub const AVATAR_APP_SECRET: &str = "NEBULA_AVATAR_APP_SECRET";
    /// Avatar session gateway
    pub const AVATAR_GATEWAY: &str = "NEBULA_AVATAR_GATEWAY";
    /// Speech flush interval in milliseconds
    pub const FLUSH_INTERVAL_MS: &str = "NEBULA_FLUSH_INTERVAL_MS";
    /// History window size
    pub const HISTORY_LIMIT: &str = "NEBULA_HISTORY_LIMIT";
    /// Backend for text-only turns
    pub const DEFAULT_BACKEND: &str = "NEBULA_DEFAULT_BACKEND";
    /// Stream idle timeout in seconds (0 disables)
    pub const STREAM_IDLE_TIMEOUT_SECS: &str = "NEBULA_STREAM_IDLE_TIMEOUT_SECS";
    /// End-of-speech policy
    pub const END_OF_SPEECH: &str = "NEBULA_END_OF_SPEECH";
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Avatar section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarToml {
    /// Selector the renderer mounts into
    pub container_id: Option<String>,

    /// Application id
    pub app_id: Option<String>,

    /// Application secret
    pub app_secret: Option<String>,

    /// Session gateway URL
    pub gateway_server: Option<String>,
}

/// Backend section (`[reasoning]` or `[vision]`) of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Endpoint base URL
    pub base_url: Option<String>,

    /// Bearer token
    pub api_key: Option<String>,

    /// Model id
    pub model: Option<String>,

    /// Replacement persona prompt
    pub system_prompt: Option<String>,
}

/// Dialogue section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueToml {
    /// Speech flush interval in milliseconds
    pub flush_interval_ms: Option<u64>,

    /// History window size (0 = unlimited)
    pub history_limit: Option<usize>,

    /// Backend for text-only turns
    pub default_backend: Option<BackendKind>,

    /// What to send when nothing is left to speak at stream end
    pub end_of_speech: Option<EndOfSpeechPolicy>,

    /// Fail a stream silent for this many seconds (0 = never)
    pub stream_idle_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NebulaToml {
    /// Avatar section
    pub avatar: AvatarToml,

    /// Reasoning backend section
    pub reasoning: BackendToml,

    /// Vision backend section
    pub vision: BackendToml,

    /// Dialogue section
    pub dialogue: DialogueToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved settings for one backend
#[derive(Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Endpoint base URL
    pub base_url: String,
    /// Bearer token (may be empty)
    pub api_key: String,
    /// Model id
    pub model: String,
    /// Replacement persona prompt
    pub system_prompt: Option<String>,
}

impl BackendSettings {
    fn defaults(kind: BackendKind) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: BackendProfile::for_kind(kind).model,
            system_prompt: None,
        }
    }

    /// Whether a key is present
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Backend profile with these settings applied
    #[must_use]
    pub fn profile(&self, kind: BackendKind) -> BackendProfile {
        let profile = BackendProfile::for_kind(kind).with_model(self.model.clone());
        match &self.system_prompt {
            Some(prompt) => profile.with_system_prompt(prompt.clone()),
            None => profile,
        }
    }

    fn apply_toml(&mut self, toml: &BackendToml) {
        if let Some(ref base_url) = toml.base_url {
            self.base_url.clone_from(base_url);
        }
        if let Some(ref api_key) = toml.api_key {
            self.api_key.clone_from(api_key);
        }
        if let Some(ref model) = toml.model {
            self.model.clone_from(model);
        }
        if let Some(ref prompt) = toml.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
    }
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.has_api_key() { "<set>" } else { "<empty>" })
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Centralized configuration
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct NebulaConfig {
    /// Avatar connection settings
    pub avatar: AvatarConfig,

    /// Reasoning backend settings
    pub reasoning: BackendSettings,

    /// Vision backend settings
    pub vision: BackendSettings,

    /// Dialogue pacing and history settings
    pub conductor: ConductorConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Vision key was blank and borrowed from the reasoning backend
    vision_key_inherited: bool,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for NebulaConfig {
    fn default() -> Self {
        Self {
            avatar: AvatarConfig::default(),
            reasoning: BackendSettings::defaults(BackendKind::Reasoning),
            vision: BackendSettings::defaults(BackendKind::Vision),
            conductor: ConductorConfig::default(),
            config_file_path: None,
            vision_key_inherited: false,
            source: ConfigSource::Default,
        }
    }
}

impl NebulaConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Settings for a backend slot
    #[must_use]
    pub fn backend(&self, kind: BackendKind) -> &BackendSettings {
        match kind {
            BackendKind::Reasoning => &self.reasoning,
            BackendKind::Vision => &self.vision,
        }
    }

    /// Build both completion clients and the selector
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn backend_selector(&self) -> crate::Result<BackendSelector> {
        let build = |kind: BackendKind| -> crate::Result<ChatCompletionClient> {
            let settings = self.backend(kind);
            ChatCompletionClient::new(
                settings.profile(kind),
                settings.base_url.clone(),
                settings.api_key.clone(),
            )
        };

        Ok(BackendSelector::new(
            Arc::new(build(BackendKind::Reasoning)?),
            Arc::new(build(BackendKind::Vision)?),
        )
        .with_default(self.conductor.default_backend))
    }

    /// Check values that would otherwise fail at runtime
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conductor.flush_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }

        for (name, settings) in [("reasoning", &self.reasoning), ("vision", &self.vision)] {
            let url = settings.base_url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.base_url must be an http(s) URL, got '{url}'"
                )));
            }
            if settings.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{name}.model must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Let a blank vision key fall back to the reasoning key
    fn resolve_vision_key(&mut self) {
        if self.vision_key_inherited {
            self.vision.api_key.clear();
            self.vision_key_inherited = false;
        }
        if !self.vision.has_api_key() && self.reasoning.has_api_key() {
            self.vision.api_key.clone_from(&self.reasoning.api_key);
            self.vision_key_inherited = true;
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/nebula/conductor.toml` or
/// `~/.config/nebula/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("nebula").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI arguments are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<NebulaConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<NebulaConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<NebulaConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = NebulaConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: NebulaToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.resolve_vision_key();
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut NebulaConfig, toml: &NebulaToml) {
    let avatar = &toml.avatar;
    if let Some(ref id) = avatar.container_id {
        config.avatar.container_id.clone_from(id);
    }
    if let Some(ref id) = avatar.app_id {
        config.avatar.app_id.clone_from(id);
    }
    if let Some(ref secret) = avatar.app_secret {
        config.avatar.app_secret.clone_from(secret);
    }
    if let Some(ref gateway) = avatar.gateway_server {
        config.avatar.gateway_server.clone_from(gateway);
    }

    config.reasoning.apply_toml(&toml.reasoning);
    config.vision.apply_toml(&toml.vision);
    // A shared endpoint is usually configured once
    if toml.vision.base_url.is_none() {
        if let Some(ref base_url) = toml.reasoning.base_url {
            config.vision.base_url.clone_from(base_url);
        }
    }

    let dialogue = &toml.dialogue;
    if let Some(ms) = dialogue.flush_interval_ms {
        config.conductor.flush_interval = Duration::from_millis(ms);
    }
    if let Some(limit) = dialogue.history_limit {
        config.conductor.history_limit = limit;
    }
    if let Some(kind) = dialogue.default_backend {
        config.conductor.default_backend = kind;
    }
    if let Some(policy) = dialogue.end_of_speech {
        config.conductor.end_of_speech = policy;
    }
    if let Some(secs) = dialogue.stream_idle_timeout_secs {
        config.conductor.stream_idle_timeout = idle_timeout_from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut NebulaConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(env::API_KEY) {
        config.reasoning.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup(env::VISION_API_KEY) {
        config.vision.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(base_url) = lookup(env::BASE_URL) {
        config.reasoning.base_url.clone_from(&base_url);
        config.vision.base_url = base_url;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup(env::REASONING_MODEL) {
        config.reasoning.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup(env::VISION_MODEL) {
        config.vision.model = model;
        config.source = ConfigSource::Env;
    }

    if let Some(app_id) = lookup(env::AVATAR_APP_ID) {
        config.avatar.app_id = app_id;
        config.source = ConfigSource::Env;
    }
    if let Some(secret) = lookup(env::AVATAR_APP_SECRET) {
        config.avatar.app_secret = secret;
        config.source = ConfigSource::Env;
    }
    if let Some(gateway) = lookup(env::AVATAR_GATEWAY) {
        config.avatar.gateway_server = gateway;
        config.source = ConfigSource::Env;
    }

    if let Some(interval) = lookup(env::FLUSH_INTERVAL_MS) {
        if let Ok(ms) = interval.parse::<u64>() {
            config.conductor.flush_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(limit) = lookup(env::HISTORY_LIMIT) {
        if let Ok(n) = limit.parse::<usize>() {
            config.conductor.history_limit = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(backend) = lookup(env::DEFAULT_BACKEND) {
        match backend.parse::<BackendKind>() {
            Ok(kind) => {
                config.conductor.default_backend = kind;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring {}", env::DEFAULT_BACKEND),
        }
    }
    if let Some(timeout) = lookup(env::STREAM_IDLE_TIMEOUT_SECS) {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.conductor.stream_idle_timeout = idle_timeout_from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(policy) = lookup(env::END_OF_SPEECH) {
        match policy.trim() {
            "explicit_marker" => {
                config.conductor.end_of_speech = EndOfSpeechPolicy::ExplicitMarker;
                config.source = ConfigSource::Env;
            }
            "state_transition_only" => {
                config.conductor.end_of_speech = EndOfSpeechPolicy::StateTransitionOnly;
                config.source = ConfigSource::Env;
            }
            other => tracing::warn!(value = other, "Ignoring {}", env::END_OF_SPEECH),
        }
    }
}

fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Reasoning API key override
    pub api_key: Option<String>,

    /// Endpoint override for both backends
    pub base_url: Option<String>,

    /// Default backend override
    pub default_backend: Option<BackendKind>,

    /// Reasoning model override
    pub reasoning_model: Option<String>,

    /// Vision model override
    pub vision_model: Option<String>,

    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,

    /// Stream idle timeout override (seconds, 0 disables)
    pub stream_idle_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set API key override
    #[must_use]
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set default backend override
    #[must_use]
    pub fn with_default_backend(mut self, kind: BackendKind) -> Self {
        self.default_backend = Some(kind);
        self
    }

    /// Set reasoning model override
    #[must_use]
    pub fn with_reasoning_model(mut self, model: String) -> Self {
        self.reasoning_model = Some(model);
        self
    }

    /// Set vision model override
    #[must_use]
    pub fn with_vision_model(mut self, model: String) -> Self {
        self.vision_model = Some(model);
        self
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Set stream idle timeout override
    #[must_use]
    pub fn with_stream_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_idle_timeout_secs = Some(secs);
        self
    }

    fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.base_url.is_none()
            && self.default_backend.is_none()
            && self.reasoning_model.is_none()
            && self.vision_model.is_none()
            && self.flush_interval_ms.is_none()
            && self.stream_idle_timeout_secs.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut NebulaConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref key) = self.api_key {
            config.reasoning.api_key.clone_from(key);
        }
        if let Some(ref url) = self.base_url {
            config.reasoning.base_url.clone_from(url);
            config.vision.base_url.clone_from(url);
        }
        if let Some(kind) = self.default_backend {
            config.conductor.default_backend = kind;
        }
        if let Some(ref model) = self.reasoning_model {
            config.reasoning.model.clone_from(model);
        }
        if let Some(ref model) = self.vision_model {
            config.vision.model.clone_from(model);
        }
        if let Some(ms) = self.flush_interval_ms {
            config.conductor.flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.stream_idle_timeout_secs {
            config.conductor.stream_idle_timeout = idle_timeout_from_secs(secs);
        }

        config.resolve_vision_key();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use crate::backend::{DEFAULT_REASONING_MODEL, DEFAULT_VISION_MODEL};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = NebulaConfig::default();

        assert_eq!(config.reasoning.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.reasoning.model, DEFAULT_REASONING_MODEL);
        assert_eq!(config.vision.model, DEFAULT_VISION_MODEL);
        assert!(!config.reasoning.has_api_key());
        assert_eq!(config.conductor.flush_interval, Duration::from_millis(300));
        assert_eq!(config.conductor.history_limit, 20);
        assert_eq!(config.conductor.stream_idle_timeout, None);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("nebula"));
            assert!(p.to_string_lossy().contains("conductor.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[avatar]
app_id = "app-1"
app_secret = "secret-1"

[reasoning]
base_url = "https://llm.example.com/v1"
api_key = "sk-reasoning"
model = "custom-reasoner"
system_prompt = "be brief"

[vision]
api_key = "sk-vision"

[dialogue]
flush_interval_ms = 150
history_limit = 8
default_backend = "vision"
end_of_speech = "state_transition_only"
stream_idle_timeout_secs = 45
"#,
        );

        let config = load_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert!(config.avatar.has_valid_config());
        assert_eq!(config.reasoning.base_url, "https://llm.example.com/v1");
        assert_eq!(config.vision.base_url, "https://llm.example.com/v1");
        assert_eq!(config.reasoning.model, "custom-reasoner");
        assert_eq!(config.vision.model, DEFAULT_VISION_MODEL);
        assert_eq!(config.vision.api_key, "sk-vision");
        assert_eq!(
            config.reasoning.profile(BackendKind::Reasoning).system_prompt,
            "be brief"
        );
        assert_eq!(config.conductor.flush_interval, Duration::from_millis(150));
        assert_eq!(config.conductor.history_limit, 8);
        assert_eq!(config.conductor.default_backend, BackendKind::Vision);
        assert_eq!(
            config.conductor.end_of_speech,
            EndOfSpeechPolicy::StateTransitionOnly
        );
        assert_eq!(
            config.conductor.stream_idle_timeout,
            Some(Duration::from_secs(45))
        );
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_vision_key_falls_back_to_reasoning_key() {
        let file = toml_file("[reasoning]\napi_key = \"sk-shared\"\n");
        let config = load_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.vision.api_key, "sk-shared");
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = toml_file("");
        let config = load_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.conductor.history_limit, 20);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_missing_file_graceful() {
        let config =
            load_with_env(Some(PathBuf::from("/nonexistent/nebula/conductor.toml")), no_env)
                .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[dialogue\nflush_interval_ms = ");
        let result = load_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = toml_file("[dialogue]\nflush_interval_ms = 0\n");
        let result = load_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));

        let file = toml_file("[reasoning]\nbase_url = \"ftp://nope\"\n");
        let result = load_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    // =========================================================================
    // Priority Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file(
            "[reasoning]\napi_key = \"sk-file\"\nmodel = \"file-model\"\n[dialogue]\nhistory_limit = 4\n",
        );
        let lookup = env_from(&[
            (env::API_KEY, "sk-env"),
            (env::HISTORY_LIMIT, "12"),
            (env::DEFAULT_BACKEND, "vision"),
            (env::STREAM_IDLE_TIMEOUT_SECS, "0"),
            (env::END_OF_SPEECH, "state_transition_only"),
        ]);

        let config = load_with_env(Some(file.path().to_path_buf()), lookup).unwrap();

        assert_eq!(config.reasoning.api_key, "sk-env");
        assert_eq!(config.vision.api_key, "sk-env");
        assert_eq!(config.reasoning.model, "file-model");
        assert_eq!(config.conductor.history_limit, 12);
        assert_eq!(config.conductor.default_backend, BackendKind::Vision);
        assert_eq!(config.conductor.stream_idle_timeout, None);
        assert_eq!(
            config.conductor.end_of_speech,
            EndOfSpeechPolicy::StateTransitionOnly
        );
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_values_ignored() {
        let lookup = env_from(&[
            (env::HISTORY_LIMIT, "many"),
            (env::DEFAULT_BACKEND, "audio"),
        ]);
        let config = load_with_env(None, lookup).unwrap();
        assert_eq!(config.conductor.history_limit, 20);
        assert_eq!(config.conductor.default_backend, BackendKind::Reasoning);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let lookup = env_from(&[(env::API_KEY, "sk-env"), (env::REASONING_MODEL, "env-model")]);
        let mut config = load_with_env(None, lookup).unwrap();

        ConfigOverrides::new()
            .with_api_key("sk-cli".to_string())
            .with_reasoning_model("cli-model".to_string())
            .apply(&mut config);

        assert_eq!(config.reasoning.api_key, "sk-cli");
        assert_eq!(config.vision.api_key, "sk-cli");
        assert_eq!(config.reasoning.model, "cli-model");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_explicit_vision_key_survives_cli_key() {
        let lookup = env_from(&[(env::API_KEY, "sk-env"), (env::VISION_API_KEY, "sk-vision")]);
        let mut config = load_with_env(None, lookup).unwrap();

        ConfigOverrides::new()
            .with_api_key("sk-cli".to_string())
            .apply(&mut config);

        assert_eq!(config.vision.api_key, "sk-vision");
    }

    #[test]
    fn test_config_overrides_apply() {
        let mut config = NebulaConfig::default();
        ConfigOverrides::new()
            .with_base_url("http://localhost:8080/v1".to_string())
            .with_default_backend(BackendKind::Vision)
            .with_vision_model("vl-small".to_string())
            .with_flush_interval_ms(500)
            .with_stream_idle_timeout_secs(30)
            .apply(&mut config);

        assert_eq!(config.vision.base_url, "http://localhost:8080/v1");
        assert_eq!(config.conductor.default_backend, BackendKind::Vision);
        assert_eq!(config.vision.model, "vl-small");
        assert_eq!(config.conductor.flush_interval, Duration::from_millis(500));
        assert_eq!(
            config.conductor.stream_idle_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = NebulaConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = NebulaConfig::default();
        config.reasoning.api_key = "sk-secret-value".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("<set>"));
    }

    #[test]
    fn test_backend_selector_uses_settings() {
        let mut config = NebulaConfig::default();
        config.reasoning.api_key = "sk".to_string();
        config.vision.model = "vl-custom".to_string();
        config.conductor.default_backend = BackendKind::Vision;

        let selector = config.backend_selector().unwrap();
        assert_eq!(selector.default_kind(), BackendKind::Vision);
        assert_eq!(selector.backend(BackendKind::Vision).profile().model, "vl-custom");
        assert!(selector.backend(BackendKind::Reasoning).has_valid_config());
        assert!(!selector.backend(BackendKind::Vision).has_valid_config());
    }
}
