//! Application configuration for Quarry.
//!
//! User config lives at `~/.quarry/quarry.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file; each provider names the env var
//! that holds its key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "quarry.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".quarry";

// ---------------------------------------------------------------------------
// Config structs (matching quarry.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fan-out settings.
    #[serde(default)]
    pub dispatch: DispatchSection,

    /// Reconciliation delegate settings.
    #[serde(default)]
    pub synthesis: SynthesisSection,

    /// Configured research providers, in dispatch order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Report rendering settings.
    #[serde(default)]
    pub render: RenderSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchSection::default(),
            synthesis: SynthesisSection::default(),
            providers: default_providers(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            render: RenderSection::default(),
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    /// Upper bound for a single provider call, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_provider_timeout() -> u64 {
    300
}

/// `[synthesis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSection {
    /// Whether the delegated merge is attempted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model used for the delegated merge.
    #[serde(default = "default_synthesis_model")]
    pub model: String,

    /// Name of the env var holding the delegate's API key.
    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,

    /// Override for the delegate API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Upper bound for the delegate call, in seconds.
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,

    /// Output token budget for the delegate.
    #[serde(default = "default_synthesis_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_synthesis_model(),
            api_key_env: default_anthropic_key_env(),
            base_url: None,
            timeout_secs: default_synthesis_timeout(),
            max_tokens: default_synthesis_max_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_synthesis_model() -> String {
    "claude-opus-4-6".into()
}
fn default_anthropic_key_env() -> String {
    "QUARRY_ANTHROPIC_API_KEY".into()
}
fn default_synthesis_timeout() -> u64 {
    180
}
fn default_synthesis_max_tokens() -> u32 {
    8192
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI-compatible chat completions (xAI, OpenAI, Moonshot, ...).
    OpenaiCompat,
    /// Google Gemini `generateContent`.
    Gemini,
}

/// `[[providers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name used for attribution ("Claude", "Grok", ...).
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Per-provider override of `dispatch.provider_timeout_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "Claude".into(),
            kind: ProviderKind::Anthropic,
            model: "claude-opus-4-6".into(),
            api_key_env: default_anthropic_key_env(),
            base_url: None,
            timeout_secs: None,
        },
        ProviderConfig {
            name: "Grok".into(),
            kind: ProviderKind::OpenaiCompat,
            model: "grok-4-1-fast".into(),
            api_key_env: "QUARRY_XAI_API_KEY".into(),
            base_url: Some("https://api.x.ai/v1".into()),
            timeout_secs: Some(120),
        },
        ProviderConfig {
            name: "Gemini".into(),
            kind: ProviderKind::Gemini,
            model: "gemini-2.5-pro".into(),
            api_key_env: "QUARRY_GOOGLE_API_KEY".into(),
            base_url: None,
            timeout_secs: Some(120),
        },
    ]
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by CORS.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.quarry/quarry.db".into()
}

impl StorageConfig {
    /// Resolve `database_path`, expanding a leading `~`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.database_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| QuarryError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.database_path)),
        }
    }
}

/// `[render]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderSection {
    /// Custom Typst template. Must contain the content marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime dispatch configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Default upper bound for one provider call.
    pub provider_timeout: Duration,
}

impl From<&AppConfig> for DispatchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            provider_timeout: Duration::from_secs(config.dispatch.provider_timeout_secs),
        }
    }
}

/// Runtime synthesis configuration.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl From<&AppConfig> for SynthesisConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            enabled: config.synthesis.enabled,
            model: config.synthesis.model.clone(),
            base_url: config.synthesis.base_url.clone(),
            timeout: Duration::from_secs(config.synthesis.timeout_secs),
            max_tokens: config.synthesis.max_tokens,
        }
    }
}

impl AppConfig {
    /// Providers whose API key env var is set, in configured order.
    pub fn active_providers(&self) -> Vec<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| resolve_api_key(&p.api_key_env).is_some())
            .collect()
    }

    /// Like [`Self::active_providers`], but an empty set is a config error.
    pub fn require_providers(&self) -> Result<Vec<&ProviderConfig>> {
        let active = self.active_providers();
        if active.is_empty() {
            let vars: Vec<&str> = self.providers.iter().map(|p| p.api_key_env.as_str()).collect();
            return Err(QuarryError::config(format!(
                "no research providers configured. Set at least one of: {}",
                vars.join(", ")
            )));
        }
        Ok(active)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.quarry/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| QuarryError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.quarry/quarry.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| QuarryError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| QuarryError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| QuarryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| QuarryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| QuarryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from `var_name`, treating empty values as unset.
pub fn resolve_api_key(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Reject configs that parse but cannot work.
fn validate(config: &AppConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(QuarryError::config("provider name must not be empty"));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(QuarryError::config(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        if let Some(base) = &provider.base_url {
            url::Url::parse(base).map_err(|e| {
                QuarryError::config(format!("invalid base_url for {}: {e}", provider.name))
            })?;
        }
    }
    if config.dispatch.provider_timeout_secs == 0 {
        return Err(QuarryError::config("dispatch.provider_timeout_secs must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("provider_timeout_secs"));
        assert!(toml_str.contains("QUARRY_ANTHROPIC_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.dispatch.provider_timeout_secs, 300);
        assert_eq!(parsed.providers.len(), 3);
        assert_eq!(parsed.providers[1].kind, ProviderKind::OpenaiCompat);
        assert_eq!(parsed.server.port, 8000);
    }

    #[test]
    fn config_with_custom_providers() {
        let toml_str = r#"
[dispatch]
provider_timeout_secs = 60

[[providers]]
name = "Kimi"
kind = "openai_compat"
model = "kimi-k2"
api_key_env = "QUARRY_MOONSHOT_API_KEY"
base_url = "https://api.moonshot.ai/v1"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].name, "Kimi");
        assert!(validate(&config).is_ok());

        let dispatch = DispatchConfig::from(&config);
        assert_eq!(dispatch.provider_timeout, Duration::from_secs(60));
    }

    #[test]
    fn duplicate_provider_names_rejected() {
        let mut config = AppConfig::default();
        config.providers[1].name = "Claude".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate provider name"));
    }

    #[test]
    fn missing_keys_yield_config_error() {
        let mut config = AppConfig::default();
        // Use unique env var names to avoid interfering with other tests
        for (i, provider) in config.providers.iter_mut().enumerate() {
            provider.api_key_env = format!("QUARRY_TEST_NONEXISTENT_KEY_{i}_98765");
        }
        assert!(config.active_providers().is_empty());
        let err = config.require_providers().unwrap_err();
        assert!(err.to_string().contains("no research providers configured"));
    }

    #[test]
    fn storage_path_expands_home() {
        let storage = StorageConfig {
            database_path: "/tmp/quarry.db".into(),
        };
        assert_eq!(storage.resolved_path().unwrap(), PathBuf::from("/tmp/quarry.db"));

        let storage = StorageConfig::default();
        let resolved = storage.resolved_path().unwrap();
        assert!(resolved.ends_with(".quarry/quarry.db"));
    }
}
