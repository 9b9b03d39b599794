use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BunsekiError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_opt(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

// ── Top-level config ──────────────────────────────────────────

/// Application configuration loaded from TOML, then overridden by env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cloud project that owns agents and conversations.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Resource location (the data agent API only serves `global`).
    #[serde(default = "default_location")]
    pub location: String,

    /// Base URL of the data analytics REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth bearer token. When unset, `gcloud auth print-access-token` is used.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Looker OAuth client, attached to chats with Looker-backed agents.
    #[serde(default)]
    pub looker: LookerConfig,

    /// Directory holding agent template YAML files.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Wrap outgoing questions with the agent's system instruction.
    #[serde(default)]
    pub guardrail: bool,

    /// Create a default agent from the first template when none exist.
    #[serde(default = "default_auto_provision")]
    pub auto_provision: bool,

    /// Maximum result rows rendered per data fragment.
    #[serde(default = "default_row_limit")]
    pub result_row_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookerConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl LookerConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

fn default_location() -> String {
    "global".to_string()
}

fn default_api_base_url() -> String {
    "https://geminidataanalytics.googleapis.com".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("contexts")
}

fn default_auto_provision() -> bool {
    true
}

fn default_row_limit() -> usize {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: default_location(),
            api_base_url: default_api_base_url(),
            access_token: None,
            looker: LookerConfig::default(),
            templates_dir: default_templates_dir(),
            guardrail: false,
            auto_provision: default_auto_provision(),
            result_row_limit: default_row_limit(),
        }
    }
}

impl AppConfig {
    /// Return the default config directory path: ~/.config/bunseki/
    pub fn default_config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| {
                BunsekiError::NotConfigured("could not determine user config directory".into())
            })?
            .join("bunseki");
        Ok(dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path, then apply env
    /// overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Self>(&content).map_err(|e| {
                BunsekiError::Validation(format!(
                    "failed to parse config {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("BUNSEKI_PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Some(v) = env_opt("BUNSEKI_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = env_opt("BUNSEKI_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = env_opt("LOOKER_CLIENT_ID") {
            self.looker.client_id = Some(v);
        }
        if let Some(v) = env_opt("LOOKER_CLIENT_SECRET") {
            self.looker.client_secret = Some(v);
        }
        if let Some(v) = env_opt("BUNSEKI_TEMPLATES_DIR") {
            self.templates_dir = PathBuf::from(v);
        }
        if let Some(v) = env_bool("BUNSEKI_GUARDRAIL") {
            self.guardrail = v;
        }
        if let Some(v) = env_bool("BUNSEKI_AUTO_PROVISION") {
            self.auto_provision = v;
        }
    }

    /// The configured project id, or an error naming the missing setting.
    pub fn project_id(&self) -> Result<&str> {
        self.project_id.as_deref().ok_or_else(|| {
            BunsekiError::NotConfigured(
                "project_id (set BUNSEKI_PROJECT_ID or project_id in config.toml)".into(),
            )
        })
    }

    /// Parent resource for agents and conversations: `projects/{p}/locations/{l}`.
    pub fn parent(&self) -> Result<String> {
        Ok(format!("projects/{}/locations/{}", self.project_id()?, self.location))
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            project = self.project_id.as_deref().unwrap_or("(none)"),
            base_url = %self.api_base_url,
            token = if self.access_token.is_some() { "set" } else { "gcloud" },
            looker = self.looker.is_configured(),
            templates_dir = %self.templates_dir.display(),
            guardrail = self.guardrail,
            "config loaded"
        );
    }
}
