use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config/data dirs.
const APP_DIR: &str = "gmail-gate";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Klavis API key. Overridden by `KLAVIS_API_KEY`.
    pub klavis_api_key: Option<String>,
    /// OAuth client id embedded in authorization URLs. Overridden by `GOOGLE_CLIENT_ID`.
    pub google_client_id: Option<String>,
    /// Key for the chat completions endpoint. Overridden by `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,

    pub provisioning: ProvisioningConfig,
    pub agent: AgentConfig,
    pub readiness: ReadinessConfig,

    /// Where instance state lives.
    pub store: StoreBackend,
    pub data_dir: PathBuf,

    /// Address the HTTP service binds to.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub api_base: String,
    /// Host serving the white-labeled OAuth consent pages.
    pub oauth_host: String,
    /// Server name sent to the provisioning API.
    pub server_name: String,
    /// Path segment used in `/oauth/<service>/authorize`.
    pub oauth_service: String,
    pub platform_name: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.klavis.ai".to_string(),
            oauth_host: "api.klavis.ai".to_string(),
            server_name: "Gmail".to_string(),
            oauth_service: "gmail".to_string(),
            platform_name: "integrations-gmail".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub llm_base_url: String,
    /// Upper bound on model/tool round trips per prompt.
    pub max_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            max_turns: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            interval_ms: 1_000,
        }
    }
}

impl ReadinessConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map. State is lost on restart.
    Memory,
    /// SQLite database under `data_dir`.
    #[default]
    Sqlite,
}

/// Credentials the provisioning flow cannot start without.
#[derive(Clone)]
pub struct ProvisioningCredentials {
    pub api_key: String,
    pub client_id: String,
}

impl std::fmt::Debug for ProvisioningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningCredentials")
            .field("api_key", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".gmail-gate"));

        Self {
            klavis_api_key: None,
            google_client_id: None,
            openai_api_key: None,
            provisioning: ProvisioningConfig::default(),
            agent: AgentConfig::default(),
            readiness: ReadinessConfig::default(),
            store: StoreBackend::default(),
            data_dir,
            listen_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

impl Config {
    /// Path to the instance SQLite database.
    pub fn instances_db_path(&self) -> PathBuf {
        self.data_dir.join("instances.db")
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".gmail-gate/config.toml"))
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment wins over the file. Empty values are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("KLAVIS_API_KEY") {
            self.klavis_api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.google_client_id = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
    }

    /// Provisioning key and OAuth client id. Missing either is fatal at startup.
    pub fn provisioning_credentials(&self) -> Result<ProvisioningCredentials, Error> {
        let api_key = self
            .klavis_api_key
            .clone()
            .ok_or_else(|| Error::Config("KLAVIS_API_KEY is not set".into()))?;
        let client_id = self
            .google_client_id
            .clone()
            .ok_or_else(|| Error::Config("GOOGLE_CLIENT_ID is not set".into()))?;
        Ok(ProvisioningCredentials { api_key, client_id })
    }

    pub fn llm_api_key(&self) -> Result<String, Error> {
        self.openai_api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))
    }
}
