//! Configuration for proctor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proctor")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the engine database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Server-side attempt time limit in seconds. Submissions arriving
    /// after `started_at + time_limit_secs` are rejected regardless of
    /// what the client clock claims.
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: u64,

    /// Length of generated certificate verification codes
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    /// Maximum delivery attempts for an outbound task
    #[serde(default = "default_outbound_retries")]
    pub outbound_max_retries: u32,

    /// Initial backoff delay between outbound retries (doubles per retry)
    #[serde(default = "default_outbound_delay")]
    pub outbound_base_delay_ms: u64,

    /// Rolling rate-limit window in seconds
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,

    /// Requests allowed per identity per window
    #[serde(default = "default_rate_max")]
    pub rate_limit_max_requests: u32,

    /// Course -> linked module tags, for the built-in static module
    /// catalog. Deployments with a real lesson catalog replace this
    /// collaborator entirely.
    #[serde(default)]
    pub course_modules: HashMap<String, Vec<String>>,

    /// Provisioned API tokens for the built-in static identity resolver
    #[serde(default)]
    pub auth_tokens: Vec<AuthTokenEntry>,
}

/// One provisioned token for the static identity resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenEntry {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub staff: bool,
}

fn default_http_port() -> u16 {
    8093
}

fn default_time_limit() -> u64 {
    3600
}

fn default_code_length() -> usize {
    10
}

fn default_outbound_retries() -> u32 {
    5
}

fn default_outbound_delay() -> u64 {
    500
}

fn default_rate_window() -> u64 {
    60
}

fn default_rate_max() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            time_limit_secs: default_time_limit(),
            code_length: default_code_length(),
            outbound_max_retries: default_outbound_retries(),
            outbound_base_delay_ms: default_outbound_delay(),
            rate_limit_window_secs: default_rate_window(),
            rate_limit_max_requests: default_rate_max(),
            course_modules: HashMap::new(),
            auth_tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the engine database path
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("proctor.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
