use crate::error::{Error, Result};
use crate::server::ServerDraft;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of actix workers for the admin API
pub const DEFAULT_WORKERS: usize = 4;

/// Settings of the Guardian health prober.
///
/// # Examples
///
/// ```
/// use fleet_guardian::config::GuardianConfig;
///
/// let guardian = GuardianConfig::default();
/// assert_eq!(guardian.check_interval_secs, 30);
/// assert_eq!(guardian.unhealthy_threshold, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Seconds between two scheduled passes over the fleet
    pub check_interval_secs: u64,
    /// Budget of a single protocol reachability check
    pub probe_timeout_secs: u64,
    /// Upper bound for `testSSH` and `triggerHealthCheck`
    pub on_demand_timeout_secs: u64,
    /// Consecutive failures above which a server is `unhealthy` regardless of partial reachability
    pub unhealthy_threshold: u32,
    /// Whether the Guardian may take a failing server offline on its own
    pub auto_offline: bool,
    /// Consecutive failures at which the Guardian requests `offline`
    pub auto_offline_threshold: u32,
    /// `ssh` client binary
    pub ssh_binary: String,
    /// `sshpass` binary, used for password logins
    pub sshpass_binary: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            probe_timeout_secs: 5,
            on_demand_timeout_secs: 30,
            unhealthy_threshold: 3,
            auto_offline: true,
            auto_offline_threshold: 10,
            ssh_binary: "ssh".to_string(),
            sshpass_binary: "sshpass".to_string(),
        }
    }
}

impl GuardianConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn on_demand_timeout(&self) -> Duration {
        Duration::from_secs(self.on_demand_timeout_secs)
    }
}

/// Settings of the lifecycle controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a transition waits for the per-server lock
    pub lock_wait_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { lock_wait_ms: 2000 }
    }
}

impl LifecycleConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

/// Settings of the load forecaster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub default_horizon_hours: u32,
    pub max_horizon_hours: u32,
    /// Distinct hourly buckets needed before anything is predicted
    pub min_history_hours: usize,
    /// Exponential smoothing factor in (0, 1]
    pub smoothing: f64,
    /// Load samples older than this are dropped
    pub retention_hours: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_horizon_hours: 8,
            max_horizon_hours: 168,
            min_history_hours: 3,
            smoothing: 0.5,
            retention_hours: 336,
        }
    }
}

/// Where the registry is persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// JSON file, in-memory only when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where Guardian log entries are mirrored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianLogConfig {
    /// JSON-lines file, in-memory only when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Bearer token authentication for the admin API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerAuthConfig {
    pub token: String,
}

/// Authentication settings for the admin API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub bearer: Option<BearerAuthConfig>,
}

/// Settings of the actix-web admin API.
///
/// # Examples
///
/// ```
/// use fleet_guardian::config::{ApiConfig, AuthConfig, BearerAuthConfig};
///
/// let api = ApiConfig {
///     address: "127.0.0.1".to_string(),
///     port: 8080,
///     workers: Some(2),
///     authenticate: Some(AuthConfig {
///         bearer: Some(BearerAuthConfig { token: "secret".to_string() }),
///     }),
/// };
/// assert_eq!(api.port, 8080);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub authenticate: Option<AuthConfig>,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            workers: None,
            authenticate: None,
        }
    }
}

impl ApiConfig {
    /// Configured bearer token, if authentication is enabled
    pub fn bearer_token(&self) -> Option<&str> {
        self.authenticate
            .as_ref()
            .and_then(|a| a.bearer.as_ref())
            .map(|b| b.token.as_str())
    }
}

/// Main configuration of the fleet controller.
///
/// Every section is optional. A minimal file only lists the servers to seed:
///
/// ```json
/// {
///   "guardian": { "check_interval_secs": 30, "auto_offline_threshold": 10 },
///   "api": { "address": "0.0.0.0", "port": 8080 },
///   "servers": [
///     {
///       "name": "fra-1",
///       "location": "Frankfurt",
///       "country_code": "DE",
///       "ip_address": "203.0.113.10",
///       "capacity": 500,
///       "protocols": ["shadowsocks", "wireguard"]
///     }
///   ]
/// }
/// ```
///
/// # Examples
///
/// ```
/// use fleet_guardian::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "guardian": { "unhealthy_threshold": 5 } }"#).unwrap();
/// assert_eq!(config.guardian.unhealthy_threshold, 5);
/// assert!(config.servers.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub guardian: GuardianConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub guardian_log: GuardianLogConfig,
    /// Admin API, not started when absent
    #[serde(default)]
    pub api: Option<ApiConfig>,
    /// Servers created on first start, when the registry is empty
    #[serde(default)]
    pub servers: Vec<ServerDraft>,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON/YAML
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::parse_from_yaml_str(&content)
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }
}
