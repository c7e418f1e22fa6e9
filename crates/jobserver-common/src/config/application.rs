use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub submit: SubmitConfig,
    pub driver: DriverConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Self::load_from(Figment::new())
    }

    /// Loads the configuration with additional providers merged over the defaults
    /// but under the environment variables.
    pub fn load_from(figment: Figment) -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(figment)
            .admerge(Env::prefixed("JOBSERVER__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub external_host: String,
    pub external_port: u16,
}

impl ServerConfig {
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}", self.external_host, self.external_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub config_dir: String,
    pub refresh_interval_secs: u64,
    pub resource_refresh_interval_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,
    pub defaults: ClusterDefaults,
}

/// Cluster settings that can be overridden by the `jobserver_config` of each cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDefaults {
    pub min_memory_mb: u64,
    pub min_virtual_cores: u64,
    /// The user to impersonate when Kerberos is disabled for the cluster.
    pub driver_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    pub max_concurrent_provisions: usize,
    pub max_retry_count: u32,
    pub dispatch_retry_count: usize,
    pub dispatch_retry_delay_millis: u64,
    pub driver_connect_timeout_secs: u64,
    pub driver_request_timeout_secs: u64,
    pub dedicated_driver_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub id: u64,
    pub listen_host: String,
    pub listen_port: u16,
    pub shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub instance_log_dir: String,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use figment::providers::Serialized;

    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = AppConfig::load_from(Figment::new()).unwrap();
        assert_eq!(config.cluster.refresh_interval_secs, 10);
        assert_eq!(config.submit.max_retry_count, 2);
        assert_eq!(config.submit.dispatch_retry_count, 1);
        assert_eq!(config.submit.dispatch_retry_delay_millis, 100);
        assert!(config.submit.dedicated_driver_prefixes.is_empty());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let overrides = Figment::from(Serialized::default("cluster.defaults.min_memory_mb", 4096))
            .merge(Serialized::default("server.external_port", 8080));
        let config = AppConfig::load_from(overrides).unwrap();
        assert_eq!(config.cluster.defaults.min_memory_mb, 4096);
        assert_eq!(config.server.callback_url(), "http://127.0.0.1:8080");
    }
}
