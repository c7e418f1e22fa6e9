//! A dedicated module for cluster manager options to ensure readonly access.
use std::path::PathBuf;
use std::time::Duration;

use jobserver_common::config::{AppConfig, ClusterDefaults};

#[readonly::make]
#[derive(Debug, Clone)]
pub struct ClusterManagerOptions {
    pub config_dir: PathBuf,
    pub refresh_interval: Duration,
    pub resource_refresh_interval: Duration,
    pub defaults: ClusterDefaults,
}

impl ClusterManagerOptions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config_dir: PathBuf::from(&config.cluster.config_dir),
            refresh_interval: Duration::from_secs(config.cluster.refresh_interval_secs),
            resource_refresh_interval: Duration::from_secs(
                config.cluster.resource_refresh_interval_secs,
            ),
            defaults: config.cluster.defaults.clone(),
        }
    }
}
