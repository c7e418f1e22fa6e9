use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use jobserver_common::config::ClusterDefaults;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// Job server settings of one cluster, after applying the overrides of the cluster record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub min_memory_mb: u64,
    pub min_virtual_cores: u64,
    pub driver_user: String,
}

impl ClusterSettings {
    pub fn load(defaults: &ClusterDefaults, overrides: &str) -> ClusterResult<Self> {
        Figment::from(Serialized::defaults(defaults))
            .merge(Toml::string(overrides))
            .extract()
            .map_err(|e| ClusterError::invalid(format!("invalid cluster settings: {e}")))
    }
}
