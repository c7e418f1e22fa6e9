use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    Yarn,
    Kubernetes,
}

/// A cluster definition as stored by the administration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub code: String,
    pub name: String,
    pub scheduler_type: SchedulerType,
    pub enabled: bool,
    pub kerberos_enabled: bool,
    pub kerberos_user: Option<String>,
    pub kerberos_keytab: Option<Vec<u8>>,
    pub kerberos_config: Option<String>,
    /// Per-cluster overrides of the job server settings, in TOML.
    pub jobserver_config: String,
    pub engine_config: String,
    pub core_config: Option<String>,
    pub hdfs_config: Option<String>,
    pub yarn_config: Option<String>,
    pub hive_config: Option<String>,
    pub kubernetes_config: Option<String>,
}

impl Cluster {
    pub fn new(code: impl Into<String>, scheduler_type: SchedulerType) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            scheduler_type,
            enabled: true,
            kerberos_enabled: false,
            kerberos_user: None,
            kerberos_keytab: None,
            kerberos_config: None,
            jobserver_config: String::new(),
            engine_config: String::new(),
            core_config: None,
            hdfs_config: None,
            yarn_config: None,
            hive_config: None,
            kubernetes_config: None,
        }
    }
}

/// The available scheduler resources of a cluster at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub available_memory_mb: i64,
    pub available_virtual_cores: i64,
    pub fetched_at: DateTime<Utc>,
}
