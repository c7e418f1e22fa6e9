pub mod error;
mod hadoop;
mod manager;
mod model;
mod monitor;
mod repository;
mod resource_manager;
mod security;
mod settings;

pub use hadoop::HadoopConfiguration;
pub use manager::{ClusterManager, ClusterManagerHandle, ClusterManagerOptions, ClusterState};
pub use model::{Cluster, ResourceSnapshot, SchedulerType};
pub use monitor::ResourceMonitor;
pub use repository::{
    ClusterRepository, KeytabProvider, MemoryClusterRepository, RecordKeytabProvider,
    DEFAULT_KEYTAB_FILE_NAME, DEFAULT_KRB5_CONF_FILE_NAME,
};
pub use resource_manager::{
    ActiveResourceManager, EndpointHealth, HttpResourceManagerClient, ResourceManagerClient,
};
pub use security::{
    ClusterSecurityProfile, Identity, KerberosLogin, KerberosProfile, KinitLogin, SecurityContext,
};
pub use settings::ClusterSettings;
