use std::path::PathBuf;

use crate::hadoop::HadoopConfiguration;
use crate::model::SchedulerType;
use crate::resource_manager::ActiveResourceManager;
use crate::security::ClusterSecurityProfile;
use crate::settings::ClusterSettings;

/// Everything the job server knows about a loaded cluster.
/// The state is immutable once built. A refresh replaces the whole state.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub code: String,
    pub scheduler_type: SchedulerType,
    /// The local directory holding the configuration files of the cluster.
    pub config_dir: PathBuf,
    pub configuration: HadoopConfiguration,
    pub settings: ClusterSettings,
    pub security: ClusterSecurityProfile,
    /// The active YARN resource manager, if one has been found.
    pub resource_manager: Option<ActiveResourceManager>,
    pub update_marker: i64,
}
