mod core;
mod options;
mod state;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use dashmap::DashMap;
pub use options::ClusterManagerOptions;
pub use state::ClusterState;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::monitor::ResourceMonitor;
use crate::repository::{ClusterRepository, KeytabProvider, RecordKeytabProvider};
use crate::resource_manager::ResourceManagerClient;
use crate::security::{KerberosLogin, KinitLogin};

/// Keeps the configuration, security profile, and resource snapshot of every
/// enabled cluster up to date.
pub struct ClusterManager {
    options: ClusterManagerOptions,
    repository: Arc<dyn ClusterRepository>,
    resource_manager_client: Arc<dyn ResourceManagerClient>,
    keytab_provider: Arc<dyn KeytabProvider>,
    kerberos_login: Arc<dyn KerberosLogin>,
    states: DashMap<String, Arc<ClusterState>>,
    monitor: ResourceMonitor,
    /// Distinguishes the configuration directories of successive cluster states.
    generation: AtomicU64,
}

impl ClusterManager {
    pub fn new(
        options: ClusterManagerOptions,
        repository: Arc<dyn ClusterRepository>,
        resource_manager_client: Arc<dyn ResourceManagerClient>,
    ) -> Self {
        Self {
            options,
            repository,
            resource_manager_client,
            keytab_provider: Arc::new(RecordKeytabProvider),
            kerberos_login: Arc::new(KinitLogin::new()),
            states: DashMap::new(),
            monitor: ResourceMonitor::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_keytab_provider(mut self, keytab_provider: Arc<dyn KeytabProvider>) -> Self {
        self.keytab_provider = keytab_provider;
        self
    }

    pub fn with_kerberos_login(mut self, kerberos_login: Arc<dyn KerberosLogin>) -> Self {
        self.kerberos_login = kerberos_login;
        self
    }
}

/// The background refresh tasks of a [`ClusterManager`].
pub struct ClusterManagerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterManagerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
