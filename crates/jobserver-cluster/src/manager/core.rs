use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;

use crate::error::{ClusterError, ClusterResult};
use crate::hadoop::HadoopConfiguration;
use crate::manager::{ClusterManager, ClusterManagerHandle, ClusterState};
use crate::model::{Cluster, ResourceSnapshot, SchedulerType};
use crate::monitor::ResourceMonitor;
use crate::repository::DEFAULT_KRB5_CONF_FILE_NAME;
use crate::resource_manager::{find_active_resource_manager, ActiveResourceManager};
use crate::security::{ClusterSecurityProfile, Identity, KerberosProfile, SecurityContext};
use crate::settings::ClusterSettings;

const CORE_SITE: &str = "core-site.xml";
const HDFS_SITE: &str = "hdfs-site.xml";
const YARN_SITE: &str = "yarn-site.xml";
const HIVE_SITE: &str = "hive-site.xml";
const ENGINE_CONFIG: &str = "flink-conf.yaml";
const KUBERNETES_CONFIG: &str = "kubernetes.conf";
const CREDENTIAL_CACHE: &str = "krb5cc";

async fn clear_dir(path: &Path) -> ClusterResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {e}", path.display()),
    }
}

/// Compares a reported resource amount, which can be negative, with a configured minimum.
fn is_below(available: i64, minimum: u64) -> bool {
    i128::from(available) < i128::from(minimum)
}

async fn write_config_file(dir: &Path, name: &str, content: Option<&str>) -> ClusterResult<bool> {
    match content {
        Some(content) if !content.trim().is_empty() => {
            tokio::fs::write(dir.join(name), content).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

impl ClusterManager {
    /// Clears the local configuration root and loads every enabled cluster.
    /// Clusters that fail to load are logged and retried by the next refresh.
    pub async fn initialize(&self) -> ClusterResult<()> {
        clear_dir(&self.options.config_dir).await?;
        self.refresh_configs().await
    }

    /// Starts the background tasks refreshing cluster configurations and resource snapshots.
    pub fn start(self: &Arc<Self>) -> ClusterManagerHandle {
        let (tx, rx) = watch::channel(false);
        let config_task = {
            let manager = Arc::clone(self);
            Self::spawn_periodic(self.options.refresh_interval, rx.clone(), move || {
                let manager = Arc::clone(&manager);
                async move {
                    if let Err(e) = manager.refresh_configs().await {
                        error!("failed to refresh cluster configurations: {e}");
                    }
                }
            })
        };
        let resource_task = {
            let manager = Arc::clone(self);
            Self::spawn_periodic(self.options.resource_refresh_interval, rx, move || {
                let manager = Arc::clone(&manager);
                async move { manager.refresh_resources().await }
            })
        };
        ClusterManagerHandle {
            shutdown: tx,
            tasks: vec![config_task, resource_task],
        }
    }

    fn spawn_periodic<F, Fut>(
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut f: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately and the initial load is done by the caller.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => f().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn state(&self, code: &str) -> Option<Arc<ClusterState>> {
        self.states.get(code).map(|x| Arc::clone(x.value()))
    }

    pub fn resource_monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn resource_snapshot(&self, code: &str) -> Option<Arc<ResourceSnapshot>> {
        self.monitor.get(code)
    }

    /// Reloads every enabled cluster whose update marker has changed,
    /// and forgets clusters that are no longer enabled.
    pub async fn refresh_configs(&self) -> ClusterResult<()> {
        let clusters = self.repository.list_enabled_clusters().await?;
        let stale = self
            .states
            .iter()
            .map(|x| x.key().clone())
            .filter(|code| !clusters.iter().any(|c| &c.code == code))
            .collect::<Vec<_>>();
        for code in stale {
            info!("removing cluster {code} since it is no longer enabled");
            self.forget(&code).await;
        }
        for cluster in clusters {
            if let Err(e) = self.refresh_if_changed(&cluster.code).await {
                error!("failed to refresh cluster {}: {e}", cluster.code);
            }
        }
        Ok(())
    }

    /// Reloads the cluster if its update marker differs from the loaded one.
    /// Returns whether the cluster was reloaded.
    pub async fn refresh_if_changed(&self, code: &str) -> ClusterResult<bool> {
        let marker = self.repository.get_update_marker(code).await?;
        if self.state(code).is_some_and(|s| s.update_marker == marker) {
            return Ok(false);
        }
        self.load_or_refresh(code).await?;
        Ok(true)
    }

    /// Downloads the cluster definition, writes its configuration files,
    /// and replaces the cached state of the cluster.
    pub async fn load_or_refresh(&self, code: &str) -> ClusterResult<Arc<ClusterState>> {
        let cluster = match self.repository.get_cluster(code).await? {
            Some(cluster) if cluster.enabled => cluster,
            _ => {
                self.forget(code).await;
                return Err(ClusterError::NotFound(code.to_string()));
            }
        };
        let marker = self.repository.get_update_marker(code).await?;
        // The state is built in its own directory so that the files of the current state
        // stay intact until the new state replaces it.
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let dir = self.options.config_dir.join(format!("{code}.{generation}"));
        let state = match self.build_state(&cluster, marker, dir.clone()).await {
            Ok(state) => Arc::new(state),
            Err(e) => {
                remove_dir(&dir).await;
                if matches!(e, ClusterError::InconsistentKerberos { .. }) {
                    self.forget(code).await;
                }
                return Err(e);
            }
        };
        if let Some(previous) = self.states.insert(code.to_string(), Arc::clone(&state)) {
            remove_dir(&previous.config_dir).await;
        }
        info!("loaded configuration of cluster {code} at update marker {marker}");
        Ok(state)
    }

    async fn forget(&self, code: &str) {
        self.monitor.remove(code);
        if let Some((_, state)) = self.states.remove(code) {
            remove_dir(&state.config_dir).await;
        }
    }

    async fn build_state(
        &self,
        cluster: &Cluster,
        marker: i64,
        dir: PathBuf,
    ) -> ClusterResult<ClusterState> {
        let code = cluster.code.as_str();
        clear_dir(&dir).await?;

        let mut configuration = HadoopConfiguration::new();
        for (name, content) in [
            (CORE_SITE, cluster.core_config.as_deref()),
            (HDFS_SITE, cluster.hdfs_config.as_deref()),
        ] {
            if write_config_file(&dir, name, content).await? {
                configuration.add_resource(&dir.join(name)).await?;
            } else {
                warn!("{name} is not configured for cluster {code}");
            }
        }
        write_config_file(&dir, ENGINE_CONFIG, Some(&cluster.engine_config)).await?;
        match cluster.scheduler_type {
            SchedulerType::Yarn => {
                if write_config_file(&dir, YARN_SITE, cluster.yarn_config.as_deref()).await? {
                    configuration.add_resource(&dir.join(YARN_SITE)).await?;
                }
            }
            SchedulerType::Kubernetes => {
                write_config_file(&dir, KUBERNETES_CONFIG, cluster.kubernetes_config.as_deref())
                    .await?;
            }
        }
        if write_config_file(&dir, HIVE_SITE, cluster.hive_config.as_deref()).await? {
            configuration.add_resource(&dir.join(HIVE_SITE)).await?;
        }

        let configured = configuration.is_kerberos_authentication();
        if configured != cluster.kerberos_enabled {
            return Err(ClusterError::InconsistentKerberos {
                cluster: code.to_string(),
                message: format!(
                    "Kerberos is {} for the cluster but the configuration uses {} authentication",
                    if cluster.kerberos_enabled {
                        "enabled"
                    } else {
                        "disabled"
                    },
                    if configured { "kerberos" } else { "simple" },
                ),
            });
        }

        let settings = ClusterSettings::load(&self.options.defaults, &cluster.jobserver_config)?;
        let security = if cluster.kerberos_enabled {
            let principal = cluster
                .kerberos_user
                .clone()
                .filter(|x| !x.is_empty())
                .ok_or_else(|| {
                    ClusterError::invalid(format!("Kerberos user is missing for cluster {code}"))
                })?;
            let keytab_path = self.keytab_provider.download_keytab(cluster, &dir).await?;
            let krb5_conf_path = dir.join(DEFAULT_KRB5_CONF_FILE_NAME);
            if !tokio::fs::try_exists(&krb5_conf_path).await? {
                return Err(ClusterError::invalid(format!(
                    "{DEFAULT_KRB5_CONF_FILE_NAME} is missing for cluster {code}"
                )));
            }
            ClusterSecurityProfile::Kerberos(KerberosProfile {
                principal,
                keytab_path,
                krb5_conf_path,
                credential_cache: dir.join(CREDENTIAL_CACHE),
            })
        } else {
            ClusterSecurityProfile::Simple {
                user: settings.driver_user.clone(),
            }
        };

        let resource_manager = match cluster.scheduler_type {
            SchedulerType::Yarn => self.probe_resource_manager(code, &configuration).await,
            SchedulerType::Kubernetes => None,
        };

        Ok(ClusterState {
            code: code.to_string(),
            scheduler_type: cluster.scheduler_type,
            config_dir: dir,
            configuration,
            settings,
            security,
            resource_manager,
            update_marker: marker,
        })
    }

    async fn probe_resource_manager(
        &self,
        code: &str,
        configuration: &HadoopConfiguration,
    ) -> Option<ActiveResourceManager> {
        match find_active_resource_manager(
            code,
            configuration,
            self.resource_manager_client.as_ref(),
        )
        .await
        {
            Ok(rm) => {
                info!("active resource manager of cluster {code}: {}", rm.address);
                Some(rm)
            }
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }

    /// Refreshes the resource snapshot of every loaded YARN cluster.
    pub async fn refresh_resources(&self) {
        let states = self
            .states
            .iter()
            .filter(|x| x.scheduler_type == SchedulerType::Yarn)
            .map(|x| Arc::clone(x.value()))
            .collect::<Vec<_>>();
        for state in states {
            if let Err(e) = self.refresh_cluster_resources(&state).await {
                warn!(
                    "failed to refresh resources of cluster {}, keeping the previous snapshot: {e}",
                    state.code
                );
            }
        }
    }

    async fn refresh_cluster_resources(&self, state: &Arc<ClusterState>) -> ClusterResult<()> {
        let code = state.code.as_str();
        if let Some(rm) = &state.resource_manager {
            match self
                .resource_manager_client
                .get_resource_metrics(&rm.webapp_address)
                .await
            {
                Ok(snapshot) => {
                    self.monitor.update(code, snapshot);
                    return Ok(());
                }
                Err(e) => {
                    warn!("failed to get metrics from resource manager {}: {e}", rm.address);
                }
            }
        }
        // The active resource manager may have changed after a failover.
        let Some(rm) = self.probe_resource_manager(code, &state.configuration).await else {
            return Err(ClusterError::NoActiveResourceManager(code.to_string()));
        };
        let snapshot = self
            .resource_manager_client
            .get_resource_metrics(&rm.webapp_address)
            .await?;
        self.monitor.update(code, snapshot);
        // Only replace the state if it has not been reloaded in the meantime.
        let replacement = ClusterState {
            resource_manager: Some(rm),
            ..state.as_ref().clone()
        };
        if let Some(mut entry) = self.states.get_mut(code) {
            if Arc::ptr_eq(entry.value(), state) {
                *entry = Arc::new(replacement);
            }
        }
        Ok(())
    }

    /// Fails if the cached resources of the cluster are below its configured minimums.
    /// A cluster without a snapshot is admitted.
    pub fn check_resource_limit(&self, code: &str) -> ClusterResult<()> {
        let state = self
            .state(code)
            .ok_or_else(|| ClusterError::NotFound(code.to_string()))?;
        let Some(snapshot) = self.monitor.get(code) else {
            info!("no resource snapshot for cluster {code}, skipping the resource check");
            return Ok(());
        };
        let settings = &state.settings;
        if is_below(snapshot.available_memory_mb, settings.min_memory_mb) {
            return Err(ClusterError::ResourceLimit(format!(
                "available memory of cluster {code}: {}MB, minimum required: {}MB",
                snapshot.available_memory_mb, settings.min_memory_mb
            )));
        }
        if is_below(snapshot.available_virtual_cores, settings.min_virtual_cores) {
            return Err(ClusterError::ResourceLimit(format!(
                "available virtual cores of cluster {code}: {}, minimum required: {}",
                snapshot.available_virtual_cores, settings.min_virtual_cores
            )));
        }
        info!(
            "resources of cluster {code} are sufficient: {}MB memory, {} virtual cores",
            snapshot.available_memory_mb, snapshot.available_virtual_cores
        );
        Ok(())
    }

    /// Authenticates against the cluster and returns the identity to act as.
    pub async fn security_context(&self, code: &str) -> ClusterResult<SecurityContext> {
        let Some(state) = self.state(code) else {
            return Err(ClusterError::authentication(
                code,
                "unknown",
                "cluster configuration is not loaded",
            ));
        };
        let identity = match &state.security {
            ClusterSecurityProfile::Simple { user } => Identity::Simple { user: user.clone() },
            ClusterSecurityProfile::Kerberos(profile) => {
                self.kerberos_login
                    .login(profile)
                    .await
                    .map_err(|e| {
                        ClusterError::authentication(code, state.security.authentication(), e)
                    })?;
                Identity::Kerberos {
                    principal: profile.principal.clone(),
                    credential_cache: profile.credential_cache.clone(),
                }
            }
        };
        Ok(SecurityContext {
            cluster_code: code.to_string(),
            identity,
        })
    }

    /// Runs the unit of work as the service identity of the cluster.
    pub async fn run_secured<F, Fut, T>(&self, code: &str, f: F) -> ClusterResult<T>
    where
        F: FnOnce(SecurityContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let context = self.security_context(code).await?;
        Ok(f(context).await)
    }
}
