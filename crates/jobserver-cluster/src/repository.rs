use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::info;

use crate::error::{ClusterError, ClusterResult};
use crate::model::Cluster;

pub const DEFAULT_KEYTAB_FILE_NAME: &str = "user.keytab";
pub const DEFAULT_KRB5_CONF_FILE_NAME: &str = "krb5.conf";

/// Read access to the persisted cluster definitions.
#[async_trait::async_trait]
pub trait ClusterRepository: Send + Sync + 'static {
    async fn list_enabled_clusters(&self) -> ClusterResult<Vec<Cluster>>;

    async fn get_cluster(&self, code: &str) -> ClusterResult<Option<Cluster>>;

    /// Returns a marker that changes whenever the cluster definition is updated.
    async fn get_update_marker(&self, code: &str) -> ClusterResult<i64>;
}

/// Provides the Kerberos material of a cluster.
#[async_trait::async_trait]
pub trait KeytabProvider: Send + Sync + 'static {
    /// Writes the keytab and `krb5.conf` of the cluster into the directory
    /// and returns the keytab path.
    async fn download_keytab(&self, cluster: &Cluster, dest_dir: &Path) -> ClusterResult<PathBuf>;
}

/// Writes the Kerberos material embedded in the cluster record.
pub struct RecordKeytabProvider;

#[async_trait::async_trait]
impl KeytabProvider for RecordKeytabProvider {
    async fn download_keytab(&self, cluster: &Cluster, dest_dir: &Path) -> ClusterResult<PathBuf> {
        let Some(keytab) = &cluster.kerberos_keytab else {
            return Err(ClusterError::invalid(format!(
                "keytab is missing for cluster {}",
                cluster.code
            )));
        };
        tokio::fs::create_dir_all(dest_dir).await?;
        let keytab_path = dest_dir.join(DEFAULT_KEYTAB_FILE_NAME);
        tokio::fs::write(&keytab_path, keytab).await?;
        if let Some(config) = &cluster.kerberos_config {
            tokio::fs::write(dest_dir.join(DEFAULT_KRB5_CONF_FILE_NAME), config).await?;
        }
        info!("downloaded keytab of cluster {} to {}", cluster.code, keytab_path.display());
        Ok(keytab_path)
    }
}

#[derive(Default)]
pub struct MemoryClusterRepository {
    clusters: RwLock<HashMap<String, (Cluster, i64)>>,
}

impl MemoryClusterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the cluster and bumps its update marker.
    pub fn upsert(&self, cluster: Cluster) -> ClusterResult<()> {
        let mut clusters = self.clusters.write()?;
        let marker = clusters.get(&cluster.code).map(|(_, m)| m + 1).unwrap_or(1);
        clusters.insert(cluster.code.clone(), (cluster, marker));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterRepository for MemoryClusterRepository {
    async fn list_enabled_clusters(&self) -> ClusterResult<Vec<Cluster>> {
        let clusters = self.clusters.read()?;
        let mut out = clusters
            .values()
            .filter(|(c, _)| c.enabled)
            .map(|(c, _)| c.clone())
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    async fn get_cluster(&self, code: &str) -> ClusterResult<Option<Cluster>> {
        Ok(self.clusters.read()?.get(code).map(|(c, _)| c.clone()))
    }

    async fn get_update_marker(&self, code: &str) -> ClusterResult<i64> {
        self.clusters
            .read()?
            .get(code)
            .map(|(_, m)| *m)
            .ok_or_else(|| ClusterError::NotFound(code.to_string()))
    }
}
