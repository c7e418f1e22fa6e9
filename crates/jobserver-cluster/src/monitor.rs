use std::sync::Arc;

use dashmap::DashMap;

use crate::model::ResourceSnapshot;

/// The latest resource snapshot of each cluster.
/// Snapshots are replaced as a whole so that readers never observe a partial update.
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    snapshots: DashMap<String, Arc<ResourceSnapshot>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cluster: &str) -> Option<Arc<ResourceSnapshot>> {
        self.snapshots.get(cluster).map(|x| Arc::clone(x.value()))
    }

    pub fn update(&self, cluster: &str, snapshot: ResourceSnapshot) {
        self.snapshots.insert(cluster.to_string(), Arc::new(snapshot));
    }

    pub fn remove(&self, cluster: &str) {
        self.snapshots.remove(cluster);
    }
}
