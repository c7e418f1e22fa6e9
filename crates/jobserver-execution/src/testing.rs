#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use figment::providers::Serialized;
use figment::Figment;
use jobserver_cluster::{
    Cluster, ClusterManager, ClusterManagerOptions, HttpResourceManagerClient,
    MemoryClusterRepository, ResourceSnapshot, SchedulerType,
};
use jobserver_common::config::AppConfig;
use jobserver_telemetry::instance_log::FileInstanceLogSink;

use crate::model::{Driver, InstanceKind, JobInstance, JobSubmissionRequest, JobType};
use crate::pipeline::{JobServerContext, SubmissionPipeline, SubmissionPipelineOptions};
use crate::scheduler::SchedulerClient;
use crate::store::{DriverStore, InstanceStore, MemoryDriverStore, MemoryInstanceStore};

const SIMPLE_CORE_SITE: &str = "<configuration><property>\
    <name>hadoop.security.authentication</name><value>simple</value>\
    </property></configuration>";

pub fn request(code: &str, job_type: JobType, kind: InstanceKind) -> JobSubmissionRequest {
    JobSubmissionRequest {
        instance_code: code.to_string(),
        job_name: "job".to_string(),
        job_type,
        instance_kind: kind,
        job_text: "true".to_string(),
        job_config: String::new(),
        cluster_code: "c1".to_string(),
        queue: None,
        access_key: None,
        schedule_time: Utc::now(),
    }
}

/// A job server with in-memory stores and a single cluster `c1`
/// that requires 1000MB of available memory.
pub struct TestEnvironment {
    _dir: tempfile::TempDir,
    pub config: AppConfig,
    pub repository: Arc<MemoryClusterRepository>,
    pub cluster_manager: Arc<ClusterManager>,
    pub instances: Arc<MemoryInstanceStore>,
    pub drivers: Arc<MemoryDriverStore>,
    pub log_sink: Arc<FileInstanceLogSink>,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        Self::with_config(Figment::new()).await
    }

    pub async fn with_config(overrides: Figment) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let config = AppConfig::load_from(
            Figment::from(Serialized::default(
                "cluster.config_dir",
                format!("{root}/config"),
            ))
            .merge(Serialized::default(
                "telemetry.instance_log_dir",
                format!("{root}/logs"),
            ))
            .merge(overrides),
        )
        .unwrap();

        let repository = Arc::new(MemoryClusterRepository::new());
        let mut cluster = Cluster::new("c1", SchedulerType::Kubernetes);
        cluster.core_config = Some(SIMPLE_CORE_SITE.to_string());
        cluster.kubernetes_config = Some("apiVersion: v1\nkind: Config\n".to_string());
        cluster.jobserver_config = "min_memory_mb = 1000\n".to_string();
        repository.upsert(cluster).unwrap();

        let client = Arc::new(
            HttpResourceManagerClient::new(Duration::from_secs(1), Duration::from_secs(1))
                .unwrap(),
        );
        let cluster_manager = Arc::new(ClusterManager::new(
            ClusterManagerOptions::new(&config),
            repository.clone(),
            client,
        ));
        cluster_manager.initialize().await.unwrap();

        let log_sink = Arc::new(FileInstanceLogSink::new(&config.telemetry.instance_log_dir));
        Self {
            _dir: dir,
            config,
            repository,
            cluster_manager,
            instances: Arc::new(MemoryInstanceStore::new()),
            drivers: Arc::new(MemoryDriverStore::new()),
            log_sink,
        }
    }

    pub fn context(&self, scheduler: Arc<dyn SchedulerClient>) -> JobServerContext {
        JobServerContext {
            cluster_manager: Arc::clone(&self.cluster_manager),
            instances: self.instances.clone(),
            drivers: self.drivers.clone(),
            scheduler,
            log_sink: self.log_sink.clone(),
        }
    }

    pub fn pipeline(&self, scheduler: Arc<dyn SchedulerClient>) -> Arc<SubmissionPipeline> {
        let options = SubmissionPipelineOptions::new(&self.config);
        Arc::new(SubmissionPipeline::try_new(options, self.context(scheduler)).unwrap())
    }

    pub async fn create_instance(&self, request: JobSubmissionRequest) -> JobSubmissionRequest {
        self.instances
            .create_if_absent(JobInstance::new(&request))
            .await
            .unwrap();
        request
    }

    pub fn set_snapshot(&self, cluster: &str, memory_mb: i64, virtual_cores: i64) {
        self.cluster_manager.resource_monitor().update(
            cluster,
            ResourceSnapshot {
                available_memory_mb: memory_mb,
                available_virtual_cores: virtual_cores,
                fetched_at: Utc::now(),
            },
        );
    }

    pub async fn add_idle_shared_driver(&self, cluster: &str) -> Driver {
        self.add_idle_shared_driver_at(cluster, "127.0.0.1:1").await
    }

    /// Adds an idle shareable driver in the `default` queue listening at the address.
    pub async fn add_idle_shared_driver_at(&self, cluster: &str, address: &str) -> Driver {
        let queue = Some("default".to_string());
        let driver = self
            .drivers
            .create_pending(cluster, true, queue.clone())
            .await
            .unwrap();
        let application_id = format!("application_0000000000001_{}", driver.id);
        self.drivers
            .mark_provisioned(driver.id, &application_id, address, queue)
            .await
            .unwrap();
        self.drivers.release_to_idle(driver.id).await.unwrap();
        self.drivers.get(driver.id).await.unwrap().unwrap()
    }
}
