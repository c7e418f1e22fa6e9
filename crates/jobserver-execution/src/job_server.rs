use std::sync::Arc;
use std::time::Duration;

use jobserver_cluster::{
    ClusterManager, ClusterManagerHandle, ClusterManagerOptions, ClusterRepository,
    HttpResourceManagerClient,
};
use jobserver_common::config::AppConfig;
use jobserver_telemetry::instance_log::InstanceLogSink;
use log::{error, info};

use crate::error::ExecutionResult;
use crate::pipeline::{JobServerContext, SubmissionPipeline, SubmissionPipelineOptions};
use crate::scheduler::SchedulerClient;
use crate::service::JobService;
use crate::store::{DriverStore, InstanceStore};

/// The storage and scheduler backends of a job server.
pub struct JobServerBackends {
    pub repository: Arc<dyn ClusterRepository>,
    pub instances: Arc<dyn InstanceStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub scheduler: Arc<dyn SchedulerClient>,
    pub log_sink: Arc<dyn InstanceLogSink>,
}

/// A running job server with its cluster refresh tasks.
pub struct JobServer {
    service: JobService,
    handle: ClusterManagerHandle,
}

impl JobServer {
    pub async fn start(config: &AppConfig, backends: JobServerBackends) -> ExecutionResult<Self> {
        let client = HttpResourceManagerClient::new(
            Duration::from_secs(config.cluster.http_connect_timeout_secs),
            Duration::from_secs(config.cluster.http_request_timeout_secs),
        )?;
        let cluster_manager = Arc::new(ClusterManager::new(
            ClusterManagerOptions::new(config),
            backends.repository,
            Arc::new(client),
        ));
        cluster_manager.initialize().await?;
        let handle = cluster_manager.start();
        let context = JobServerContext {
            cluster_manager,
            instances: backends.instances,
            drivers: backends.drivers,
            scheduler: backends.scheduler,
            log_sink: backends.log_sink,
        };
        let pipeline = match SubmissionPipeline::try_new(
            SubmissionPipelineOptions::new(config),
            context,
        ) {
            Ok(x) => Arc::new(x),
            Err(e) => {
                handle.shutdown().await;
                return Err(e);
            }
        };
        info!("job server is ready");
        Ok(Self {
            service: JobService::new(pipeline),
            handle,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// Waits for in-flight provisioning and stops the cluster refresh tasks.
    pub async fn shutdown(self) {
        if let Err(e) = self.service.pipeline().wait_for_provisioning().await {
            error!("failed to wait for provisioning tasks: {e}");
        }
        self.handle.shutdown().await;
        info!("job server has stopped");
    }
}
