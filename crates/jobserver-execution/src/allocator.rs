use std::sync::Arc;

use jobserver_cluster::error::ClusterError;
use jobserver_cluster::ClusterManager;
use log::{info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::model::{AllocationOutcome, InstanceKind, InstanceStatus, JobSubmissionRequest, JobType};
use crate::store::{DriverStore, InstanceStore};

/// Decides whether a submission must run on a driver of its own.
pub trait DriverPolicy: Send + Sync + 'static {
    fn requires_dedicated_driver(&self, request: &JobSubmissionRequest) -> bool;
}

/// Streaming jobs and jobs configuring any of the given key prefixes get a dedicated driver.
pub struct DefaultDriverPolicy {
    dedicated_prefixes: Vec<String>,
}

impl DefaultDriverPolicy {
    pub fn new(dedicated_prefixes: Vec<String>) -> Self {
        Self { dedicated_prefixes }
    }
}

impl DriverPolicy for DefaultDriverPolicy {
    fn requires_dedicated_driver(&self, request: &JobSubmissionRequest) -> bool {
        if request.job_type == JobType::Streaming {
            return true;
        }
        parse_job_config(&request.job_config).any(|(key, _)| {
            self.dedicated_prefixes
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
        })
    }
}

/// Parses `key = value` lines, skipping blank lines and `#` comments.
pub fn parse_job_config(config: &str) -> impl Iterator<Item = (&str, &str)> {
    config.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once('=')?;
        let key = key.trim();
        (!key.is_empty()).then(|| (key, value.trim()))
    })
}

pub struct DriverAllocator {
    cluster_manager: Arc<ClusterManager>,
    instances: Arc<dyn InstanceStore>,
    drivers: Arc<dyn DriverStore>,
    policy: Arc<dyn DriverPolicy>,
    max_retry_count: u32,
}

impl DriverAllocator {
    pub fn new(
        cluster_manager: Arc<ClusterManager>,
        instances: Arc<dyn InstanceStore>,
        drivers: Arc<dyn DriverStore>,
        policy: Arc<dyn DriverPolicy>,
        max_retry_count: u32,
    ) -> Self {
        Self {
            cluster_manager,
            instances,
            drivers,
            policy,
            max_retry_count,
        }
    }

    pub async fn allocate(
        &self,
        request: &JobSubmissionRequest,
    ) -> ExecutionResult<AllocationOutcome> {
        let cluster = request.cluster_code.as_str();
        let dedicated = self.policy.requires_dedicated_driver(request);
        if !dedicated {
            if let Some(driver) = self.drivers.claim_idle_shared(cluster).await? {
                let (Some(application_id), Some(address)) =
                    (driver.application_id.clone(), driver.address.clone())
                else {
                    self.drivers.release_to_idle(driver.id).await?;
                    return Err(ExecutionError::internal(format!(
                        "shared driver {} has no application",
                        driver.id
                    )));
                };
                info!(
                    "instance {} reuses driver {} of application {application_id}",
                    request.instance_code, driver.id
                );
                return Ok(AllocationOutcome::SharedDriver {
                    driver_id: driver.id,
                    application_id,
                    address,
                    queue: request.queue.clone().or(driver.queue),
                });
            }
        }

        match self.cluster_manager.check_resource_limit(cluster) {
            Ok(()) => {}
            Err(ClusterError::ResourceLimit(message)) => {
                return self.reject(request, message).await;
            }
            Err(e) => return Err(e.into()),
        }
        let driver = self
            .drivers
            .create_pending(cluster, !dedicated, request.queue.clone())
            .await?;
        info!(
            "instance {} requires a new {} driver {}",
            request.instance_code,
            if dedicated { "dedicated" } else { "shareable" },
            driver.id
        );
        Ok(AllocationOutcome::NewDriverPending {
            driver_id: driver.id,
        })
    }

    /// Rejects the submission without creating a driver.
    /// Development instances are killed, other instances wait for the next attempt
    /// unless they have used up their retries.
    pub async fn reject(
        &self,
        request: &JobSubmissionRequest,
        message: String,
    ) -> ExecutionResult<AllocationOutcome> {
        let code = request.instance_code.as_str();
        let retry_count = self
            .instances
            .get(code)
            .await?
            .map(|x| x.retry_count)
            .unwrap_or_default();
        let status = match request.instance_kind {
            InstanceKind::Dev => InstanceStatus::Killed,
            InstanceKind::Normal if retry_count >= self.max_retry_count => InstanceStatus::Failed,
            InstanceKind::Normal => InstanceStatus::Waiting,
        };
        warn!("rejected instance {code} with status {status}: {message}");
        self.instances
            .set_status(code, status, Some(message.clone()))
            .await?;
        Ok(AllocationOutcome::AdmissionError { message })
    }
}
