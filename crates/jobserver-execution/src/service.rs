use std::sync::Arc;

use log::{info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::model::{
    InstanceInfo, InstanceStatus, JobInstance, JobSubmissionRequest, SubmitOutcome,
};
use crate::pipeline::SubmissionPipeline;

const STOPPED_BY_USER: &str = "stopped by user";

/// The operations exposed to the scheduling layer.
#[derive(Clone)]
pub struct JobService {
    pipeline: Arc<SubmissionPipeline>,
}

impl JobService {
    pub fn new(pipeline: Arc<SubmissionPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<SubmissionPipeline> {
        &self.pipeline
    }

    /// Registers the instance if needed and submits it.
    /// Returns the instance code once the instance is on its way to a driver.
    pub async fn submit_job_instance(
        &self,
        request: JobSubmissionRequest,
    ) -> ExecutionResult<String> {
        if request.instance_code.trim().is_empty() {
            return Err(ExecutionError::invalid("instance code must not be empty"));
        }
        let instance = self
            .pipeline
            .context()
            .instances
            .create_if_absent(JobInstance::new(&request))
            .await?;
        if instance.status != InstanceStatus::Waiting {
            return Err(ExecutionError::invalid(format!(
                "instance {} cannot be submitted in status {}",
                instance.code, instance.status
            )));
        }
        match self.pipeline.submit(&request).await {
            SubmitOutcome::Rejected { message } => Err(ExecutionError::SubmissionRejected {
                instance_code: request.instance_code,
                message,
            }),
            outcome => {
                info!("submitted instance {}: {outcome:?}", request.instance_code);
                Ok(request.instance_code)
            }
        }
    }

    pub async fn query_instance_status(&self, instance_code: &str) -> ExecutionResult<InstanceInfo> {
        self.pipeline
            .context()
            .instances
            .get(instance_code)
            .await?
            .map(|x| InstanceInfo::from(&x))
            .ok_or_else(|| ExecutionError::NotFound(format!("instance {instance_code}")))
    }

    /// Returns the information of the known instances among the given codes.
    pub async fn batch_query_instance_status(
        &self,
        instance_codes: &[String],
    ) -> ExecutionResult<Vec<InstanceInfo>> {
        let mut out = Vec::with_capacity(instance_codes.len());
        for code in instance_codes {
            if let Some(instance) = self.pipeline.context().instances.get(code).await? {
                out.push(InstanceInfo::from(&instance));
            }
        }
        Ok(out)
    }

    pub async fn stop_instance(&self, instance_code: &str) -> ExecutionResult<()> {
        let context = self.pipeline.context();
        let instance = context
            .instances
            .get(instance_code)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(format!("instance {instance_code}")))?;
        match instance.status {
            status if status.is_terminal() => {
                return Err(ExecutionError::invalid(format!(
                    "instance {instance_code} has already finished with status {status}"
                )));
            }
            InstanceStatus::Running => self.stop_running_instance(&instance).await?,
            _ => {}
        }
        context
            .instances
            .set_status(
                instance_code,
                InstanceStatus::Killed,
                Some(STOPPED_BY_USER.to_string()),
            )
            .await?;
        info!("stopped instance {instance_code}");
        Ok(())
    }

    /// Asks the driver to stop the job, and tears down the driver application
    /// if the driver cannot be reached.
    async fn stop_running_instance(&self, instance: &JobInstance) -> ExecutionResult<()> {
        let context = self.pipeline.context();
        let code = instance.code.as_str();
        let Some(driver_id) = instance.driver_id else {
            warn!("running instance {code} has no driver");
            return Ok(());
        };
        let Some(driver) = context.drivers.get(driver_id).await? else {
            warn!("driver {driver_id} of instance {code} no longer exists");
            return Ok(());
        };
        let application_id = driver
            .application_id
            .or_else(|| instance.application_id.clone())
            .unwrap_or_default();
        if let Some(address) = driver.address.as_deref() {
            match self
                .pipeline
                .driver_client()
                .stop_job(address, &application_id, code)
                .await
            {
                Ok(response) if response.success => return Ok(()),
                Ok(response) => warn!(
                    "driver {driver_id} refused to stop instance {code}: {}",
                    response.message.unwrap_or_default()
                ),
                Err(e) => warn!("failed to stop instance {code} on driver {driver_id}: {e}"),
            }
        }
        if !application_id.is_empty() {
            self.pipeline
                .kill_application(&instance.cluster_code, &application_id)
                .await;
        }
        context.drivers.delete(driver_id).await?;
        context.log_sink.remove_log_resource(code).await;
        context.instances.unlock(code).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::dispatch::{RUN_JOB_PATH, STOP_JOB_PATH};
    use crate::model::{DriverResponse, InstanceKind, JobType};
    use crate::scheduler::MemorySchedulerClient;
    use crate::store::{DriverStore, InstanceStore};
    use crate::testing::{request, TestEnvironment};

    async fn mock_driver() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RUN_JOB_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(DriverResponse::ok()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_submit_and_query() {
        let driver = mock_driver().await;
        let env = TestEnvironment::new().await;
        env.add_idle_shared_driver_at("c1", &driver.uri()).await;
        let scheduler = Arc::new(MemorySchedulerClient::new("unused"));
        let service = JobService::new(env.pipeline(scheduler));

        let code = service
            .submit_job_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await
            .unwrap();
        assert_eq!(code, "i1");
        let info = service.query_instance_status("i1").await.unwrap();
        assert_eq!(info.status, InstanceStatus::Running);
        assert!(info.application_id.is_some());

        let infos = service
            .batch_query_instance_status(&["i1".to_string(), "unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert!(matches!(
            service.query_instance_status("unknown").await,
            Err(ExecutionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_rejected() {
        let env = TestEnvironment::new().await;
        env.set_snapshot("c1", 10, 1);
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));
        let result = service
            .submit_job_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await;
        let Err(ExecutionError::SubmissionRejected {
            instance_code,
            message,
        }) = result
        else {
            panic!("expected a rejection, got {result:?}");
        };
        assert_eq!(instance_code, "i1");
        assert!(message.contains("minimum required"));
    }

    #[tokio::test]
    async fn test_submit_finished_instance_is_invalid() {
        let env = TestEnvironment::new().await;
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));
        let request = env
            .create_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await;
        env.instances
            .set_status("i1", InstanceStatus::Finished, None)
            .await
            .unwrap();
        assert!(matches!(
            service.submit_job_instance(request).await,
            Err(ExecutionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_waiting_instance() {
        let env = TestEnvironment::new().await;
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));
        env.create_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await;

        service.stop_instance("i1").await.unwrap();
        let info = service.query_instance_status("i1").await.unwrap();
        assert_eq!(info.status, InstanceStatus::Killed);
        assert_eq!(info.message.as_deref(), Some(STOPPED_BY_USER));
        assert!(info.finished_at.is_some());
        assert!(matches!(
            service.stop_instance("i1").await,
            Err(ExecutionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_running_instance_on_driver() {
        let driver = mock_driver().await;
        Mock::given(method("POST"))
            .and(path(STOP_JOB_PATH))
            .and(body_partial_json(serde_json::json!({"instanceCode": "i1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(DriverResponse::ok()))
            .expect(1)
            .mount(&driver)
            .await;
        let env = TestEnvironment::new().await;
        let shared = env.add_idle_shared_driver_at("c1", &driver.uri()).await;
        let scheduler = Arc::new(MemorySchedulerClient::new("unused"));
        let service = JobService::new(env.pipeline(scheduler.clone()));
        service
            .submit_job_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await
            .unwrap();

        service.stop_instance("i1").await.unwrap();
        let info = service.query_instance_status("i1").await.unwrap();
        assert_eq!(info.status, InstanceStatus::Killed);
        assert!(scheduler.killed_applications().unwrap().is_empty());
        assert!(env.drivers.get(shared.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stop_running_instance_with_unreachable_driver() {
        let driver = mock_driver().await;
        let env = TestEnvironment::new().await;
        let shared = env.add_idle_shared_driver_at("c1", &driver.uri()).await;
        let scheduler = Arc::new(MemorySchedulerClient::new("unused"));
        let service = JobService::new(env.pipeline(scheduler.clone()));
        service
            .submit_job_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await
            .unwrap();

        // The driver has no stop endpoint, so the application is torn down.
        service.stop_instance("i1").await.unwrap();
        assert_eq!(
            scheduler.killed_applications().unwrap(),
            vec![shared.application_id.clone().unwrap()]
        );
        assert!(env.drivers.get(shared.id).await.unwrap().is_none());
        assert!(!env.log_sink.is_active("i1"));
        assert!(env.instances.try_lock("i1").await.unwrap());
        let info = service.query_instance_status("i1").await.unwrap();
        assert_eq!(info.status, InstanceStatus::Killed);
    }
}
