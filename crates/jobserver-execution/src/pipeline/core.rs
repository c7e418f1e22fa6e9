use std::future::Future;
use std::sync::Arc;

use jobserver_cluster::error::ClusterResult;
use jobserver_telemetry::instance_log::LogResource;
use log::{error, info, warn};

use crate::dispatch::DispatchResult;
use crate::error::{error_trace, ExecutionError, ExecutionResult};
use crate::id::DriverId;
use crate::model::{
    AllocationOutcome, Driver, InstanceKind, InstanceStatus, JobPayload, JobSubmissionRequest,
    SubmitOutcome,
};
use crate::pipeline::SubmissionPipeline;
use crate::scheduler::{ApplicationSpec, SubmittedApplication};

fn flatten<T>(result: ClusterResult<ExecutionResult<T>>) -> ExecutionResult<T> {
    result.map_err(ExecutionError::from).and_then(|x| x)
}

struct SharedDriver {
    id: DriverId,
    application_id: String,
    address: String,
    queue: Option<String>,
}

impl SubmissionPipeline {
    /// Submits the instance. Failures are recorded on the instance and reported
    /// as a rejection instead of being returned to the caller.
    pub async fn submit(self: &Arc<Self>, request: &JobSubmissionRequest) -> SubmitOutcome {
        match self.try_submit(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("failed to submit instance {}: {e}", request.instance_code);
                self.fail_instance(request, &e).await;
                SubmitOutcome::Rejected {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Waits for all provisioning tasks started so far.
    pub async fn wait_for_provisioning(&self) -> ExecutionResult<()> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock()?);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("provisioning task failed: {e}");
            }
        }
        Ok(())
    }

    async fn try_submit(self: &Arc<Self>, request: &JobSubmissionRequest) -> ExecutionResult<SubmitOutcome> {
        match self.allocator.allocate(request).await? {
            AllocationOutcome::SharedDriver {
                driver_id,
                application_id,
                address,
                queue,
            } => {
                let driver = SharedDriver {
                    id: driver_id,
                    application_id,
                    address,
                    queue,
                };
                self.submit_to_shared_driver(request, driver).await
            }
            AllocationOutcome::NewDriverPending { driver_id } => {
                self.start_provisioning(request, driver_id).await
            }
            AllocationOutcome::AdmissionError { message } => Ok(SubmitOutcome::Rejected { message }),
        }
    }

    async fn fail_instance(&self, request: &JobSubmissionRequest, error: &ExecutionError) {
        let code = request.instance_code.as_str();
        self.append_log(request, &error_trace(error)).await;
        if let Err(e) = self
            .context
            .instances
            .set_status(code, InstanceStatus::Failed, Some(error.to_string()))
            .await
        {
            error!("failed to mark instance {code} as failed: {e}");
        }
    }

    async fn append_log(&self, request: &JobSubmissionRequest, message: &str) {
        if let Err(e) = self
            .context
            .log_sink
            .append(&request.instance_code, request.schedule_time, message)
            .await
        {
            warn!(
                "failed to write to the log of instance {}: {e}",
                request.instance_code
            );
        }
    }

    async fn submit_to_shared_driver(
        &self,
        request: &JobSubmissionRequest,
        driver: SharedDriver,
    ) -> ExecutionResult<SubmitOutcome> {
        let code = request.instance_code.as_str();
        match self.run_on_shared_driver(request, &driver).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(e) = self.context.drivers.release_to_idle(driver.id).await {
                    error!("failed to release driver {}: {e}", driver.id);
                }
                self.context.log_sink.remove_log_resource(code).await;
                if e.is_read_timeout() {
                    warn!(
                        "driver {} did not respond in time, killing application {}",
                        driver.id, driver.application_id
                    );
                    self.kill_application(&request.cluster_code, &driver.application_id)
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn run_on_shared_driver(
        &self,
        request: &JobSubmissionRequest,
        driver: &SharedDriver,
    ) -> ExecutionResult<SubmitOutcome> {
        // The instance status is left alone until the dispatch holds the instance lock.
        if let Some(target) = request.queue.as_deref() {
            let current = self
                .context
                .drivers
                .get(driver.id)
                .await?
                .and_then(|x| x.queue);
            if current.as_deref() != Some(target) {
                self.move_to_queue(&request.cluster_code, &driver.application_id, target)
                    .await?;
                self.context.drivers.set_queue(driver.id, target).await?;
            }
        }
        let payload = self.build_payload(
            request,
            driver.id,
            &driver.application_id,
            true,
            driver.queue.clone(),
        );
        let resource = self.log_resource(request, &driver.application_id, &driver.address, true);
        match self
            .dispatcher
            .dispatch(&driver.address, &payload, resource)
            .await?
        {
            DispatchResult::Dispatched => {
                self.mark_running(request, driver.id, &driver.application_id, &driver.address)
                    .await?;
                Ok(SubmitOutcome::DispatchedToShared {
                    address: driver.address.clone(),
                })
            }
            DispatchResult::AlreadyLocked => {
                self.context.drivers.release_to_idle(driver.id).await?;
                Ok(SubmitOutcome::AlreadyDispatched {
                    instance_code: request.instance_code.clone(),
                })
            }
        }
    }

    async fn move_to_queue(
        &self,
        cluster: &str,
        application_id: &str,
        queue: &str,
    ) -> ExecutionResult<()> {
        let result = self
            .context
            .cluster_manager
            .run_secured(cluster, |ctx| async move {
                self.context
                    .scheduler
                    .move_application_to_queue(&ctx, application_id, queue)
                    .await
            })
            .await;
        flatten(result).map_err(|e| ExecutionError::QueueSwitchFailure {
            application_id: application_id.to_string(),
            queue: queue.to_string(),
            message: e.to_string(),
        })?;
        info!("moved application {application_id} to queue {queue}");
        Ok(())
    }

    /// Kills the application on a best-effort basis.
    pub(crate) async fn kill_application(&self, cluster: &str, application_id: &str) {
        let result = self
            .context
            .cluster_manager
            .run_secured(cluster, |ctx| async move {
                self.context
                    .scheduler
                    .kill_application(&ctx, application_id)
                    .await
            })
            .await;
        match flatten(result) {
            Ok(()) => info!("killed application {application_id}"),
            Err(e) => error!("failed to kill application {application_id}: {e}"),
        }
    }

    async fn start_provisioning(
        self: &Arc<Self>,
        request: &JobSubmissionRequest,
        driver_id: DriverId,
    ) -> ExecutionResult<SubmitOutcome> {
        let Ok(permit) = Arc::clone(&self.provisioning).try_acquire_owned() else {
            self.context.drivers.delete(driver_id).await?;
            let message = ExecutionError::AdmissionRejected(format!(
                "too many drivers are being provisioned, limit: {}",
                self.options.max_concurrent_provisions
            ))
            .to_string();
            self.allocator.reject(request, message.clone()).await?;
            return Ok(SubmitOutcome::Rejected { message });
        };
        self.context
            .instances
            .set_status(&request.instance_code, InstanceStatus::Submitting, None)
            .await?;
        let pipeline = Arc::clone(self);
        let request = request.clone();
        self.spawn(async move {
            let _permit = permit;
            pipeline.provision_and_dispatch(request, driver_id).await;
        })?;
        Ok(SubmitOutcome::ProvisioningStarted { driver_id })
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> ExecutionResult<()> {
        let mut tasks = self.tasks.lock()?;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!("provisioning task failed: {e}");
            }
        }
        tasks.spawn(task);
        Ok(())
    }

    async fn provision_and_dispatch(&self, request: JobSubmissionRequest, driver_id: DriverId) {
        let request = &request;
        let code = request.instance_code.as_str();
        let result = self
            .context
            .cluster_manager
            .run_secured(&request.cluster_code, |ctx| async move {
                self.provision(&ctx, request, driver_id).await
            })
            .await;
        let error = match flatten(result) {
            Ok(()) => return,
            Err(e) => e,
        };
        error!("failed to provision driver {driver_id} for instance {code}: {error}");
        self.append_log(request, &error_trace(&error)).await;
        if let Err(e) = self.handle_submit_failure(request, driver_id, &error).await {
            error!("failed to handle the submit failure of instance {code}: {e}");
        }
    }

    async fn provision(
        &self,
        ctx: &jobserver_cluster::SecurityContext,
        request: &JobSubmissionRequest,
        driver_id: DriverId,
    ) -> ExecutionResult<()> {
        let driver = self
            .context
            .drivers
            .get(driver_id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(format!("driver {driver_id}")))?;
        let spec = ApplicationSpec {
            driver_id,
            cluster_code: request.cluster_code.clone(),
            job_name: request.job_name.clone(),
            job_type: request.job_type,
            queue: request.queue.clone(),
            shareable: driver.shareable,
        };
        let application = self
            .context
            .scheduler
            .submit_application(ctx, &spec)
            .await
            .map_err(|e| match e {
                e @ ExecutionError::ProvisioningFailure(_) => e,
                e => ExecutionError::ProvisioningFailure(e.to_string()),
            })?;
        info!(
            "submitted application {} for driver {driver_id} as {}",
            application.application_id,
            ctx.user()
        );
        let result = self
            .dispatch_to_new_driver(request, &driver, &application)
            .await;
        let discard = match &result {
            Ok(DispatchResult::Dispatched) => false,
            Ok(DispatchResult::AlreadyLocked) => !driver.shareable,
            Err(_) => true,
        };
        if discard {
            let application_id = application.application_id.as_str();
            match self.context.scheduler.kill_application(ctx, application_id).await {
                Ok(()) => info!("killed application {application_id}"),
                Err(e) => error!("failed to kill application {application_id}: {e}"),
            }
        }
        result.map(|_| ())
    }

    async fn dispatch_to_new_driver(
        &self,
        request: &JobSubmissionRequest,
        driver: &Driver,
        application: &SubmittedApplication,
    ) -> ExecutionResult<DispatchResult> {
        self.context
            .drivers
            .mark_provisioned(
                driver.id,
                &application.application_id,
                &application.driver_address,
                application.queue.clone(),
            )
            .await?;
        let payload = self.build_payload(
            request,
            driver.id,
            &application.application_id,
            driver.shareable,
            application.queue.clone(),
        );
        let resource = self.log_resource(
            request,
            &application.application_id,
            &application.driver_address,
            driver.shareable,
        );
        let result = self
            .dispatcher
            .dispatch(&application.driver_address, &payload, resource)
            .await?;
        match result {
            DispatchResult::Dispatched => {
                self.mark_running(
                    request,
                    driver.id,
                    &application.application_id,
                    &application.driver_address,
                )
                .await?
            }
            DispatchResult::AlreadyLocked if driver.shareable => {
                self.context.drivers.release_to_idle(driver.id).await?
            }
            DispatchResult::AlreadyLocked => {
                info!(
                    "instance {} is already dispatched, discarding dedicated driver {}",
                    request.instance_code, driver.id
                );
                self.context.drivers.delete(driver.id).await?
            }
        }
        Ok(result)
    }

    async fn mark_running(
        &self,
        request: &JobSubmissionRequest,
        driver_id: DriverId,
        application_id: &str,
        address: &str,
    ) -> ExecutionResult<()> {
        let code = request.instance_code.as_str();
        if self
            .context
            .instances
            .mark_running(code, driver_id, application_id)
            .await?
        {
            // The driver may have completed the job already and released itself.
            if !self.context.drivers.attach_instance(driver_id, code).await? {
                info!("driver {driver_id} has already been released by instance {code}");
            }
            return Ok(());
        }
        warn!("instance {code} was stopped during submission, stopping the job on driver {driver_id}");
        if let Err(e) = self
            .dispatcher
            .client()
            .stop_job(address, application_id, code)
            .await
        {
            warn!("failed to stop instance {code} on driver {driver_id}: {e}");
        }
        Ok(())
    }

    /// Deletes the driver that failed to start and schedules the instance for
    /// another attempt, unless it is a development run or out of retries.
    async fn handle_submit_failure(
        &self,
        request: &JobSubmissionRequest,
        driver_id: DriverId,
        error: &ExecutionError,
    ) -> ExecutionResult<()> {
        let code = request.instance_code.as_str();
        self.context.drivers.delete(driver_id).await?;
        let retry_count = self.context.instances.increment_retry(code).await?;
        let status = if request.instance_kind != InstanceKind::Dev
            && retry_count < self.options.max_retry_count
        {
            InstanceStatus::Waiting
        } else {
            InstanceStatus::Failed
        };
        self.context
            .instances
            .set_status(code, status, Some(error.to_string()))
            .await?;
        info!("instance {code} is {status} after {retry_count} failed attempts");
        Ok(())
    }

    fn build_payload(
        &self,
        request: &JobSubmissionRequest,
        driver_id: DriverId,
        application_id: &str,
        share_driver: bool,
        queue: Option<String>,
    ) -> JobPayload {
        JobPayload {
            application_id: application_id.to_string(),
            driver_id,
            share_driver,
            instance_code: request.instance_code.clone(),
            job_name: request.job_name.clone(),
            job_type: request.job_type,
            instance_kind: request.instance_kind,
            job_text: request.job_text.clone(),
            job_config: request.job_config.clone(),
            access_key: request.access_key.clone(),
            yarn_queue: request.queue.clone().or(queue),
            callback_url: self.options.callback_url.clone(),
            schedule_time: request.schedule_time,
        }
    }

    fn log_resource(
        &self,
        request: &JobSubmissionRequest,
        application_id: &str,
        address: &str,
        share_driver: bool,
    ) -> LogResource {
        LogResource {
            instance_code: request.instance_code.clone(),
            cluster_code: request.cluster_code.clone(),
            application_id: application_id.to_string(),
            driver_address: address.to_string(),
            share_driver,
            schedule_time: request.schedule_time,
        }
    }
}
