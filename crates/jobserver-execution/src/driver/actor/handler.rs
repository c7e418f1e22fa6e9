use std::sync::Arc;

use chrono::Utc;
use jobserver_server::actor::{ActorAction, ActorContext};
use log::{error, info, warn};
use tokio::sync::{oneshot, watch};

use crate::allocator::parse_job_config;
use crate::driver::actor::DriverTaskEngine;
use crate::driver::event::DriverEvent;
use crate::driver::executor::{JobError, JobLog};
use crate::driver::failure::classify_failure;
use crate::driver::options::DriverOptions;
use crate::driver::state::DriverTaskState;
use crate::error::error_trace;
use crate::model::{
    DriverResponse, DriverStatus, DriverStatusResponse, InstanceStatus, JobInstance, JobPayload,
};

impl DriverTaskEngine {
    pub(super) fn handle_run_job(
        &mut self,
        ctx: &mut ActorContext<Self>,
        payload: JobPayload,
        result: oneshot::Sender<DriverResponse>,
    ) -> ActorAction {
        let driver_id = self.options().driver_id;
        let response = if payload.driver_id != driver_id {
            DriverResponse::failure(format!(
                "the job is for driver {} but this is driver {driver_id}",
                payload.driver_id
            ))
        } else if let Some(code) = self.state.instance_code() {
            warn!(
                "rejected instance {} since instance {code} is running",
                payload.instance_code
            );
            DriverResponse::failure(format!("driver {driver_id} is busy"))
        } else {
            let (stop_tx, stop_rx) = watch::channel(false);
            self.state = DriverTaskState::Running {
                instance_code: payload.instance_code.clone(),
                started_at: Utc::now(),
                stop: stop_tx,
            };
            info!("accepted instance {}", payload.instance_code);
            let options = Arc::clone(self.options());
            let handle = ctx.handle().clone();
            ctx.spawn(async move {
                let instance_code = payload.instance_code.clone();
                run_job(options, payload, stop_rx).await;
                if let Err(e) = handle.send(DriverEvent::JobCompleted { instance_code }).await {
                    error!("failed to report job completion: {e}");
                }
            });
            DriverResponse::ok()
        };
        let _ = result.send(response);
        ActorAction::Continue
    }

    pub(super) fn handle_stop_job(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        instance_code: String,
        result: oneshot::Sender<DriverResponse>,
    ) -> ActorAction {
        let response = match &self.state {
            DriverTaskState::Running {
                instance_code: running,
                stop,
                ..
            } if *running == instance_code => {
                info!("stop requested for instance {instance_code}");
                let _ = stop.send(true);
                DriverResponse::ok()
            }
            _ => DriverResponse::failure(format!(
                "instance {instance_code} is not running on driver {}",
                self.options().driver_id
            )),
        };
        let _ = result.send(response);
        ActorAction::Continue
    }

    pub(super) fn handle_status(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<DriverStatusResponse>,
    ) -> ActorAction {
        let status = match self.state {
            DriverTaskState::Idle => DriverStatus::Idle,
            DriverTaskState::Running { .. } => DriverStatus::Running,
        };
        let _ = result.send(DriverStatusResponse {
            driver_id: self.options().driver_id,
            status,
            instance_code: self.state.instance_code().map(|x| x.to_string()),
        });
        ActorAction::Continue
    }

    pub(super) fn handle_job_completed(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        instance_code: String,
    ) -> ActorAction {
        match &self.state {
            DriverTaskState::Running {
                instance_code: running,
                started_at,
                ..
            } if *running == instance_code => {
                info!(
                    "instance {instance_code} completed in {}s",
                    (Utc::now() - *started_at).num_seconds()
                );
                self.state = DriverTaskState::Idle;
            }
            _ => warn!("ignored completion of unknown instance {instance_code}"),
        }
        ActorAction::Continue
    }
}

/// Executes the job and records its outcome.
/// The job runs in its own task so that a panic is reported as a failure of the job.
async fn run_job(options: Arc<DriverOptions>, payload: JobPayload, stop: watch::Receiver<bool>) {
    let log = JobLog::new(
        Arc::clone(&options.log_sink),
        payload.instance_code.clone(),
        payload.schedule_time,
    );
    let stop_requested = stop.clone();
    let task = {
        let options = Arc::clone(&options);
        let payload = payload.clone();
        let log = log.clone();
        tokio::spawn(async move { execute_job(&options, &payload, stop, &log).await })
    };
    let outcome = task.await;
    let stop_requested = *stop_requested.borrow();
    let (status, message) = match outcome {
        Ok(Ok(())) => (InstanceStatus::Finished, None),
        Ok(Err(e)) => {
            log.write(&format!("job failed: {}", error_trace(&e))).await;
            classify_failure(&e, stop_requested, options.artifact_resolver.as_ref())
        }
        Err(e) => {
            log.write(&format!("job aborted: {e}")).await;
            (InstanceStatus::Failed, Some(e.to_string()))
        }
    };
    complete_job(&options, &payload, status, message).await;
}

async fn execute_job(
    options: &DriverOptions,
    payload: &JobPayload,
    stop: watch::Receiver<bool>,
    log: &JobLog,
) -> Result<(), JobError> {
    let code = payload.instance_code.as_str();
    let driver = options
        .drivers
        .get(options.driver_id)
        .await?
        .ok_or_else(|| {
            JobError::Application(format!("driver {} is not registered", options.driver_id))
        })?;
    let mut instance = JobInstance::from_payload(payload, &driver.cluster_code);
    instance.status = InstanceStatus::Submitting;
    options.instances.create_if_absent(instance).await?;
    options.drivers.mark_running(driver.id, code).await?;
    if !options
        .instances
        .mark_running(code, driver.id, &payload.application_id)
        .await?
    {
        return Err(JobError::Application(format!(
            "instance {code} has already finished"
        )));
    }

    log.write(&format!(
        "running instance {code} of job {} on driver {}",
        payload.job_name, driver.id
    ))
    .await;
    for (key, value) in parse_job_config(&payload.job_config) {
        log.write(&format!("job parameter: {key} = {value}")).await;
    }
    options.executor.execute(payload, stop, log).await
}

/// Records the final status and makes the driver available again.
async fn complete_job(
    options: &DriverOptions,
    payload: &JobPayload,
    status: InstanceStatus,
    message: Option<String>,
) {
    let code = payload.instance_code.as_str();
    match options.instances.get(code).await {
        Ok(Some(instance)) if instance.status.is_terminal() => {
            info!(
                "instance {code} is already {}, not overriding with {status}",
                instance.status
            );
        }
        Ok(_) => {
            if let Err(e) = options.instances.set_status(code, status, message).await {
                error!("failed to set the status of instance {code}: {e}");
            } else {
                info!("instance {code} is {status}");
            }
        }
        Err(e) => error!("failed to get instance {code}: {e}"),
    }
    if let Err(e) = options.instances.unlock(code).await {
        error!("failed to unlock instance {code}: {e}");
    }
    if let Err(e) = options.drivers.release_to_idle(options.driver_id).await {
        error!("failed to release driver {}: {e}", options.driver_id);
    }
    options.log_sink.remove_log_resource(code).await;
}
