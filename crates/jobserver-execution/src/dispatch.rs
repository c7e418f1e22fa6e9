use std::sync::Arc;
use std::time::Duration;

use jobserver_server::RetryStrategy;
use jobserver_telemetry::instance_log::{InstanceLogSink, LogResource};
use log::{info, warn};
use serde::de::DeserializeOwned;

use crate::error::{ExecutionError, ExecutionResult};
use crate::model::{DriverResponse, DriverStatusResponse, JobPayload, StopJobRequest};
use crate::store::InstanceStore;

pub const RUN_JOB_PATH: &str = "/driver/runJob";
pub const STOP_JOB_PATH: &str = "/driver/stopJob";
pub const STATUS_PATH: &str = "/driver/status";

/// HTTP client of the driver endpoints.
#[derive(Clone)]
pub struct DriverClient {
    client: reqwest::Client,
}

impl DriverClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> ExecutionResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn url(address: &str, path: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}{path}", address.trim_end_matches('/'))
        } else {
            format!("http://{address}{path}")
        }
    }

    fn dispatch_error(application_id: &str, error: reqwest::Error) -> ExecutionError {
        ExecutionError::DispatchFailure {
            application_id: application_id.to_string(),
            // A timeout after the connection has been established means the driver hangs.
            timed_out: error.is_timeout() && !error.is_connect(),
            message: error.to_string(),
        }
    }

    async fn post<T, R>(
        &self,
        address: &str,
        path: &str,
        application_id: &str,
        body: &T,
    ) -> ExecutionResult<R>
    where
        T: serde::Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client
            .post(Self::url(address, path))
            .json(body)
            .send()
            .await
            .and_then(|x| x.error_for_status())
            .map_err(|e| Self::dispatch_error(application_id, e))?
            .json()
            .await
            .map_err(|e| Self::dispatch_error(application_id, e))
    }

    pub async fn run_job(
        &self,
        address: &str,
        payload: &JobPayload,
    ) -> ExecutionResult<DriverResponse> {
        self.post(address, RUN_JOB_PATH, &payload.application_id, payload)
            .await
    }

    pub async fn stop_job(
        &self,
        address: &str,
        application_id: &str,
        instance_code: &str,
    ) -> ExecutionResult<DriverResponse> {
        let request = StopJobRequest {
            instance_code: instance_code.to_string(),
        };
        self.post(address, STOP_JOB_PATH, application_id, &request)
            .await
    }

    pub async fn status(&self, address: &str) -> ExecutionResult<DriverStatusResponse> {
        Ok(self
            .client
            .get(Self::url(address, STATUS_PATH))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    Dispatched,
    /// Another dispatch of the same instance holds the lock, so nothing was sent.
    AlreadyLocked,
}

/// Sends jobs to drivers, at most once per instance at a time.
pub struct Dispatcher {
    client: DriverClient,
    instances: Arc<dyn InstanceStore>,
    log_sink: Arc<dyn InstanceLogSink>,
    retry_strategy: RetryStrategy,
}

impl Dispatcher {
    pub fn new(
        client: DriverClient,
        instances: Arc<dyn InstanceStore>,
        log_sink: Arc<dyn InstanceLogSink>,
        retry_strategy: RetryStrategy,
    ) -> Self {
        Self {
            client,
            instances,
            log_sink,
            retry_strategy,
        }
    }

    pub fn client(&self) -> &DriverClient {
        &self.client
    }

    /// Posts the job to the driver while holding the instance lock.
    /// The lock and the log resource are kept on success and released on failure.
    pub async fn dispatch(
        &self,
        address: &str,
        payload: &JobPayload,
        resource: LogResource,
    ) -> ExecutionResult<DispatchResult> {
        let code = payload.instance_code.as_str();
        if !self.instances.try_lock(code).await? {
            info!("instance {code} is already being dispatched, skipping");
            return Ok(DispatchResult::AlreadyLocked);
        }
        let error = match self.send(address, payload, resource).await {
            Ok(()) => {
                info!(
                    "dispatched instance {code} to driver {} at {address}",
                    payload.driver_id
                );
                return Ok(DispatchResult::Dispatched);
            }
            Err(e) => e,
        };
        warn!("failed to dispatch instance {code} to {address}: {error}");
        self.log_sink.remove_log_resource(code).await;
        self.instances.unlock(code).await?;
        Err(error)
    }

    async fn send(
        &self,
        address: &str,
        payload: &JobPayload,
        resource: LogResource,
    ) -> ExecutionResult<()> {
        self.log_sink.create_log_resource(resource).await?;
        let response = self
            .retry_strategy
            .run(|| self.client.run_job(address, payload))
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(ExecutionError::DispatchFailure {
                application_id: payload.application_id.clone(),
                message: response
                    .message
                    .unwrap_or_else(|| "the driver rejected the job".to_string()),
                timed_out: false,
            })
        }
    }
}
