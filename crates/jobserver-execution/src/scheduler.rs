use std::sync::Mutex;

use jobserver_cluster::SecurityContext;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::DriverId;
use crate::model::JobType;

/// The application to submit to the cluster scheduler for a new driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSpec {
    pub driver_id: DriverId,
    pub cluster_code: String,
    pub job_name: String,
    pub job_type: JobType,
    pub queue: Option<String>,
    pub shareable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedApplication {
    pub application_id: String,
    pub driver_address: String,
    pub queue: Option<String>,
}

/// The cluster scheduler, acting as the identity of the security context.
#[async_trait::async_trait]
pub trait SchedulerClient: Send + Sync + 'static {
    async fn submit_application(
        &self,
        context: &SecurityContext,
        spec: &ApplicationSpec,
    ) -> ExecutionResult<SubmittedApplication>;

    async fn move_application_to_queue(
        &self,
        context: &SecurityContext,
        application_id: &str,
        queue: &str,
    ) -> ExecutionResult<()>;

    async fn kill_application(
        &self,
        context: &SecurityContext,
        application_id: &str,
    ) -> ExecutionResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    Submit {
        driver_id: DriverId,
        user: String,
    },
    Move {
        application_id: String,
        queue: String,
    },
    Kill {
        application_id: String,
    },
}

#[derive(Default)]
struct MemorySchedulerState {
    calls: Vec<SchedulerCall>,
    next_application: u64,
}

/// A scheduler that hands out applications bound to a fixed driver address
/// and records every call.
pub struct MemorySchedulerClient {
    driver_address: String,
    fail_submit: bool,
    fail_move: bool,
    state: Mutex<MemorySchedulerState>,
}

impl MemorySchedulerClient {
    pub fn new(driver_address: impl Into<String>) -> Self {
        Self {
            driver_address: driver_address.into(),
            fail_submit: false,
            fail_move: false,
            state: Mutex::new(MemorySchedulerState::default()),
        }
    }

    pub fn with_failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn with_failing_move(mut self) -> Self {
        self.fail_move = true;
        self
    }

    pub fn calls(&self) -> ExecutionResult<Vec<SchedulerCall>> {
        Ok(self.state.lock()?.calls.clone())
    }

    pub fn killed_applications(&self) -> ExecutionResult<Vec<String>> {
        Ok(self
            .calls()?
            .into_iter()
            .filter_map(|x| match x {
                SchedulerCall::Kill { application_id } => Some(application_id),
                _ => None,
            })
            .collect())
    }

    fn record(&self, call: SchedulerCall) -> ExecutionResult<()> {
        self.state.lock()?.calls.push(call);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SchedulerClient for MemorySchedulerClient {
    async fn submit_application(
        &self,
        context: &SecurityContext,
        spec: &ApplicationSpec,
    ) -> ExecutionResult<SubmittedApplication> {
        self.record(SchedulerCall::Submit {
            driver_id: spec.driver_id,
            user: context.user().to_string(),
        })?;
        if self.fail_submit {
            return Err(ExecutionError::ProvisioningFailure(format!(
                "queue {} rejected the application",
                spec.queue.as_deref().unwrap_or("default")
            )));
        }
        let mut state = self.state.lock()?;
        state.next_application += 1;
        Ok(SubmittedApplication {
            application_id: format!("application_0000000000000_{:04}", state.next_application),
            driver_address: self.driver_address.clone(),
            queue: spec.queue.clone(),
        })
    }

    async fn move_application_to_queue(
        &self,
        _context: &SecurityContext,
        application_id: &str,
        queue: &str,
    ) -> ExecutionResult<()> {
        self.record(SchedulerCall::Move {
            application_id: application_id.to_string(),
            queue: queue.to_string(),
        })?;
        if self.fail_move {
            return Err(ExecutionError::internal(format!("queue {queue} does not exist")));
        }
        Ok(())
    }

    async fn kill_application(
        &self,
        _context: &SecurityContext,
        application_id: &str,
    ) -> ExecutionResult<()> {
        self.record(SchedulerCall::Kill {
            application_id: application_id.to_string(),
        })
    }
}
