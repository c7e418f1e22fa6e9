use std::sync::Arc;

use jobserver_server::actor::{Actor, ActorAction, ActorContext};
use log::{info, warn};

use crate::driver::event::DriverEvent;
use crate::driver::options::DriverOptions;
use crate::driver::state::DriverTaskState;
use crate::error::{ExecutionError, ExecutionResult};

/// Runs one job at a time on the driver.
pub struct DriverTaskEngine {
    options: Arc<DriverOptions>,
    pub(super) state: DriverTaskState,
}

impl Actor for DriverTaskEngine {
    type Message = DriverEvent;
    type Options = DriverOptions;
    type Error = ExecutionError;

    fn new(options: DriverOptions) -> Self {
        Self {
            options: Arc::new(options),
            state: DriverTaskState::Idle,
        }
    }

    fn start(&mut self, _: &mut ActorContext<Self>) -> ExecutionResult<()> {
        info!("driver {} is ready to run jobs", self.options.driver_id);
        Ok(())
    }

    fn receive(
        &mut self,
        ctx: &mut ActorContext<Self>,
        message: DriverEvent,
    ) -> ExecutionResult<ActorAction> {
        let action = match message {
            DriverEvent::RunJob { payload, result } => self.handle_run_job(ctx, payload, result),
            DriverEvent::StopJob {
                instance_code,
                result,
            } => self.handle_stop_job(ctx, instance_code, result),
            DriverEvent::Status { result } => self.handle_status(ctx, result),
            DriverEvent::JobCompleted { instance_code } => {
                self.handle_job_completed(ctx, instance_code)
            }
            DriverEvent::Shutdown => ActorAction::Stop,
        };
        Ok(action)
    }

    fn stop(self) -> ExecutionResult<()> {
        if let DriverTaskState::Running {
            instance_code,
            stop,
            ..
        } = &self.state
        {
            warn!("driver is stopping while instance {instance_code} is running");
            let _ = stop.send(true);
        }
        info!("driver {} has stopped", self.options.driver_id);
        Ok(())
    }
}

impl DriverTaskEngine {
    pub(super) fn options(&self) -> &Arc<DriverOptions> {
        &self.options
    }
}
