use tokio::sync::oneshot;

use crate::model::{DriverResponse, DriverStatusResponse, JobPayload};

pub enum DriverEvent {
    RunJob {
        payload: JobPayload,
        result: oneshot::Sender<DriverResponse>,
    },
    StopJob {
        instance_code: String,
        result: oneshot::Sender<DriverResponse>,
    },
    Status {
        result: oneshot::Sender<DriverStatusResponse>,
    },
    /// The job has finished and its bookkeeping is done.
    JobCompleted {
        instance_code: String,
    },
    Shutdown,
}
