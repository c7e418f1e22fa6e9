mod allocator;
mod dispatch;
mod driver;
pub mod error;
mod id;
mod job_server;
mod model;
mod pipeline;
mod scheduler;
mod service;
mod store;
#[cfg(test)]
mod testing;

pub use allocator::{parse_job_config, DefaultDriverPolicy, DriverAllocator, DriverPolicy};
pub use dispatch::{
    DispatchResult, Dispatcher, DriverClient, RUN_JOB_PATH, STATUS_PATH, STOP_JOB_PATH,
};
pub use driver::{
    classify_failure, driver_routes, run_driver, serve_driver, strip_exception_prefix,
    ArtifactResolver, DriverEvent, DriverOptions, DriverTaskEngine, JobError, JobExecutor,
    JobLog, SearchPathResolver, ShellJobExecutor,
};
pub use id::DriverId;
pub use job_server::{JobServer, JobServerBackends};
pub use model::{
    AllocationOutcome, Driver, DriverResponse, DriverStatus, DriverStatusResponse, InstanceInfo,
    InstanceKind, InstanceStatus, JobInstance, JobPayload, JobSubmissionRequest, JobType,
    StopJobRequest, SubmitOutcome,
};
pub use pipeline::{JobServerContext, SubmissionPipeline, SubmissionPipelineOptions};
pub use scheduler::{
    ApplicationSpec, MemorySchedulerClient, SchedulerCall, SchedulerClient, SubmittedApplication,
};
pub use service::JobService;
pub use store::{DriverStore, InstanceStore, MemoryDriverStore, MemoryInstanceStore};
