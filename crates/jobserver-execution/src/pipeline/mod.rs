mod core;
mod options;

use std::sync::{Arc, Mutex};

use jobserver_cluster::ClusterManager;
use jobserver_telemetry::instance_log::InstanceLogSink;
pub use options::SubmissionPipelineOptions;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::allocator::{DefaultDriverPolicy, DriverAllocator, DriverPolicy};
use crate::dispatch::{Dispatcher, DriverClient};
use crate::error::ExecutionResult;
use crate::scheduler::SchedulerClient;
use crate::store::{DriverStore, InstanceStore};

/// The collaborators shared by the job server components.
#[derive(Clone)]
pub struct JobServerContext {
    pub cluster_manager: Arc<ClusterManager>,
    pub instances: Arc<dyn InstanceStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub scheduler: Arc<dyn SchedulerClient>,
    pub log_sink: Arc<dyn InstanceLogSink>,
}

/// Routes submissions to shared drivers or provisions new drivers for them.
pub struct SubmissionPipeline {
    options: SubmissionPipelineOptions,
    context: JobServerContext,
    allocator: DriverAllocator,
    dispatcher: Dispatcher,
    /// Bounds the number of drivers being provisioned at the same time.
    provisioning: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl SubmissionPipeline {
    pub fn try_new(
        options: SubmissionPipelineOptions,
        context: JobServerContext,
    ) -> ExecutionResult<Self> {
        let policy = Arc::new(DefaultDriverPolicy::new(
            options.dedicated_driver_prefixes.clone(),
        ));
        Self::try_new_with_policy(options, context, policy)
    }

    pub fn try_new_with_policy(
        options: SubmissionPipelineOptions,
        context: JobServerContext,
        policy: Arc<dyn DriverPolicy>,
    ) -> ExecutionResult<Self> {
        let allocator = DriverAllocator::new(
            Arc::clone(&context.cluster_manager),
            Arc::clone(&context.instances),
            Arc::clone(&context.drivers),
            policy,
            options.max_retry_count,
        );
        let client = DriverClient::new(
            options.driver_connect_timeout,
            options.driver_request_timeout,
        )?;
        let dispatcher = Dispatcher::new(
            client,
            Arc::clone(&context.instances),
            Arc::clone(&context.log_sink),
            options.dispatch_retry_strategy.clone(),
        );
        let provisioning = Arc::new(Semaphore::new(options.max_concurrent_provisions));
        Ok(Self {
            options,
            context,
            allocator,
            dispatcher,
            provisioning,
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    pub fn context(&self) -> &JobServerContext {
        &self.context
    }

    pub fn driver_client(&self) -> &DriverClient {
        self.dispatcher.client()
    }
}
