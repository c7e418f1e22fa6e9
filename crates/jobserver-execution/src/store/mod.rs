mod memory;

pub use memory::{MemoryDriverStore, MemoryInstanceStore};

use crate::error::ExecutionResult;
use crate::id::DriverId;
use crate::model::{Driver, InstanceStatus, JobInstance};

/// Persistence of job instances.
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    /// Inserts the instance unless an instance with the same code exists,
    /// and returns the stored instance.
    async fn create_if_absent(&self, instance: JobInstance) -> ExecutionResult<JobInstance>;

    async fn get(&self, code: &str) -> ExecutionResult<Option<JobInstance>>;

    /// Sets the status of the instance. Terminal statuses also record the finish time.
    async fn set_status(
        &self,
        code: &str,
        status: InstanceStatus,
        message: Option<String>,
    ) -> ExecutionResult<()>;

    /// Marks the instance as running on the driver.
    /// Returns `false` without changes if the instance has reached a terminal status.
    async fn mark_running(
        &self,
        code: &str,
        driver_id: DriverId,
        application_id: &str,
    ) -> ExecutionResult<bool>;

    /// Increments the retry count and returns the new value.
    async fn increment_retry(&self, code: &str) -> ExecutionResult<u32>;

    /// Atomically acquires the dispatch lock of the instance.
    /// Returns `false` if the lock is already held.
    async fn try_lock(&self, code: &str) -> ExecutionResult<bool>;

    async fn unlock(&self, code: &str) -> ExecutionResult<()>;
}

/// Persistence of drivers.
#[async_trait::async_trait]
pub trait DriverStore: Send + Sync + 'static {
    /// Creates a driver record in the pending status before the driver is provisioned.
    async fn create_pending(
        &self,
        cluster_code: &str,
        shareable: bool,
        queue: Option<String>,
    ) -> ExecutionResult<Driver>;

    /// Registers a driver that is already running and idle.
    async fn register(&self, driver: Driver) -> ExecutionResult<()>;

    async fn get(&self, id: DriverId) -> ExecutionResult<Option<Driver>>;

    async fn list(&self, cluster_code: &str) -> ExecutionResult<Vec<Driver>>;

    /// Atomically finds an idle shareable driver of the cluster and marks it as running.
    async fn claim_idle_shared(&self, cluster_code: &str) -> ExecutionResult<Option<Driver>>;

    /// Records the scheduler application of a provisioned driver.
    /// The driver stays reserved for the submission that provisioned it.
    async fn mark_provisioned(
        &self,
        id: DriverId,
        application_id: &str,
        address: &str,
        queue: Option<String>,
    ) -> ExecutionResult<()>;

    async fn mark_running(&self, id: DriverId, instance_code: &str) -> ExecutionResult<()>;

    /// Records the instance dispatched to a reserved driver and marks the driver as running.
    /// Returns `false` without changes if the driver has been released or deleted meanwhile.
    async fn attach_instance(&self, id: DriverId, instance_code: &str) -> ExecutionResult<bool>;

    async fn set_queue(&self, id: DriverId, queue: &str) -> ExecutionResult<()>;

    /// Makes the driver available again. Releasing a deleted driver is a no-op.
    async fn release_to_idle(&self, id: DriverId) -> ExecutionResult<()>;

    async fn delete(&self, id: DriverId) -> ExecutionResult<()>;
}
