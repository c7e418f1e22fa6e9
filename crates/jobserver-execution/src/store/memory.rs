use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{DriverId, IdGenerator};
use crate::model::{Driver, DriverStatus, InstanceStatus, JobInstance};
use crate::store::{DriverStore, InstanceStore};

#[derive(Default)]
struct InstanceTable {
    instances: HashMap<String, JobInstance>,
    locks: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryInstanceStore {
    state: Mutex<InstanceTable>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut JobInstance) -> T,
    ) -> ExecutionResult<T> {
        let mut state = self.state.lock()?;
        let instance = state
            .instances
            .get_mut(code)
            .ok_or_else(|| ExecutionError::NotFound(format!("instance {code}")))?;
        Ok(f(instance))
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn create_if_absent(&self, instance: JobInstance) -> ExecutionResult<JobInstance> {
        let mut state = self.state.lock()?;
        Ok(state
            .instances
            .entry(instance.code.clone())
            .or_insert(instance)
            .clone())
    }

    async fn get(&self, code: &str) -> ExecutionResult<Option<JobInstance>> {
        Ok(self.state.lock()?.instances.get(code).cloned())
    }

    async fn set_status(
        &self,
        code: &str,
        status: InstanceStatus,
        message: Option<String>,
    ) -> ExecutionResult<()> {
        self.update(code, |instance| {
            instance.status = status;
            if message.is_some() {
                instance.message = message;
            }
            if status.is_terminal() {
                instance.finished_at = Some(Utc::now());
            }
        })
    }

    async fn mark_running(
        &self,
        code: &str,
        driver_id: DriverId,
        application_id: &str,
    ) -> ExecutionResult<bool> {
        self.update(code, |instance| {
            if instance.status.is_terminal() {
                return false;
            }
            instance.status = InstanceStatus::Running;
            instance.driver_id = Some(driver_id);
            instance.application_id = Some(application_id.to_string());
            instance.started_at = Some(Utc::now());
            true
        })
    }

    async fn increment_retry(&self, code: &str) -> ExecutionResult<u32> {
        self.update(code, |instance| {
            instance.retry_count += 1;
            instance.retry_count
        })
    }

    async fn try_lock(&self, code: &str) -> ExecutionResult<bool> {
        let mut state = self.state.lock()?;
        if !state.instances.contains_key(code) {
            return Err(ExecutionError::NotFound(format!("instance {code}")));
        }
        Ok(state.locks.insert(code.to_string()))
    }

    async fn unlock(&self, code: &str) -> ExecutionResult<()> {
        self.state.lock()?.locks.remove(code);
        Ok(())
    }
}

struct DriverTable {
    drivers: HashMap<DriverId, Driver>,
    id_generator: IdGenerator<DriverId>,
}

pub struct MemoryDriverStore {
    state: Mutex<DriverTable>,
}

impl Default for MemoryDriverStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriverStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverTable {
                drivers: HashMap::new(),
                id_generator: IdGenerator::new(),
            }),
        }
    }

    fn update(&self, id: DriverId, f: impl FnOnce(&mut Driver)) -> ExecutionResult<()> {
        let mut state = self.state.lock()?;
        let driver = state
            .drivers
            .get_mut(&id)
            .ok_or_else(|| ExecutionError::NotFound(format!("driver {id}")))?;
        f(driver);
        driver.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait::async_trait]
impl DriverStore for MemoryDriverStore {
    async fn create_pending(
        &self,
        cluster_code: &str,
        shareable: bool,
        queue: Option<String>,
    ) -> ExecutionResult<Driver> {
        let mut state = self.state.lock()?;
        let id = state.id_generator.next()?;
        let driver = Driver {
            id,
            cluster_code: cluster_code.to_string(),
            application_id: None,
            queue,
            status: DriverStatus::Pending,
            shareable,
            address: None,
            instance_code: None,
            updated_at: Utc::now(),
        };
        state.drivers.insert(id, driver.clone());
        Ok(driver)
    }

    async fn register(&self, driver: Driver) -> ExecutionResult<()> {
        let mut state = self.state.lock()?;
        if state.drivers.contains_key(&driver.id) {
            return Err(ExecutionError::invalid(format!(
                "driver {} already exists",
                driver.id
            )));
        }
        // Generated IDs must not collide with registered ones.
        if state.drivers.keys().all(|id| *id < driver.id) {
            state.id_generator = IdGenerator::starting_after(driver.id)?;
        }
        state.drivers.insert(driver.id, driver);
        Ok(())
    }

    async fn get(&self, id: DriverId) -> ExecutionResult<Option<Driver>> {
        Ok(self.state.lock()?.drivers.get(&id).cloned())
    }

    async fn list(&self, cluster_code: &str) -> ExecutionResult<Vec<Driver>> {
        let state = self.state.lock()?;
        let mut out = state
            .drivers
            .values()
            .filter(|d| d.cluster_code == cluster_code)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    async fn claim_idle_shared(&self, cluster_code: &str) -> ExecutionResult<Option<Driver>> {
        let mut state = self.state.lock()?;
        let candidate = state
            .drivers
            .values_mut()
            .filter(|d| {
                d.cluster_code == cluster_code
                    && d.shareable
                    && d.status == DriverStatus::Idle
                    && d.address.is_some()
                    && d.application_id.is_some()
            })
            .min_by_key(|d| d.id);
        Ok(candidate.map(|driver| {
            driver.status = DriverStatus::Running;
            driver.updated_at = Utc::now();
            driver.clone()
        }))
    }

    async fn mark_provisioned(
        &self,
        id: DriverId,
        application_id: &str,
        address: &str,
        queue: Option<String>,
    ) -> ExecutionResult<()> {
        self.update(id, |driver| {
            driver.application_id = Some(application_id.to_string());
            driver.address = Some(address.to_string());
            if queue.is_some() {
                driver.queue = queue;
            }
        })
    }

    async fn mark_running(&self, id: DriverId, instance_code: &str) -> ExecutionResult<()> {
        self.update(id, |driver| {
            driver.status = DriverStatus::Running;
            driver.instance_code = Some(instance_code.to_string());
        })
    }

    async fn attach_instance(&self, id: DriverId, instance_code: &str) -> ExecutionResult<bool> {
        let mut state = self.state.lock()?;
        let Some(driver) = state.drivers.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(driver.status, DriverStatus::Pending | DriverStatus::Running) {
            return Ok(false);
        }
        driver.status = DriverStatus::Running;
        driver.instance_code = Some(instance_code.to_string());
        driver.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_queue(&self, id: DriverId, queue: &str) -> ExecutionResult<()> {
        self.update(id, |driver| driver.queue = Some(queue.to_string()))
    }

    async fn release_to_idle(&self, id: DriverId) -> ExecutionResult<()> {
        match self.update(id, |driver| {
            driver.status = DriverStatus::Idle;
            driver.instance_code = None;
        }) {
            Ok(()) | Err(ExecutionError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, id: DriverId) -> ExecutionResult<()> {
        self.state.lock()?.drivers.remove(&id);
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::model::{InstanceKind, JobSubmissionRequest, JobType};

    fn instance(code: &str) -> JobInstance {
        JobInstance::new(&JobSubmissionRequest {
            instance_code: code.to_string(),
            job_name: "job".to_string(),
            job_type: JobType::Batch,
            instance_kind: InstanceKind::Normal,
            job_text: "true".to_string(),
            job_config: String::new(),
            cluster_code: "c1".to_string(),
            queue: None,
            access_key: None,
            schedule_time: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_instance_lock() {
        let store = MemoryInstanceStore::new();
        store.create_if_absent(instance("i1")).await.unwrap();
        assert!(store.try_lock("i1").await.unwrap());
        assert!(!store.try_lock("i1").await.unwrap());
        store.unlock("i1").await.unwrap();
        assert!(store.try_lock("i1").await.unwrap());
        assert!(store.try_lock("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_mark_running_after_kill() {
        let store = MemoryInstanceStore::new();
        store.create_if_absent(instance("i1")).await.unwrap();
        store
            .set_status("i1", InstanceStatus::Killed, None)
            .await
            .unwrap();
        let updated = store
            .mark_running("i1", DriverId::from(1), "application_1")
            .await
            .unwrap();
        assert!(!updated);
        let stored = store.get("i1").await.unwrap().unwrap();
        assert_eq!(stored.status, InstanceStatus::Killed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_idle_shared_driver_once() {
        let store = Arc::new(MemoryDriverStore::new());
        let driver = store.create_pending("c1", true, None).await.unwrap();
        store
            .mark_provisioned(driver.id, "application_1", "127.0.0.1:1", None)
            .await
            .unwrap();
        // A pending driver is reserved for the submission that provisioned it.
        assert!(store.claim_idle_shared("c1").await.unwrap().is_none());
        store.release_to_idle(driver.id).await.unwrap();

        let claims = futures::future::join_all((0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim_idle_shared("c1").await.unwrap() })
        }))
        .await;
        let claimed = claims
            .into_iter()
            .filter_map(|x| x.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, DriverStatus::Running);
        assert!(store.claim_idle_shared("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_instance_to_released_driver() {
        let store = MemoryDriverStore::new();
        let driver = store.create_pending("c1", true, None).await.unwrap();
        assert!(store.attach_instance(driver.id, "i1").await.unwrap());
        let stored = store.get(driver.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DriverStatus::Running);
        assert_eq!(stored.instance_code.as_deref(), Some("i1"));

        store.release_to_idle(driver.id).await.unwrap();
        assert!(!store.attach_instance(driver.id, "i2").await.unwrap());
        let stored = store.get(driver.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DriverStatus::Idle);
        assert_eq!(stored.instance_code, None);

        store.delete(driver.id).await.unwrap();
        assert!(!store.attach_instance(driver.id, "i3").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_driver_reserves_id() {
        let store = MemoryDriverStore::new();
        store
            .register(Driver {
                id: DriverId::from(5),
                cluster_code: "c1".to_string(),
                application_id: Some("local".to_string()),
                queue: None,
                status: DriverStatus::Idle,
                shareable: true,
                address: Some("127.0.0.1:8080".to_string()),
                instance_code: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let driver = store.create_pending("c1", false, None).await.unwrap();
        assert_eq!(driver.id, DriverId::from(6));
        store.delete(driver.id).await.unwrap();
        store.release_to_idle(driver.id).await.unwrap();
        assert_eq!(store.list("c1").await.unwrap().len(), 1);
    }
}
