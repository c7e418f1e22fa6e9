use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use jobserver_common::config::AppConfig;
use jobserver_server::actor::ActorHandle;
use jobserver_server::ServerBuilder;
use jobserver_telemetry::instance_log::FileInstanceLogSink;
use log::info;
use tokio::net::TcpListener;

use crate::driver::actor::DriverTaskEngine;
use crate::driver::event::DriverEvent;
use crate::driver::executor::ShellJobExecutor;
use crate::driver::failure::SearchPathResolver;
use crate::driver::options::DriverOptions;
use crate::driver::server::driver_routes;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::DriverId;
use crate::model::{Driver, DriverStatus};
use crate::store::{DriverStore, MemoryDriverStore, MemoryInstanceStore};

const LOCAL_CLUSTER: &str = "local";

/// Runs a standalone driver process until Ctrl-C.
pub async fn run_driver(config: &AppConfig) -> ExecutionResult<()> {
    let listener = TcpListener::bind((
        config.driver.listen_host.as_str(),
        config.driver.listen_port,
    ))
    .await?;
    let address = listener.local_addr()?.to_string();
    let driver_id = DriverId::from(config.driver.id);

    let drivers = Arc::new(MemoryDriverStore::new());
    drivers
        .register(Driver {
            id: driver_id,
            cluster_code: LOCAL_CLUSTER.to_string(),
            application_id: Some(format!("local_{driver_id}")),
            queue: None,
            status: DriverStatus::Idle,
            shareable: true,
            address: Some(address.clone()),
            instance_code: None,
            updated_at: Utc::now(),
        })
        .await?;
    let options = DriverOptions::new(
        driver_id,
        Arc::new(MemoryInstanceStore::new()),
        drivers,
        Arc::new(FileInstanceLogSink::new(&config.telemetry.instance_log_dir)),
        Arc::new(ShellJobExecutor::new(config.driver.shell.clone())),
        Arc::new(SearchPathResolver::from_env()),
    );
    info!("driver {driver_id} is listening on {address}");
    serve_driver(options, listener, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serves the driver HTTP surface on the listener until the signal completes.
pub async fn serve_driver<F>(
    options: DriverOptions,
    listener: TcpListener,
    signal: F,
) -> ExecutionResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = ActorHandle::<DriverTaskEngine>::new(options);
    let result = ServerBuilder::new("driver")
        .add_routes(driver_routes(handle.clone()))
        .serve(listener, signal)
        .await;
    handle.send(DriverEvent::Shutdown).await?;
    handle.wait_for_stop().await;
    result.map_err(|e| ExecutionError::internal(e.to_string()))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;
    use crate::dispatch::DriverClient;
    use crate::driver::executor::{JobError, JobExecutor, JobLog};
    use crate::model::{InstanceKind, InstanceStatus, JobPayload, JobType};
    use crate::scheduler::MemorySchedulerClient;
    use crate::service::JobService;
    use crate::store::InstanceStore;
    use crate::testing::{request, TestEnvironment};

    struct RunningDriver {
        address: String,
        driver: Driver,
        shutdown: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<ExecutionResult<()>>,
    }

    impl RunningDriver {
        async fn stop(self) {
            let _ = self.shutdown.send(());
            self.server.await.unwrap().unwrap();
        }
    }

    async fn start_driver(env: &TestEnvironment, executor: Arc<dyn JobExecutor>) -> RunningDriver {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let driver = env.add_idle_shared_driver_at("c1", &address).await;
        let options = DriverOptions::new(
            driver.id,
            env.instances.clone(),
            env.drivers.clone(),
            env.log_sink.clone(),
            executor,
            Arc::new(SearchPathResolver::new(vec![])),
        );
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_driver(options, listener, async {
            let _ = rx.await;
        }));
        RunningDriver {
            address,
            driver,
            shutdown: tx,
            server,
        }
    }

    async fn wait_for_status(env: &TestEnvironment, code: &str, status: InstanceStatus) {
        for _ in 0..100 {
            let instance = env.instances.get(code).await.unwrap().unwrap();
            if instance.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let instance = env.instances.get(code).await.unwrap().unwrap();
        panic!("instance {code} is {} instead of {status}", instance.status);
    }

    struct PanickingExecutor;

    #[async_trait::async_trait]
    impl JobExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _payload: &JobPayload,
            _stop: tokio::sync::watch::Receiver<bool>,
            _log: &JobLog,
        ) -> Result<(), JobError> {
            panic!("executor bug");
        }
    }

    #[tokio::test]
    async fn test_submit_to_running_driver() {
        let env = TestEnvironment::new().await;
        let driver = start_driver(&env, Arc::new(ShellJobExecutor::new("sh"))).await;
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));

        let mut request = request("i1", JobType::Batch, InstanceKind::Normal);
        request.job_text = "echo \"hello $GREETING\"".to_string();
        request.job_config = "greeting = world".to_string();
        let schedule_time = request.schedule_time;
        service.submit_job_instance(request).await.unwrap();
        wait_for_status(&env, "i1", InstanceStatus::Finished).await;

        let stored = env.drivers.get(driver.driver.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DriverStatus::Idle);
        assert!(!env.log_sink.is_active("i1"));
        let log = std::fs::read_to_string(env.log_sink.log_path("i1", schedule_time)).unwrap();
        assert!(log.contains("job parameter: greeting = world"));
        assert!(log.contains("hello world"));
        driver.stop().await;
    }

    #[tokio::test]
    async fn test_busy_driver_and_stop() {
        let env = TestEnvironment::new().await;
        let driver = start_driver(&env, Arc::new(ShellJobExecutor::new("sh"))).await;
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));
        let client = DriverClient::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap();

        let mut request = request("i1", JobType::Batch, InstanceKind::Normal);
        request.job_text = "sleep 30".to_string();
        service.submit_job_instance(request).await.unwrap();
        wait_for_status(&env, "i1", InstanceStatus::Running).await;
        let status = client.status(&driver.address).await.unwrap();
        assert_eq!(status.status, DriverStatus::Running);
        assert_eq!(status.instance_code.as_deref(), Some("i1"));

        let mut payload_request = crate::testing::request("i2", JobType::Batch, InstanceKind::Normal);
        payload_request.job_text = "true".to_string();
        let payload = JobPayload {
            application_id: driver.driver.application_id.clone().unwrap(),
            driver_id: driver.driver.id,
            share_driver: true,
            instance_code: payload_request.instance_code.clone(),
            job_name: payload_request.job_name.clone(),
            job_type: payload_request.job_type,
            instance_kind: payload_request.instance_kind,
            job_text: payload_request.job_text.clone(),
            job_config: String::new(),
            access_key: None,
            yarn_queue: None,
            callback_url: "http://127.0.0.1:9001".to_string(),
            schedule_time: payload_request.schedule_time,
        };
        let response = client.run_job(&driver.address, &payload).await.unwrap();
        assert!(!response.success);
        assert_eq!(
            response.message,
            Some(format!("driver {} is busy", driver.driver.id))
        );

        service.stop_instance("i1").await.unwrap();
        wait_for_status(&env, "i1", InstanceStatus::Killed).await;
        for _ in 0..100 {
            if client.status(&driver.address).await.unwrap().status == DriverStatus::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let status = client.status(&driver.address).await.unwrap();
        assert_eq!(status.status, DriverStatus::Idle);
        driver.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_job_fails_instance() {
        let env = TestEnvironment::new().await;
        let driver = start_driver(&env, Arc::new(PanickingExecutor)).await;
        let service = JobService::new(env.pipeline(Arc::new(MemorySchedulerClient::new("x"))));

        service
            .submit_job_instance(request("i1", JobType::Batch, InstanceKind::Normal))
            .await
            .unwrap();
        wait_for_status(&env, "i1", InstanceStatus::Failed).await;
        let instance = env.instances.get("i1").await.unwrap().unwrap();
        assert!(instance.message.unwrap().contains("panic"));
        let stored = env.drivers.get(driver.driver.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DriverStatus::Idle);
        assert!(env.instances.try_lock("i1").await.unwrap());
        driver.stop().await;
    }

    #[tokio::test]
    async fn test_driver_rejects_foreign_job() {
        let env = TestEnvironment::new().await;
        let driver = start_driver(&env, Arc::new(ShellJobExecutor::new("sh"))).await;
        let client = DriverClient::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let request = request("i1", JobType::Batch, InstanceKind::Normal);
        let payload = JobPayload {
            application_id: "application_other".to_string(),
            driver_id: DriverId::from(999),
            share_driver: false,
            instance_code: request.instance_code,
            job_name: request.job_name,
            job_type: request.job_type,
            instance_kind: request.instance_kind,
            job_text: request.job_text,
            job_config: request.job_config,
            access_key: None,
            yarn_queue: None,
            callback_url: "http://127.0.0.1:9001".to_string(),
            schedule_time: request.schedule_time,
        };
        let response = client.run_job(&driver.address, &payload).await.unwrap();
        assert!(!response.success);
        assert!(env.instances.get("i1").await.unwrap().is_none());
        driver.stop().await;
    }
}
