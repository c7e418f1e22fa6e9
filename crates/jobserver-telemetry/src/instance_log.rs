//! Per-instance log streams.
//!
//! Every job instance has a log file named after its instance code, grouped by the
//! schedule date of the instance. A log resource is registered while the output of the
//! driver is being tailed into the file, and removed when the instance no longer runs
//! on the driver.
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use tokio::io::AsyncWriteExt;

use crate::error::TelemetryResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogResource {
    pub instance_code: String,
    pub cluster_code: String,
    pub application_id: String,
    pub driver_address: String,
    pub share_driver: bool,
    pub schedule_time: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait InstanceLogSink: Send + Sync + 'static {
    /// Starts tailing the driver output for the instance.
    async fn create_log_resource(&self, resource: LogResource) -> TelemetryResult<()>;

    /// Stops tailing the driver output for the instance.
    /// Removing a resource that does not exist is a no-op.
    async fn remove_log_resource(&self, instance_code: &str);

    /// Appends a message to the log stream of the instance.
    async fn append(
        &self,
        instance_code: &str,
        schedule_time: DateTime<Utc>,
        message: &str,
    ) -> TelemetryResult<()>;
}

pub struct FileInstanceLogSink {
    root: PathBuf,
    resources: DashMap<String, LogResource>,
}

impl FileInstanceLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resources: DashMap::new(),
        }
    }

    pub fn log_path(&self, instance_code: &str, schedule_time: DateTime<Utc>) -> PathBuf {
        self.root
            .join(schedule_time.format("%Y-%m-%d").to_string())
            .join(format!("{instance_code}.log"))
    }

    pub fn is_active(&self, instance_code: &str) -> bool {
        self.resources.contains_key(instance_code)
    }
}

#[async_trait::async_trait]
impl InstanceLogSink for FileInstanceLogSink {
    async fn create_log_resource(&self, resource: LogResource) -> TelemetryResult<()> {
        let path = self.log_path(&resource.instance_code, resource.schedule_time);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(
            "tailing logs of instance {} from application {} at {}",
            resource.instance_code, resource.application_id, resource.driver_address
        );
        if let Some(previous) = self
            .resources
            .insert(resource.instance_code.clone(), resource)
        {
            warn!(
                "replaced the log resource of instance {} from application {}",
                previous.instance_code, previous.application_id
            );
        }
        Ok(())
    }

    async fn remove_log_resource(&self, instance_code: &str) {
        if self.resources.remove(instance_code).is_some() {
            info!("stopped tailing logs of instance {instance_code}");
        }
    }

    async fn append(
        &self,
        instance_code: &str,
        schedule_time: DateTime<Utc>,
        message: &str,
    ) -> TelemetryResult<()> {
        let path = self.log_path(instance_code, schedule_time);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let line = format!("[{}] {message}\n", Utc::now().to_rfc3339());
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn resource(schedule_time: DateTime<Utc>) -> LogResource {
        LogResource {
            instance_code: "inst-1".to_string(),
            cluster_code: "default".to_string(),
            application_id: "application_1_0001".to_string(),
            driver_address: "http://127.0.0.1:8000".to_string(),
            share_driver: true,
            schedule_time,
        }
    }

    #[tokio::test]
    async fn test_log_resource_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileInstanceLogSink::new(dir.path());
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        sink.create_log_resource(resource(time)).await.unwrap();
        assert!(sink.is_active("inst-1"));
        assert!(dir.path().join("2024-03-01").is_dir());

        sink.remove_log_resource("inst-1").await;
        assert!(!sink.is_active("inst-1"));
        // removing twice is harmless
        sink.remove_log_resource("inst-1").await;
    }

    #[tokio::test]
    async fn test_append_to_dated_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileInstanceLogSink::new(dir.path());
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();

        sink.append("inst-2", time, "first").await.unwrap();
        sink.append("inst-2", time, "second").await.unwrap();

        let path = sink.log_path("inst-2", time);
        assert_eq!(path, dir.path().join("2024-03-01").join("inst-2.log"));
        let content = std::fs::read_to_string(path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }
}
