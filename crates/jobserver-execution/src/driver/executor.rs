use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobserver_telemetry::instance_log::InstanceLogSink;
use log::warn;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;

use crate::allocator::parse_job_config;
use crate::error::ExecutionError;
use crate::model::JobPayload;

/// The exit status of a shell that cannot find the command.
const COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum JobError {
    /// A failure reported by the job itself.
    #[error("{0}")]
    Application(String),
    #[error("cannot find {symbol}: {message}")]
    MissingSymbol { symbol: String, message: String },
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<std::io::Error> for JobError {
    fn from(error: std::io::Error) -> Self {
        JobError::Other(Box::new(error))
    }
}

impl From<ExecutionError> for JobError {
    fn from(error: ExecutionError) -> Self {
        JobError::Other(Box::new(error))
    }
}

/// The log stream of the instance being executed.
#[derive(Clone)]
pub struct JobLog {
    sink: Arc<dyn InstanceLogSink>,
    instance_code: String,
    schedule_time: DateTime<Utc>,
}

impl JobLog {
    pub fn new(
        sink: Arc<dyn InstanceLogSink>,
        instance_code: impl Into<String>,
        schedule_time: DateTime<Utc>,
    ) -> Self {
        Self {
            sink,
            instance_code: instance_code.into(),
            schedule_time,
        }
    }

    pub async fn write(&self, message: &str) {
        if let Err(e) = self
            .sink
            .append(&self.instance_code, self.schedule_time, message)
            .await
        {
            warn!(
                "failed to write to the log of instance {}: {e}",
                self.instance_code
            );
        }
    }
}

/// Runs the work unit of a job on the driver.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Executes the job until it completes or `stop` becomes `true`.
    async fn execute(
        &self,
        payload: &JobPayload,
        stop: watch::Receiver<bool>,
        log: &JobLog,
    ) -> Result<(), JobError>;
}

/// Runs the job text as a shell script.
/// Job parameters are passed as environment variables with upper-cased names.
pub struct ShellJobExecutor {
    shell: String,
}

impl ShellJobExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn env_name(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let requested = stop.wait_for(|x| *x).await.is_ok();
    if !requested {
        // The sender is gone so no stop can be requested anymore.
        std::future::pending::<()>().await;
    }
}

#[async_trait::async_trait]
impl JobExecutor for ShellJobExecutor {
    async fn execute(
        &self,
        payload: &JobPayload,
        mut stop: watch::Receiver<bool>,
        log: &JobLog,
    ) -> Result<(), JobError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&payload.job_text)
            .env("JOBSERVER_INSTANCE_CODE", &payload.instance_code)
            .env("JOBSERVER_APPLICATION_ID", &payload.application_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in parse_job_config(&payload.job_config) {
            command.env(Self::env_name(key), value);
        }
        let child = command.spawn()?;
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = stopped(&mut stop) => {
                return Err(JobError::Application("the job was stopped".to_string()));
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            log.write(stdout.trim_end()).await;
        }
        if !stderr.trim().is_empty() {
            log.write(stderr.trim_end()).await;
        }
        if output.status.success() {
            return Ok(());
        }
        let message = match stderr.trim() {
            "" => format!("the job exited with {}", output.status),
            x => x.to_string(),
        };
        match output.status.code() {
            Some(COMMAND_NOT_FOUND) => Err(JobError::MissingSymbol {
                symbol: payload
                    .job_text
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                message,
            }),
            _ => Err(JobError::Application(message)),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jobserver_telemetry::instance_log::FileInstanceLogSink;

    use super::*;
    use crate::id::DriverId;
    use crate::model::{InstanceKind, JobType};

    fn payload(job_text: &str, job_config: &str) -> JobPayload {
        JobPayload {
            application_id: "application_1".to_string(),
            driver_id: DriverId::from(1),
            share_driver: true,
            instance_code: "inst-1".to_string(),
            job_name: "job".to_string(),
            job_type: JobType::Batch,
            instance_kind: InstanceKind::Normal,
            job_text: job_text.to_string(),
            job_config: job_config.to_string(),
            access_key: None,
            yarn_queue: None,
            callback_url: "http://127.0.0.1:9001".to_string(),
            schedule_time: Utc::now(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        sink: Arc<FileInstanceLogSink>,
        log: JobLog,
        time: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FileInstanceLogSink::new(dir.path()));
        let time = Utc::now();
        let log = JobLog::new(sink.clone(), "inst-1", time);
        Fixture {
            _dir: dir,
            sink,
            log,
            time,
        }
    }

    #[test]
    fn test_env_name() {
        assert_eq!(
            ShellJobExecutor::env_name("flink.parallelism-default"),
            "FLINK_PARALLELISM_DEFAULT"
        );
    }

    #[tokio::test]
    async fn test_shell_job_success_with_parameters() {
        let f = fixture();
        let (_tx, rx) = watch::channel(false);
        let executor = ShellJobExecutor::new("sh");
        executor
            .execute(&payload("echo \"rows=$ROWS\"", "rows = 42"), rx, &f.log)
            .await
            .unwrap();
        let log = std::fs::read_to_string(f.sink.log_path("inst-1", f.time)).unwrap();
        assert!(log.contains("rows=42"));
    }

    #[tokio::test]
    async fn test_shell_job_failure() {
        let f = fixture();
        let (_tx, rx) = watch::channel(false);
        let executor = ShellJobExecutor::new("sh");
        let error = executor
            .execute(&payload("echo 'bad input' >&2; exit 3", ""), rx, &f.log)
            .await
            .unwrap_err();
        assert!(matches!(error, JobError::Application(ref x) if x == "bad input"));
    }

    #[tokio::test]
    async fn test_shell_job_missing_command() {
        let f = fixture();
        let (_tx, rx) = watch::channel(false);
        let executor = ShellJobExecutor::new("sh");
        let error = executor
            .execute(&payload("no-such-command-for-jobserver --flag", ""), rx, &f.log)
            .await
            .unwrap_err();
        let JobError::MissingSymbol { symbol, .. } = error else {
            panic!("expected a missing symbol, got {error:?}");
        };
        assert_eq!(symbol, "no-such-command-for-jobserver");
    }

    #[tokio::test]
    async fn test_shell_job_stop() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let executor = ShellJobExecutor::new("sh");
        let payload = payload("sleep 30", "");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();
            tx
        });
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            executor.execute(&payload, rx, &f.log),
        )
        .await
        .unwrap();
        assert!(result.is_err());
        handle.await.unwrap();
    }
}
