use std::sync::PoisonError;

use jobserver_cluster::error::ClusterError;
use jobserver_telemetry::error::TelemetryError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinError;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("admission rejected: {0}")]
    AdmissionRejected(String),
    #[error("failed to move application {application_id} to queue {queue}: {message}")]
    QueueSwitchFailure {
        application_id: String,
        queue: String,
        message: String,
    },
    #[error("failed to dispatch job to driver of application {application_id}: {message}")]
    DispatchFailure {
        application_id: String,
        message: String,
        /// Whether the driver accepted the connection but did not respond in time.
        timed_out: bool,
    },
    #[error("failed to provision driver: {0}")]
    ProvisioningFailure(String),
    #[error("submission of instance {instance_code} rejected: {message}")]
    SubmissionRejected {
        instance_code: String,
        message: String,
    },
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("error in instance log: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("error in HTTP client: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("error in JSON serde: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ExecutionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExecutionError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecutionError::InternalError(message.into())
    }

    /// Returns whether the error is a read timeout when talking to a driver.
    pub fn is_read_timeout(&self) -> bool {
        matches!(self, ExecutionError::DispatchFailure { timed_out: true, .. })
    }
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<PoisonError<T>> for ExecutionError {
    fn from(error: PoisonError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<SendError<T>> for ExecutionError {
    fn from(error: SendError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

/// Formats the error together with its chain of sources.
pub fn error_trace(error: &dyn std::error::Error) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&e.to_string());
        source = e.source();
    }
    trace
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_trace() {
        let error = ExecutionError::from(ClusterError::NotFound("c1".to_string()));
        assert_eq!(error_trace(&error), "cluster not found or offline: c1");

        let io = std::io::Error::other("disk full");
        let error = ExecutionError::from(TelemetryError::from(io));
        let trace = error_trace(&error);
        assert!(trace.starts_with("error in instance log:"));
        assert!(trace.contains("caused by: "));
    }

    #[test]
    fn test_read_timeout() {
        let error = ExecutionError::DispatchFailure {
            application_id: "application_1".to_string(),
            message: "operation timed out".to_string(),
            timed_out: true,
        };
        assert!(error.is_read_timeout());
        assert!(!ExecutionError::ProvisioningFailure("x".to_string()).is_read_timeout());
    }
}
