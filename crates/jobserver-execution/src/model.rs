use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DriverId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Batch,
    Streaming,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Normal,
    /// Development runs are never queued for retry.
    Dev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Waiting,
    Submitting,
    Running,
    Finished,
    Failed,
    Killed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Finished | InstanceStatus::Failed | InstanceStatus::Killed
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceStatus::Waiting => "WAITING",
            InstanceStatus::Submitting => "SUBMITTING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Finished => "FINISHED",
            InstanceStatus::Failed => "FAILED",
            InstanceStatus::Killed => "KILLED",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    /// The driver is being provisioned or has been reserved for a submission.
    Pending,
    Idle,
    Running,
    /// The driver is broken and waiting to be deleted.
    Error,
}

/// A request to run one instance of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmissionRequest {
    pub instance_code: String,
    pub job_name: String,
    pub job_type: JobType,
    pub instance_kind: InstanceKind,
    pub job_text: String,
    /// Job parameters as `key = value` lines.
    #[serde(default)]
    pub job_config: String,
    pub cluster_code: String,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    pub schedule_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub code: String,
    pub job_name: String,
    pub cluster_code: String,
    pub instance_kind: InstanceKind,
    pub status: InstanceStatus,
    pub retry_count: u32,
    pub schedule_time: DateTime<Utc>,
    pub driver_id: Option<DriverId>,
    pub application_id: Option<String>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobInstance {
    pub fn new(request: &JobSubmissionRequest) -> Self {
        Self {
            code: request.instance_code.clone(),
            job_name: request.job_name.clone(),
            cluster_code: request.cluster_code.clone(),
            instance_kind: request.instance_kind,
            status: InstanceStatus::Waiting,
            retry_count: 0,
            schedule_time: request.schedule_time,
            driver_id: None,
            application_id: None,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Builds the instance of a job dispatched to a driver that has not seen it before.
    pub fn from_payload(payload: &JobPayload, cluster_code: &str) -> Self {
        Self {
            code: payload.instance_code.clone(),
            job_name: payload.job_name.clone(),
            cluster_code: cluster_code.to_string(),
            instance_kind: payload.instance_kind,
            status: InstanceStatus::Waiting,
            retry_count: 0,
            schedule_time: payload.schedule_time,
            driver_id: Some(payload.driver_id),
            application_id: Some(payload.application_id.clone()),
            message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// The instance information returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_code: String,
    pub status: InstanceStatus,
    pub retry_count: u32,
    pub application_id: Option<String>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobInstance> for InstanceInfo {
    fn from(instance: &JobInstance) -> Self {
        Self {
            instance_code: instance.code.clone(),
            status: instance.status,
            retry_count: instance.retry_count,
            application_id: instance.application_id.clone(),
            message: instance.message.clone(),
            started_at: instance.started_at,
            finished_at: instance.finished_at,
        }
    }
}

/// A driver process bound to one scheduler application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Driver {
    pub id: DriverId,
    pub cluster_code: String,
    pub application_id: Option<String>,
    pub queue: Option<String>,
    pub status: DriverStatus,
    pub shareable: bool,
    pub address: Option<String>,
    /// The instance currently running on the driver.
    pub instance_code: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    SharedDriver {
        driver_id: DriverId,
        application_id: String,
        address: String,
        queue: Option<String>,
    },
    NewDriverPending {
        driver_id: DriverId,
    },
    AdmissionError {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitOutcome {
    DispatchedToShared { address: String },
    #[serde(rename_all = "camelCase")]
    ProvisioningStarted { driver_id: DriverId },
    /// The instance was already dispatched by a concurrent submission.
    #[serde(rename_all = "camelCase")]
    AlreadyDispatched { instance_code: String },
    Rejected { message: String },
}

/// The job sent to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub application_id: String,
    pub driver_id: DriverId,
    pub share_driver: bool,
    pub instance_code: String,
    pub job_name: String,
    pub job_type: JobType,
    pub instance_kind: InstanceKind,
    pub job_text: String,
    pub job_config: String,
    pub access_key: Option<String>,
    pub yarn_queue: Option<String>,
    pub callback_url: String,
    pub schedule_time: DateTime<Utc>,
}

/// The response envelope of the driver HTTP endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DriverResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopJobRequest {
    pub instance_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusResponse {
    pub driver_id: DriverId,
    pub status: DriverStatus,
    pub instance_code: Option<String>,
}
