use chrono::{DateTime, Utc};
use tokio::sync::watch;

pub enum DriverTaskState {
    Idle,
    Running {
        instance_code: String,
        started_at: DateTime<Utc>,
        /// Set to `true` when a stop is requested by the user.
        stop: watch::Sender<bool>,
    },
}

impl DriverTaskState {
    pub fn instance_code(&self) -> Option<&str> {
        match self {
            DriverTaskState::Idle => None,
            DriverTaskState::Running { instance_code, .. } => Some(instance_code),
        }
    }
}
