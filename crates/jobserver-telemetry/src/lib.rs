pub mod error;
pub mod instance_log;
pub mod telemetry;
