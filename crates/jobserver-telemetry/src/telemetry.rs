use std::io::Write;
use std::sync::Mutex;

use jobserver_common::config::TelemetryConfig;
use log::debug;

use crate::error::{TelemetryError, TelemetryResult};

enum TelemetryStatus {
    Uninitialized,
    Initialized,
    Failed,
}

static TELEMETRY_STATUS: Mutex<TelemetryStatus> = Mutex::new(TelemetryStatus::Uninitialized);

/// Installs the process logger.
/// The default filter comes from the configuration and can be overridden by `RUST_LOG`.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    let mut status = TELEMETRY_STATUS
        .lock()
        .map_err(|e| TelemetryError::internal(e.to_string()))?;

    match *status {
        TelemetryStatus::Uninitialized => match init_logs(config) {
            Ok(()) => {
                debug!("telemetry initialized");
                *status = TelemetryStatus::Initialized;
                Ok(())
            }
            Err(e) => {
                *status = TelemetryStatus::Failed;
                Err(e)
            }
        },
        TelemetryStatus::Initialized => {
            Err(TelemetryError::internal("telemetry already initialized"))
        }
        TelemetryStatus::Failed => Err(TelemetryError::internal(
            "telemetry failed to initialize previously",
        )),
    }
}

fn init_logs(config: &TelemetryConfig) -> TelemetryResult<()> {
    if config.log_filter.is_empty() {
        return Err(TelemetryError::invalid("empty log filter"));
    }
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .format(move |buf, record| {
        let level = record.level();
        let target = record.target();
        let style = buf.default_level_style(level);
        let timestamp = buf.timestamp();
        let args = record.args();
        writeln!(buf, "[{timestamp} {style}{level}{style:#} {target}] {args}")
    })
    .try_init()
    .map_err(|e| TelemetryError::internal(e.to_string()))
}
