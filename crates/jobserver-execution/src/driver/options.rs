use std::sync::Arc;

use jobserver_telemetry::instance_log::InstanceLogSink;

use crate::driver::executor::JobExecutor;
use crate::driver::failure::ArtifactResolver;
use crate::id::DriverId;
use crate::store::{DriverStore, InstanceStore};

#[readonly::make]
pub struct DriverOptions {
    pub driver_id: DriverId,
    pub instances: Arc<dyn InstanceStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub log_sink: Arc<dyn InstanceLogSink>,
    pub executor: Arc<dyn JobExecutor>,
    pub artifact_resolver: Arc<dyn ArtifactResolver>,
}

impl DriverOptions {
    pub fn new(
        driver_id: DriverId,
        instances: Arc<dyn InstanceStore>,
        drivers: Arc<dyn DriverStore>,
        log_sink: Arc<dyn InstanceLogSink>,
        executor: Arc<dyn JobExecutor>,
        artifact_resolver: Arc<dyn ArtifactResolver>,
    ) -> Self {
        Self {
            driver_id,
            instances,
            drivers,
            log_sink,
            executor,
            artifact_resolver,
        }
    }
}
