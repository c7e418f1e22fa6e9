use jobserver_common::config::AppConfig;
use jobserver_telemetry::telemetry::init_telemetry;

pub fn run_driver() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_telemetry(&config.telemetry)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(jobserver_execution::run_driver(&config))?;

    Ok(())
}
