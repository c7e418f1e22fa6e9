//! A dedicated module for submission pipeline options to ensure readonly access.
use std::time::Duration;

use jobserver_common::config::AppConfig;
use jobserver_server::RetryStrategy;

#[readonly::make]
#[derive(Debug, Clone)]
pub struct SubmissionPipelineOptions {
    pub callback_url: String,
    pub max_retry_count: u32,
    pub max_concurrent_provisions: usize,
    pub dispatch_retry_strategy: RetryStrategy,
    pub driver_connect_timeout: Duration,
    pub driver_request_timeout: Duration,
    pub dedicated_driver_prefixes: Vec<String>,
}

impl SubmissionPipelineOptions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            callback_url: config.server.callback_url(),
            max_retry_count: config.submit.max_retry_count,
            max_concurrent_provisions: config.submit.max_concurrent_provisions,
            dispatch_retry_strategy: (&config.submit).into(),
            driver_connect_timeout: Duration::from_secs(config.submit.driver_connect_timeout_secs),
            driver_request_timeout: Duration::from_secs(config.submit.driver_request_timeout_secs),
            dedicated_driver_prefixes: config.submit.dedicated_driver_prefixes.clone(),
        }
    }
}
