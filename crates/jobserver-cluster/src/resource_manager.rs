use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::Deserialize;
use tokio::net::TcpStream;

use crate::error::{ClusterError, ClusterResult};
use crate::hadoop::HadoopConfiguration;
use crate::model::ResourceSnapshot;

const CLUSTER_INFO_PATH: &str = "/ws/v1/cluster/info";
const CLUSTER_METRICS_PATH: &str = "/ws/v1/cluster/metrics";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHealth {
    pub state: String,
    pub ha_state: String,
}

impl EndpointHealth {
    pub fn is_active(&self) -> bool {
        self.state.eq_ignore_ascii_case("STARTED") && self.ha_state.eq_ignore_ascii_case("ACTIVE")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveResourceManager {
    pub address: String,
    pub webapp_address: String,
}

/// The REST API of the YARN resource manager.
#[async_trait::async_trait]
pub trait ResourceManagerClient: Send + Sync + 'static {
    async fn probe_endpoint_health(&self, webapp_address: &str) -> ClusterResult<EndpointHealth>;

    async fn get_resource_metrics(&self, webapp_address: &str) -> ClusterResult<ResourceSnapshot>;

    /// Returns whether a TCP connection can be opened to the address.
    async fn can_connect(&self, address: &str) -> bool;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfoResponse {
    cluster_info: ClusterInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfo {
    state: String,
    #[serde(default)]
    ha_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterMetricsResponse {
    cluster_metrics: ClusterMetrics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterMetrics {
    #[serde(rename = "availableMB")]
    available_mb: i64,
    available_virtual_cores: i64,
}

pub struct HttpResourceManagerClient {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl HttpResourceManagerClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> ClusterResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    fn url(webapp_address: &str, path: &str) -> String {
        if webapp_address.starts_with("http://") || webapp_address.starts_with("https://") {
            format!("{}{path}", webapp_address.trim_end_matches('/'))
        } else {
            format!("http://{webapp_address}{path}")
        }
    }
}

#[async_trait::async_trait]
impl ResourceManagerClient for HttpResourceManagerClient {
    async fn probe_endpoint_health(&self, webapp_address: &str) -> ClusterResult<EndpointHealth> {
        let response: ClusterInfoResponse = self
            .client
            .get(Self::url(webapp_address, CLUSTER_INFO_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EndpointHealth {
            state: response.cluster_info.state,
            ha_state: response.cluster_info.ha_state,
        })
    }

    async fn get_resource_metrics(&self, webapp_address: &str) -> ClusterResult<ResourceSnapshot> {
        let response: ClusterMetricsResponse = self
            .client
            .get(Self::url(webapp_address, CLUSTER_METRICS_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ResourceSnapshot {
            available_memory_mb: response.cluster_metrics.available_mb,
            available_virtual_cores: response.cluster_metrics.available_virtual_cores,
            fetched_at: Utc::now(),
        })
    }

    async fn can_connect(&self, address: &str) -> bool {
        let address = address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(address)).await,
            Ok(Ok(_))
        )
    }
}

/// Finds the first resource manager that accepts connections and reports itself
/// as started and active.
pub(crate) async fn find_active_resource_manager(
    cluster: &str,
    configuration: &HadoopConfiguration,
    client: &dyn ResourceManagerClient,
) -> ClusterResult<ActiveResourceManager> {
    for (address, webapp_address) in configuration.resource_manager_candidates() {
        let Some(webapp_address) = webapp_address else {
            debug!("skipping resource manager {address} of cluster {cluster} without web address");
            continue;
        };
        if !client.can_connect(&address).await {
            debug!("resource manager {address} of cluster {cluster} is not reachable");
            continue;
        }
        match client.probe_endpoint_health(&webapp_address).await {
            Ok(health) if health.is_active() => {
                return Ok(ActiveResourceManager {
                    address,
                    webapp_address,
                });
            }
            Ok(health) => {
                debug!(
                    "resource manager {address} of cluster {cluster} is not active: {} {}",
                    health.state, health.ha_state
                );
            }
            Err(e) => {
                warn!("failed to probe resource manager {webapp_address} of cluster {cluster}: {e}");
            }
        }
    }
    Err(ClusterError::NoActiveResourceManager(cluster.to_string()))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> HttpResourceManagerClient {
        HttpResourceManagerClient::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap()
    }

    async fn mock_cluster_info(server: &MockServer, state: &str, ha_state: &str) {
        Mock::given(method("GET"))
            .and(path(CLUSTER_INFO_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clusterInfo": {
                    "id": 1,
                    "state": state,
                    "haState": ha_state,
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_resource_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CLUSTER_METRICS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "clusterMetrics": {
                    "appsRunning": 3,
                    "availableMB": 2048,
                    "availableVirtualCores": 7,
                }
            })))
            .mount(&server)
            .await;

        let snapshot = client().get_resource_metrics(&server.uri()).await.unwrap();
        assert_eq!(snapshot.available_memory_mb, 2048);
        assert_eq!(snapshot.available_virtual_cores, 7);
    }

    #[tokio::test]
    async fn test_find_active_resource_manager() {
        let standby = MockServer::start().await;
        mock_cluster_info(&standby, "STARTED", "STANDBY").await;
        let active = MockServer::start().await;
        mock_cluster_info(&active, "STARTED", "ACTIVE").await;

        let mut conf = HadoopConfiguration::new();
        let standby_address = standby.address().to_string();
        let active_address = active.address().to_string();
        conf.set("yarn.resourcemanager.address.rm1", standby_address.clone());
        conf.set("yarn.resourcemanager.webapp.address.rm1", standby_address);
        conf.set("yarn.resourcemanager.address.rm2", active_address.clone());
        conf.set("yarn.resourcemanager.webapp.address.rm2", active_address.clone());

        let found = find_active_resource_manager("c1", &conf, &client())
            .await
            .unwrap();
        assert_eq!(found.webapp_address, active_address);
    }

    #[tokio::test]
    async fn test_no_active_resource_manager() {
        let server = MockServer::start().await;
        mock_cluster_info(&server, "INITED", "INITIALIZING").await;

        let mut conf = HadoopConfiguration::new();
        conf.set("yarn.resourcemanager.address", server.address().to_string());
        conf.set("yarn.resourcemanager.webapp.address", server.address().to_string());

        let result = find_active_resource_manager("c1", &conf, &client()).await;
        assert!(matches!(result, Err(ClusterError::NoActiveResourceManager(c)) if c == "c1"));
    }
}
