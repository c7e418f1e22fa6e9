use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ClusterResult;

pub const AUTHENTICATION_KEY: &str = "hadoop.security.authentication";
pub const RESOURCE_MANAGER_ADDRESS_KEY: &str = "yarn.resourcemanager.address";
pub const RESOURCE_MANAGER_WEBAPP_ADDRESS_KEY: &str = "yarn.resourcemanager.webapp.address";

#[derive(Debug, Deserialize)]
struct XmlConfiguration {
    #[serde(rename = "property", default)]
    properties: Vec<XmlProperty>,
}

#[derive(Debug, Deserialize)]
struct XmlProperty {
    name: String,
    #[serde(default)]
    value: String,
}

/// Flattened Hadoop `*-site.xml` properties.
/// Resources added later override the properties of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HadoopConfiguration {
    properties: BTreeMap<String, String>,
}

impl HadoopConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_xml(&mut self, content: &str) -> ClusterResult<()> {
        let xml: XmlConfiguration = quick_xml::de::from_str(content)?;
        for property in xml.properties {
            self.properties
                .insert(property.name.trim().to_string(), property.value.trim().to_string());
        }
        Ok(())
    }

    /// Adds the resource file if it exists.
    pub async fn add_resource(&mut self, path: &Path) -> ClusterResult<bool> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                self.add_xml(&content)?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|x| x.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn is_kerberos_authentication(&self) -> bool {
        self.get(AUTHENTICATION_KEY)
            .is_some_and(|x| x.eq_ignore_ascii_case("kerberos"))
    }

    /// Returns the resource manager RPC addresses in key order, paired with the
    /// web application address for the same resource manager ID if configured.
    /// A key without suffix refers to a non-HA resource manager.
    pub fn resource_manager_candidates(&self) -> Vec<(String, Option<String>)> {
        self.properties
            .iter()
            .filter_map(|(key, value)| {
                let suffix = key.strip_prefix(RESOURCE_MANAGER_ADDRESS_KEY)?;
                if !(suffix.is_empty() || suffix.starts_with('.')) || value.is_empty() {
                    return None;
                }
                let webapp = self
                    .get(&format!("{RESOURCE_MANAGER_WEBAPP_ADDRESS_KEY}{suffix}"))
                    .map(|x| x.to_string());
                Some((value.clone(), webapp))
            })
            .collect()
    }
}
