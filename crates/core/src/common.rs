use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pod placement and sizing knobs shared by every workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
    #[serde(rename = "storageClass", default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default = "default_storage_size")]
    pub storage_size: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self { access_modes: default_access_modes(), storage_class_name: None, storage_size: default_storage_size() }
    }
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

/// Credential and transport security for a search cluster and its clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    /// Secret holding the `elastic` user's password under key `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_secret: Option<String>,
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default)]
    pub auto_generate_password: bool,
    /// Dashboard integration; when set a service token is minted once the cluster is healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kibana_integration: Option<ServiceIntegration>,
}

impl Security {
    /// Whether a password secret is referenced at all.
    pub fn has_password(&self) -> bool {
        self.auto_generate_password || self.existing_secret.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIntegration {
    #[serde(default = "default_integration_service")]
    pub service: String,
    #[serde(default = "default_token_name")]
    pub token_name: String,
}

impl Default for ServiceIntegration {
    fn default() -> Self {
        Self { service: default_integration_service(), token_name: default_token_name() }
    }
}

fn default_integration_service() -> String {
    "kibana".to_string()
}

fn default_token_name() -> String {
    "token-sa".to_string()
}

/// Where a dashboard or shipper finds its search cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElasticConfig {
    pub host: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub es_version: String,
}

/// Management endpoint used by index template and lifecycle declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagementEndpoint {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}
