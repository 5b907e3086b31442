use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ClusterHealth, KubernetesConfig, Role, Security, Storage};

/// Desired state of one search cluster.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logging.lograft.io",
    version = "v1beta1",
    kind = "Elasticsearch",
    plural = "elasticsearches",
    shortname = "es",
    namespaced,
    status = "ElasticsearchStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.esVersion"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.esClusterState"}"#
)]
pub struct ElasticsearchSpec {
    #[serde(rename = "esClusterName")]
    pub cluster_name: String,
    #[serde(rename = "esVersion")]
    pub version: String,
    #[serde(rename = "esSecurity", default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(rename = "esMaster", default)]
    pub master: NodeSpecificConfig,
    #[serde(rename = "esData", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeSpecificConfig>,
    #[serde(rename = "esIngestion", default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<NodeSpecificConfig>,
    #[serde(rename = "esClient", default, skip_serializing_if = "Option::is_none")]
    pub client: Option<NodeSpecificConfig>,
    #[serde(rename = "esPlugins", default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
}

/// Sizing and configuration for one role's workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpecificConfig {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_config: Option<KubernetesConfig>,
    /// ConfigMap whose entries are injected as environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_max_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm_min_memory: Option<String>,
}

impl Default for NodeSpecificConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            kubernetes_config: None,
            custom_config: None,
            storage: None,
            jvm_max_memory: None,
            jvm_min_memory: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ElasticsearchStatus {
    #[serde(rename = "esVersion", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "esClusterState", default)]
    pub cluster_state: ClusterHealth,
    #[serde(rename = "activeShards", default, skip_serializing_if = "Option::is_none")]
    pub active_shards: Option<i32>,
    #[serde(rename = "esMaster", default, skip_serializing_if = "Option::is_none")]
    pub master: Option<i32>,
    #[serde(rename = "esData", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<i32>,
    #[serde(rename = "esIngestion", default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<i32>,
    #[serde(rename = "esClient", default, skip_serializing_if = "Option::is_none")]
    pub client: Option<i32>,
}

impl ElasticsearchStatus {
    pub fn set_role_count(&mut self, role: Role, count: i32) {
        let slot = match role {
            Role::Master => &mut self.master,
            Role::Data => &mut self.data,
            Role::Ingestion => &mut self.ingestion,
            Role::Client => &mut self.client,
        };
        *slot = Some(count);
    }
}

impl ElasticsearchSpec {
    /// Configuration for `role`; `None` when an optional role is not declared.
    pub fn node(&self, role: Role) -> Option<&NodeSpecificConfig> {
        match role {
            Role::Master => Some(&self.master),
            Role::Data => self.data.as_ref(),
            Role::Ingestion => self.ingestion.as_ref(),
            Role::Client => self.client.as_ref(),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.security.as_ref().map(|s| s.tls_enabled).unwrap_or(false)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls_enabled() { "https" } else { "http" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_manifest_gets_defaults() {
        let spec: ElasticsearchSpec = serde_json::from_value(serde_json::json!({
            "esClusterName": "prod",
            "esVersion": "7.17.0",
            "esData": {"replicas": 2}
        }))
        .unwrap();
        assert_eq!(spec.master.replicas, 1);
        assert_eq!(spec.node(Role::Data).map(|n| n.replicas), Some(2));
        assert!(spec.node(Role::Client).is_none());
        assert!(!spec.tls_enabled());
        assert_eq!(spec.scheme(), "http");
    }

    #[test]
    fn status_round_trips_wire_names() {
        let mut st = ElasticsearchStatus { version: Some("7.17.0".into()), ..Default::default() };
        st.set_role_count(Role::Master, 3);
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["esMaster"], 3);
        assert_eq!(v["esClusterState"], "Unknown");
        assert!(v.get("esData").is_none());
    }

    #[test]
    fn storage_defaults_apply_inside_role() {
        let node: NodeSpecificConfig = serde_json::from_value(serde_json::json!({"storage": {}})).unwrap();
        let storage = node.storage.unwrap();
        assert_eq!(storage.storage_size, "1Gi");
        assert_eq!(storage.access_modes, vec!["ReadWriteOnce".to_string()]);
    }
}
