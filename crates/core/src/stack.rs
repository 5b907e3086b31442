use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ElasticConfig, KubernetesConfig, Security};

/// Dashboard pointing at an existing search cluster.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logging.lograft.io",
    version = "v1beta1",
    kind = "Kibana",
    plural = "kibanas",
    namespaced,
    status = "KibanaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(rename = "esCluster")]
    pub elastic: ElasticConfig,
    #[serde(rename = "esSecurity", default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_config: Option<KubernetesConfig>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KibanaStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub es_version: Option<String>,
}

/// Node-level log shipper.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "logging.lograft.io",
    version = "v1beta1",
    kind = "Fluentd",
    plural = "fluentds",
    namespaced,
    status = "FluentdStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct FluentdSpec {
    #[serde(rename = "esCluster")]
    pub elastic: ElasticConfig,
    #[serde(rename = "esSecurity", default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_config: Option<KubernetesConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name_strategy: Option<IndexNameStrategy>,
    /// ConfigMap replacing the generated `fluent.conf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_config: Option<String>,
    /// ConfigMap with extra `*.conf` snippets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_config: Option<String>,
}

/// Kubernetes metadata field used to split log indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndexNameStrategy {
    NamespaceName,
    PodName,
}

impl IndexNameStrategy {
    pub fn field(self) -> &'static str {
        match self {
            IndexNameStrategy::NamespaceName => "namespace_name",
            IndexNameStrategy::PodName => "pod_name",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FluentdStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_agents: Option<i32>,
}
