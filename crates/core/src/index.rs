use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ManagementEndpoint;

/// Index template kept in sync on a search cluster.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "logging.lograft.io", version = "v1beta1", kind = "IndexTemplate", plural = "indextemplates", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct IndexTemplateSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub elasticsearch: ManagementEndpoint,
    pub index_patterns: Vec<String>,
    #[serde(default)]
    pub settings: IndexTemplateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexTemplateSettings {
    #[serde(default = "default_shards")]
    pub shards: i32,
    #[serde(default = "default_index_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollover_alias: Option<String>,
}

impl Default for IndexTemplateSettings {
    fn default() -> Self {
        Self { shards: default_shards(), replicas: default_index_replicas(), lifecycle_name: None, rollover_alias: None }
    }
}

/// Index lifecycle (ILM) policy kept in sync on a search cluster.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "logging.lograft.io", version = "v1beta1", kind = "IndexLifecycle", plural = "indexlifecycles", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct IndexLifecycleSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub elasticsearch: ManagementEndpoint,
    pub rollover: RolloverPhase,
    pub delete: DeletePhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloverPhase {
    pub max_size: String,
    pub max_age: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeletePhase {
    pub min_age: String,
}

fn default_enabled() -> bool {
    true
}

fn default_shards() -> i32 {
    1
}

fn default_index_replicas() -> i32 {
    1
}
