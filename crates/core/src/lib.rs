//! lograft core types: declared resources, role naming and the health model.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod common;
mod elasticsearch;
mod index;
mod stack;

pub use common::{ElasticConfig, KubernetesConfig, ManagementEndpoint, Security, ServiceIntegration, Storage};
pub use elasticsearch::{Elasticsearch, ElasticsearchSpec, ElasticsearchStatus, NodeSpecificConfig};
pub use index::{
    DeletePhase, IndexLifecycle, IndexLifecycleSpec, IndexTemplate, IndexTemplateSettings, IndexTemplateSpec, RolloverPhase,
};
pub use stack::{Fluentd, FluentdSpec, FluentdStatus, IndexNameStrategy, Kibana, KibanaSpec, KibanaStatus};

/// API group shared by every declared kind.
pub const GROUP: &str = "logging.lograft.io";
/// Annotation stamped on every generated object.
pub const MANAGED_ANNOTATION: &str = "logging.lograft.io/managed";

/// Functional subdivision of a search cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Data,
    Ingestion,
    Client,
}

impl Role {
    /// Optional roles in the order they are provisioned.
    pub const OPTIONAL: [Role; 3] = [Role::Data, Role::Ingestion, Role::Client];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Data => "data",
            Role::Ingestion => "ingestion",
            Role::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic names for every object derived from a declaration.
///
/// Other manifests in a cluster refer to these by hand, so the formats must not drift.
pub mod naming {
    use super::Role;

    pub fn workload_name(id: &str, role: Role) -> String {
        format!("{}-{}", id, role.as_str())
    }

    pub fn headless_name(id: &str, role: Role) -> String {
        format!("{}-{}-headless", id, role.as_str())
    }

    pub fn password_secret_name(id: &str) -> String {
        format!("{}-password", id)
    }

    pub fn tls_secret_name(id: &str) -> String {
        format!("{}-tls-cert", id)
    }

    pub fn integration_secret_name(id: &str) -> String {
        format!("{}-sa-token", id)
    }

    /// Name of a cluster-scoped object serving the namespaced `id`.
    pub fn cluster_scoped_name(namespace: &str, id: &str) -> String {
        format!("{}-{}", namespace, id)
    }

    /// Pod names of a StatefulSet with `replicas` members, comma-joined.
    pub fn pod_names(id: &str, role: Role, replicas: i32) -> String {
        let base = workload_name(id, role);
        (0..replicas.max(0)).map(|i| format!("{}-{}", base, i)).collect::<Vec<_>>().join(",")
    }
}

/// Aggregate cluster health as written to status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub enum ClusterHealth {
    #[default]
    Unknown,
    NotReady,
    Ready,
}

impl ClusterHealth {
    /// Classify the `status` string of a cluster health response.
    pub fn classify(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "green" | "yellow" => ClusterHealth::Ready,
            _ => ClusterHealth::NotReady,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterHealth::Unknown => "Unknown",
            ClusterHealth::NotReady => "NotReady",
            ClusterHealth::Ready => "Ready",
        }
    }
}
