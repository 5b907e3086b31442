//! lograft kubehub: object store client over the Kubernetes API plus an in-memory fake.

#![forbid(unsafe_code)]

use kube::core::ApiResource;
use serde_json::Value as Json;

mod kube_store;
pub mod leader;
mod memory;

pub use kube_store::KubeStore;
pub use leader::LeaderLease;
pub use memory::{MemoryStore, StoreCall, StoreOp};

/// Every object kind the operator reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
    Service,
    ServiceAccount,
    StatefulSet,
    Deployment,
    DaemonSet,
    ClusterRole,
    ClusterRoleBinding,
    Elasticsearch,
    Kibana,
    Fluentd,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::DaemonSet => "DaemonSet",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::Elasticsearch => "Elasticsearch",
            ObjectKind::Kibana => "Kibana",
            ObjectKind::Fluentd => "Fluentd",
        }
    }

    pub fn group(self) -> &'static str {
        match self {
            ObjectKind::Secret | ObjectKind::ConfigMap | ObjectKind::Service | ObjectKind::ServiceAccount => "",
            ObjectKind::StatefulSet | ObjectKind::Deployment | ObjectKind::DaemonSet => "apps",
            ObjectKind::ClusterRole | ObjectKind::ClusterRoleBinding => "rbac.authorization.k8s.io",
            ObjectKind::Elasticsearch | ObjectKind::Kibana | ObjectKind::Fluentd => lograft_core::GROUP,
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            ObjectKind::Elasticsearch | ObjectKind::Kibana | ObjectKind::Fluentd => "v1beta1",
            _ => "v1",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ObjectKind::Secret => "secrets",
            ObjectKind::ConfigMap => "configmaps",
            ObjectKind::Service => "services",
            ObjectKind::ServiceAccount => "serviceaccounts",
            ObjectKind::StatefulSet => "statefulsets",
            ObjectKind::Deployment => "deployments",
            ObjectKind::DaemonSet => "daemonsets",
            ObjectKind::ClusterRole => "clusterroles",
            ObjectKind::ClusterRoleBinding => "clusterrolebindings",
            ObjectKind::Elasticsearch => "elasticsearches",
            ObjectKind::Kibana => "kibanas",
            ObjectKind::Fluentd => "fluentds",
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(self, ObjectKind::ClusterRole | ObjectKind::ClusterRoleBinding)
    }

    /// Workload kinds whose metadata is owned by the platform after creation.
    pub fn is_workload(self) -> bool {
        matches!(self, ObjectKind::StatefulSet | ObjectKind::Deployment | ObjectKind::DaemonSet)
    }

    pub fn api_version(self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }

    pub fn api_resource(self) -> ApiResource {
        ApiResource {
            group: self.group().to_string(),
            version: self.version().to_string(),
            api_version: self.api_version(),
            kind: self.as_str().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {kind} {name}")]
    NotFound { kind: ObjectKind, name: String },
    #[error("already_exists: {kind} {name}")]
    AlreadyExists { kind: ObjectKind, name: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("api {code}: {message}")]
    Api { code: u16, message: String },
    #[error("validation: {0}")]
    Invalid(String),
    #[error("encode: {0}")]
    Encode(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thin get/create/update surface over the orchestration API.
///
/// Objects travel as JSON so the convergence engine can treat every kind uniformly.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> StoreResult<Json>;

    async fn create(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json>;

    /// Full replace; fails with [`StoreError::Conflict`] on a stale `resourceVersion`.
    async fn update(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json>;

    /// Replace only the status subresource, same concurrency rules as `update`.
    async fn replace_status(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json>;
}

/// `metadata.<field>` as a string, if present.
pub fn meta_str<'a>(obj: &'a Json, field: &str) -> Option<&'a str> {
    obj.get("metadata").and_then(|m| m.get(field)).and_then(|v| v.as_str())
}

pub fn name_of(obj: &Json) -> StoreResult<&str> {
    meta_str(obj, "name").ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))
}

pub fn namespace_of(obj: &Json) -> Option<&str> {
    meta_str(obj, "namespace")
}

/// Build a `kube::Client` from the ambient kubeconfig or in-cluster service account.
pub async fn get_kube_client() -> Result<kube::Client, kube::Error> {
    kube::Client::try_default().await
}
