//! lograft reconcile: provisioning state machine, flat reconcilers and controller wiring.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use lograft_builders::BuildError;
use lograft_elastic::{ClusterApi, ElasticError};
use lograft_kubehub::{ObjectKind, ObjectStore, StoreError};
use serde_json::Value as Json;
use tracing::info;

pub mod controller;
mod index;
mod provision;
mod stack;

pub use index::{reconcile_index_lifecycle, reconcile_index_template, RemoteDecision};
pub use provision::{plan, PassReport, ProvisioningStep, Provisioner};
pub use stack::{reconcile_fluentd, reconcile_kibana, StackReport};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Elastic(#[from] ElasticError),
    #[error("encode: {0}")]
    Encode(String),
    #[error("missing_namespace: {0}")]
    MissingNamespace(String),
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> Self {
        ReconcileError::Encode(e.to_string())
    }
}

impl ReconcileError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcileError::Store(StoreError::Conflict(_)) => "store_conflict",
            ReconcileError::Store(StoreError::Transport(_)) => "store_transport",
            ReconcileError::Store(_) => "store",
            ReconcileError::Build(_) => "build",
            ReconcileError::Elastic(_) => "elastic",
            ReconcileError::Encode(_) => "encode",
            ReconcileError::MissingNamespace(_) => "missing_namespace",
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Delay before the next pass of a healthy declaration, and after a failed one.
    pub requeue: Duration,
    /// Delay after losing a status write race.
    pub conflict_requeue: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { requeue: Duration::from_secs(10), conflict_requeue: Duration::from_secs(1) }
    }
}

impl ReconcileConfig {
    pub fn next_action(&self, status_conflict: bool) -> Action {
        Action::requeue(if status_conflict { self.conflict_requeue } else { self.requeue })
    }
}

/// Collaborators shared by every reconciler.
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub cluster: Arc<dyn ClusterApi>,
    pub config: ReconcileConfig,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, cluster: Arc<dyn ClusterApi>, config: ReconcileConfig) -> Self {
        Self { store, cluster, config }
    }
}

/// Write `status` onto `declared` through the status subresource.
///
/// Returns `true` when the write lost an optimistic-concurrency race; that is a signal
/// to run the pass again soon, not a failure.
pub(crate) async fn write_status(
    store: &dyn ObjectStore,
    kind: ObjectKind,
    mut declared: Json,
    status: Json,
) -> ReconcileResult<bool> {
    if let Some(root) = declared.as_object_mut() {
        root.insert("status".into(), status);
    }
    match store.replace_status(kind, &declared).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_conflict() => {
            info!(kind = %kind, error = %e, "status write conflicted; requeueing");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}
