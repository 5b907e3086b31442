use kube::ResourceExt;
use lograft_apply::{converge, desired_json, ensure_once, Outcome};
use lograft_builders::{fluentd, kibana};
use lograft_core::{Fluentd, FluentdStatus, Kibana, KibanaStatus};
use lograft_kubehub::ObjectKind;
use tracing::info;

use crate::{write_status, Context, ReconcileError, ReconcileResult};

/// What a single-step reconciler did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackReport {
    pub outcomes: Vec<Outcome>,
    pub status_conflict: bool,
}

fn namespace_for<K: ResourceExt>(obj: &K, kind: &str) -> ReconcileResult<String> {
    obj.namespace().ok_or_else(|| ReconcileError::MissingNamespace(format!("{kind}/{}", obj.name_any())))
}

pub async fn reconcile_kibana(ctx: &Context, kb: &Kibana) -> ReconcileResult<StackReport> {
    let ns = namespace_for(kb, "Kibana")?;
    let store = ctx.store.as_ref();
    let mut report = StackReport::default();

    report.outcomes.push(converge(store, ObjectKind::Deployment, desired_json(&kibana::deployment(kb)?)?).await?);
    report.outcomes.push(converge(store, ObjectKind::Service, desired_json(&kibana::service(kb)?)?).await?);

    let status = KibanaStatus { replicas: Some(kb.spec.replicas), es_version: Some(kb.spec.elastic.es_version.clone()) };
    report.status_conflict =
        write_status(store, ObjectKind::Kibana, desired_json(kb)?, serde_json::to_value(status)?).await?;
    info!(name = %kb.name_any(), namespace = %ns, "dashboard reconciled");
    Ok(report)
}

pub async fn reconcile_fluentd(ctx: &Context, fd: &Fluentd) -> ReconcileResult<StackReport> {
    let ns = namespace_for(fd, "Fluentd")?;
    let name = fd.name_any();
    let store = ctx.store.as_ref();
    let mut report = StackReport::default();

    report.outcomes.push(converge(store, ObjectKind::ConfigMap, desired_json(&fluentd::configmap(fd)?)?).await?);
    report
        .outcomes
        .push(converge(store, ObjectKind::ServiceAccount, desired_json(&fluentd::service_account(fd)?)?).await?);
    let rbac = fluentd::rbac_name(fd)?;
    let role = ensure_once(store, ObjectKind::ClusterRole, &rbac, None, || async move {
        Ok::<_, ReconcileError>(desired_json(&fluentd::cluster_role(fd)?)?)
    })
    .await?;
    report.outcomes.push(role);
    let binding = ensure_once(store, ObjectKind::ClusterRoleBinding, &rbac, None, || async move {
        Ok::<_, ReconcileError>(desired_json(&fluentd::cluster_role_binding(fd)?)?)
    })
    .await?;
    report.outcomes.push(binding);
    report.outcomes.push(converge(store, ObjectKind::DaemonSet, desired_json(&fluentd::daemonset(fd)?)?).await?);

    let scheduled = store.get(ObjectKind::DaemonSet, &name, Some(&ns)).await?;
    let total_agents = scheduled
        .pointer("/status/desiredNumberScheduled")
        .and_then(|v| v.as_i64())
        .and_then(|n| i32::try_from(n).ok());
    let status = FluentdStatus { total_agents };
    report.status_conflict =
        write_status(store, ObjectKind::Fluentd, desired_json(fd)?, serde_json::to_value(status)?).await?;
    info!(name = %name, namespace = %ns, agents = ?total_agents, "shipper reconciled");
    Ok(report)
}
