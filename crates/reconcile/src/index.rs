//! Index templates and lifecycle policies live inside the search cluster, not the
//! object store, so they are diffed against the management API directly.

use kube::ResourceExt;
use lograft_apply::contains;
use lograft_builders::index::{index_template_body, lifecycle_policy_body};
use lograft_core::{IndexLifecycle, IndexTemplate, ManagementEndpoint};
use lograft_elastic::{flatten_settings, Endpoint};
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::{Context, ReconcileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDecision {
    Create,
    Update,
    Skip,
    Delete,
}

impl RemoteDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteDecision::Create => "create",
            RemoteDecision::Update => "update",
            RemoteDecision::Skip => "skip",
            RemoteDecision::Delete => "delete",
        }
    }
}

fn endpoint(m: &ManagementEndpoint) -> Endpoint {
    Endpoint { base_url: m.host.clone(), username: m.username.clone(), password: m.password.clone() }
}

fn decide(stored: Option<&Json>, desired: &Json) -> RemoteDecision {
    match stored {
        None => RemoteDecision::Create,
        Some(s) if contains(s, desired) => RemoteDecision::Skip,
        Some(_) => RemoteDecision::Update,
    }
}

fn record(kind: &'static str, name: &str, decision: RemoteDecision) {
    counter!("converge_total", 1u64, "kind" => kind, "decision" => decision.as_str());
    match decision {
        RemoteDecision::Skip => debug!(kind, name = %name, "in sync"),
        _ => info!(kind, name = %name, decision = decision.as_str(), "index management applied"),
    }
}

pub async fn reconcile_index_template(ctx: &Context, it: &IndexTemplate) -> ReconcileResult<RemoteDecision> {
    let name = it.name_any();
    let ep = endpoint(&it.spec.elasticsearch);
    let decision = if it.spec.enabled {
        let desired = index_template_body(&it.spec);
        let stored = ctx.cluster.get_index_template(&ep, &name).await?;
        let decision = decide(stored.map(flatten_settings).as_ref(), &flatten_settings(desired.clone()));
        if decision != RemoteDecision::Skip {
            ctx.cluster.put_index_template(&ep, &name, &desired).await?;
        }
        decision
    } else {
        ctx.cluster.delete_index_template(&ep, &name).await?;
        RemoteDecision::Delete
    };
    record("IndexTemplate", &name, decision);
    Ok(decision)
}

pub async fn reconcile_index_lifecycle(ctx: &Context, il: &IndexLifecycle) -> ReconcileResult<RemoteDecision> {
    let name = il.name_any();
    let ep = endpoint(&il.spec.elasticsearch);
    let decision = if il.spec.enabled {
        let desired = lifecycle_policy_body(&il.spec);
        let stored = ctx.cluster.get_lifecycle_policy(&ep, &name).await?;
        let decision = decide(stored.as_ref(), &desired);
        if decision != RemoteDecision::Skip {
            ctx.cluster.put_lifecycle_policy(&ep, &name, &desired).await?;
        }
        decision
    } else {
        ctx.cluster.delete_lifecycle_policy(&ep, &name).await?;
        RemoteDecision::Delete
    };
    record("IndexLifecycle", &name, decision);
    Ok(decision)
}
