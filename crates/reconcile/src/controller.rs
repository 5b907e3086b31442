//! One kube-runtime controller per declared kind, all sharing a [`Context`].

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use lograft_core::{Elasticsearch, Fluentd, IndexLifecycle, IndexTemplate, Kibana};
use metrics::counter;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::{
    reconcile_fluentd, reconcile_index_lifecycle, reconcile_index_template, reconcile_kibana, Context, Provisioner,
    ReconcileError, ReconcileResult,
};

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

fn started<K: Resource<DynamicType = ()>>(obj: &K) {
    counter!("reconcile_total", 1u64, "kind" => kind_of::<K>());
    info!(kind = %kind_of::<K>(), name = %obj.name_any(), namespace = ?obj.namespace(), "reconciling");
}

async fn elasticsearch(es: Arc<Elasticsearch>, ctx: Arc<Context>) -> ReconcileResult<Action> {
    started(es.as_ref());
    let report = Provisioner::new(&ctx).run(&es).await?;
    Ok(ctx.config.next_action(report.status_conflict))
}

async fn kibana(kb: Arc<Kibana>, ctx: Arc<Context>) -> ReconcileResult<Action> {
    started(kb.as_ref());
    let report = reconcile_kibana(&ctx, &kb).await?;
    Ok(ctx.config.next_action(report.status_conflict))
}

async fn fluentd(fd: Arc<Fluentd>, ctx: Arc<Context>) -> ReconcileResult<Action> {
    started(fd.as_ref());
    let report = reconcile_fluentd(&ctx, &fd).await?;
    Ok(ctx.config.next_action(report.status_conflict))
}

async fn index_template(it: Arc<IndexTemplate>, ctx: Arc<Context>) -> ReconcileResult<Action> {
    started(it.as_ref());
    reconcile_index_template(&ctx, &it).await?;
    Ok(ctx.config.next_action(false))
}

async fn index_lifecycle(il: Arc<IndexLifecycle>, ctx: Arc<Context>) -> ReconcileResult<Action> {
    started(il.as_ref());
    reconcile_index_lifecycle(&ctx, &il).await?;
    Ok(ctx.config.next_action(false))
}

/// Failed passes are retried on the regular interval, never in a tight loop.
pub fn error_policy<K: Resource<DynamicType = ()>>(obj: Arc<K>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    counter!("reconcile_errors_total", 1u64, "kind" => kind_of::<K>(), "error" => err.metric_label());
    warn!(kind = %kind_of::<K>(), name = %obj.name_any(), error = %err, "reconcile failed; requeueing");
    Action::requeue(ctx.config.requeue)
}

fn report<K: Resource<DynamicType = ()>, QueueErr: std::error::Error>(
    res: Result<(ObjectRef<K>, Action), controller::Error<ReconcileError, QueueErr>>,
) {
    match res {
        Ok((obj, _)) => tracing::debug!(kind = %kind_of::<K>(), object = %obj, "reconciled"),
        Err(controller::Error::ObjectNotFound(obj)) => tracing::debug!(object = %obj, "object gone before reconcile"),
        Err(e) => error!(kind = %kind_of::<K>(), error = %e, "controller error"),
    }
}

/// Run every controller until a shutdown signal arrives.
///
/// `namespace` limits the watch to one namespace; `None` watches the whole cluster.
pub async fn run(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let cfg = watcher::Config::default();

    let es = Controller::new(api::<Elasticsearch>(&client, namespace), cfg.clone())
        .owns(api::<StatefulSet>(&client, namespace), cfg.clone())
        .owns(api::<Service>(&client, namespace), cfg.clone())
        .shutdown_on_signal()
        .run(elasticsearch, error_policy, ctx.clone())
        .map(report)
        .boxed();
    let kb = Controller::new(api::<Kibana>(&client, namespace), cfg.clone())
        .owns(api::<Deployment>(&client, namespace), cfg.clone())
        .shutdown_on_signal()
        .run(kibana, error_policy, ctx.clone())
        .map(report)
        .boxed();
    let fd = Controller::new(api::<Fluentd>(&client, namespace), cfg.clone())
        .owns(api::<DaemonSet>(&client, namespace), cfg.clone())
        .shutdown_on_signal()
        .run(fluentd, error_policy, ctx.clone())
        .map(report)
        .boxed();
    let it = Controller::new(api::<IndexTemplate>(&client, namespace), cfg.clone())
        .shutdown_on_signal()
        .run(index_template, error_policy, ctx.clone())
        .map(report)
        .boxed();
    let il = Controller::new(api::<IndexLifecycle>(&client, namespace), cfg)
        .shutdown_on_signal()
        .run(index_lifecycle, error_policy, ctx)
        .map(report)
        .boxed();

    let streams: Vec<BoxStream<'static, ()>> = vec![es, kb, fd, it, il];
    info!(namespace = namespace.unwrap_or("*"), "controllers started");
    stream::select_all(streams).collect::<()>().await;
    info!("controllers terminated");
}
