use std::time::Instant;

use kube::{
    api::{Api, PostParams},
    core::DynamicObject,
    Client,
};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::debug;

use crate::{name_of, namespace_of, ObjectKind, ObjectStore, StoreError, StoreResult};

/// [`ObjectStore`] backed by the live API server through `Api<DynamicObject>`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ObjectKind, namespace: Option<&str>) -> StoreResult<Api<DynamicObject>> {
        let ar = kind.api_resource();
        if !kind.namespaced() {
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        match namespace {
            Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
            None => Err(StoreError::Invalid(format!("namespace required for namespaced kind {}", kind))),
        }
    }
}

fn map_kube_err(kind: ObjectKind, name: &str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound { kind, name: name.to_string() },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind, name: name.to_string() }
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message),
        kube::Error::Api(resp) => StoreError::Api { code: resp.code, message: resp.message },
        other => StoreError::Transport(other.to_string()),
    }
}

fn observe(op: &'static str, kind: ObjectKind, t0: Instant, ok: bool) {
    counter!("store_requests_total", 1u64, "op" => op, "kind" => kind.as_str());
    if !ok {
        counter!("store_errors_total", 1u64, "op" => op, "kind" => kind.as_str());
    }
    histogram!("store_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> StoreResult<Json> {
        let t0 = Instant::now();
        let api = self.api(kind, namespace)?;
        let res = api.get(name).await;
        observe("get", kind, t0, res.is_ok() || matches!(&res, Err(kube::Error::Api(r)) if r.code == 404));
        let obj = res.map_err(|e| map_kube_err(kind, name, e))?;
        debug!(kind = %kind, name = %name, "store get ok");
        Ok(serde_json::to_value(&obj)?)
    }

    async fn create(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let t0 = Instant::now();
        let name = name_of(obj)?;
        let api = self.api(kind, namespace_of(obj))?;
        let body: DynamicObject = serde_json::from_value(obj.clone())?;
        let res = api.create(&PostParams::default(), &body).await;
        observe("create", kind, t0, res.is_ok());
        let created = res.map_err(|e| map_kube_err(kind, name, e))?;
        Ok(serde_json::to_value(&created)?)
    }

    async fn update(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let t0 = Instant::now();
        let name = name_of(obj)?;
        let api = self.api(kind, namespace_of(obj))?;
        let body: DynamicObject = serde_json::from_value(obj.clone())?;
        let res = api.replace(name, &PostParams::default(), &body).await;
        observe("update", kind, t0, res.is_ok());
        let updated = res.map_err(|e| map_kube_err(kind, name, e))?;
        Ok(serde_json::to_value(&updated)?)
    }

    async fn replace_status(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let t0 = Instant::now();
        let name = name_of(obj)?;
        let api = self.api(kind, namespace_of(obj))?;
        let res = api.replace_status(name, &PostParams::default(), serde_json::to_vec(obj)?).await;
        observe("replace_status", kind, t0, res.is_ok());
        let updated = res.map_err(|e| map_kube_err(kind, name, e))?;
        Ok(serde_json::to_value(&updated)?)
    }
}
