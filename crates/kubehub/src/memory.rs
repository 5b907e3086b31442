use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value as Json};

use crate::{meta_str, name_of, namespace_of, ObjectKind, ObjectStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    UpdateStatus,
}

/// One recorded call against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub kind: ObjectKind,
    pub name: String,
}

type Key = (ObjectKind, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Json>,
    calls: Vec<StoreCall>,
    failures: VecDeque<(StoreOp, ObjectKind, StoreError)>,
    next_rv: u64,
    next_ip: u32,
}

/// In-memory [`ObjectStore`] mimicking the API server's bookkeeping.
///
/// Stamps `resourceVersion`, `uid`, `creationTimestamp`, Service cluster IPs and a few
/// server-side defaults, enforces optimistic concurrency and records every call.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key(kind: ObjectKind, namespace: Option<&str>, name: &str) -> Key {
    let ns = if kind.namespaced() { namespace.unwrap_or_default().to_string() } else { String::new() };
    (kind, ns, name.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as if it had been created out of band; not recorded as a call.
    pub fn insert(&self, kind: ObjectKind, obj: Json) -> Json {
        let mut inner = self.lock();
        let namespace = namespace_of(&obj).map(str::to_string);
        let name = meta_str(&obj, "name").unwrap_or_default().to_string();
        let stored = inner.stamp_new(kind, obj);
        inner.objects.insert(key(kind, namespace.as_deref(), &name), stored.clone());
        stored
    }

    /// Apply an out-of-band change; bumps `resourceVersion` like a foreign writer would.
    pub fn mutate(&self, kind: ObjectKind, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut Json)) -> bool {
        let mut inner = self.lock();
        let rv = inner.bump_rv();
        match inner.objects.get_mut(&key(kind, namespace, name)) {
            Some(obj) => {
                f(obj);
                set_meta(obj, "resourceVersion", Json::String(rv));
                true
            }
            None => false,
        }
    }

    pub fn object(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Option<Json> {
        self.lock().objects.get(&key(kind, namespace, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `op` on `kind` fail with `err`.
    pub fn fail_next(&self, op: StoreOp, kind: ObjectKind, err: StoreError) {
        self.lock().failures.push_back((op, kind, err));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Calls that changed state (create, update, status update).
    pub fn writes(&self) -> Vec<StoreCall> {
        self.lock().calls.iter().filter(|c| c.op != StoreOp::Get).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Inner {
    fn record(&mut self, op: StoreOp, kind: ObjectKind, name: &str) -> StoreResult<()> {
        self.calls.push(StoreCall { op, kind, name: name.to_string() });
        if let Some(pos) = self.failures.iter().position(|(o, k, _)| *o == op && *k == kind) {
            if let Some((_, _, err)) = self.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn bump_rv(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }

    fn stamp_new(&mut self, kind: ObjectKind, mut obj: Json) -> Json {
        let rv = self.bump_rv();
        set_meta(&mut obj, "resourceVersion", Json::String(rv));
        set_meta(&mut obj, "uid", Json::String(uuid::Uuid::new_v4().to_string()));
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        set_meta(&mut obj, "creationTimestamp", Json::String(ts));
        if kind == ObjectKind::Service {
            let has_ip = obj.pointer("/spec/clusterIP").and_then(|v| v.as_str()).map(|s| !s.is_empty()).unwrap_or(false);
            if !has_ip {
                self.next_ip += 1;
                let ip = format!("10.96.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1);
                if let Some(spec) = obj.get_mut("spec").and_then(|s| s.as_object_mut()) {
                    spec.insert("clusterIP".into(), Json::String(ip.clone()));
                    spec.insert("clusterIPs".into(), json!([ip]));
                }
            }
        }
        apply_server_defaults(kind, &mut obj);
        obj
    }
}

fn set_meta(obj: &mut Json, field: &str, value: Json) {
    if let Some(root) = obj.as_object_mut() {
        let meta = root.entry("metadata").or_insert_with(|| json!({}));
        if let Some(m) = meta.as_object_mut() {
            m.insert(field.to_string(), value);
        }
    }
}

/// A few defaults the real API server fills in, so diffs see stored-only fields.
fn apply_server_defaults(kind: ObjectKind, obj: &mut Json) {
    let Some(spec) = obj.get_mut("spec").and_then(|s| s.as_object_mut()) else { return };
    match kind {
        ObjectKind::Service => {
            spec.entry("type").or_insert_with(|| json!("ClusterIP"));
            spec.entry("sessionAffinity").or_insert_with(|| json!("None"));
            if let Some(ports) = spec.get_mut("ports").and_then(|p| p.as_array_mut()) {
                for p in ports.iter_mut().filter_map(|p| p.as_object_mut()) {
                    p.entry("protocol").or_insert_with(|| json!("TCP"));
                }
            }
        }
        ObjectKind::StatefulSet | ObjectKind::Deployment | ObjectKind::DaemonSet => {
            spec.entry("revisionHistoryLimit").or_insert_with(|| json!(10));
        }
        _ => {}
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: ObjectKind, name: &str, namespace: Option<&str>) -> StoreResult<Json> {
        let mut inner = self.lock();
        inner.record(StoreOp::Get, kind, name)?;
        inner
            .objects
            .get(&key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound { kind, name: name.to_string() })
    }

    async fn create(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let name = name_of(obj)?.to_string();
        let k = key(kind, namespace_of(obj), &name);
        let mut inner = self.lock();
        inner.record(StoreOp::Create, kind, &name)?;
        if inner.objects.contains_key(&k) {
            return Err(StoreError::AlreadyExists { kind, name });
        }
        let stored = inner.stamp_new(kind, obj.clone());
        inner.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let name = name_of(obj)?.to_string();
        let k = key(kind, namespace_of(obj), &name);
        let mut inner = self.lock();
        inner.record(StoreOp::Update, kind, &name)?;
        let current = inner.objects.get(&k).cloned().ok_or_else(|| StoreError::NotFound { kind, name: name.clone() })?;
        check_version(obj, &current)?;
        let mut next = obj.clone();
        for field in ["uid", "creationTimestamp"] {
            if let Some(v) = current.get("metadata").and_then(|m| m.get(field)) {
                set_meta(&mut next, field, v.clone());
            }
        }
        if let Some(root) = next.as_object_mut() {
            match current.get("status") {
                Some(status) => root.insert("status".into(), status.clone()),
                None => root.remove("status"),
            };
        }
        apply_server_defaults(kind, &mut next);
        let rv = inner.bump_rv();
        set_meta(&mut next, "resourceVersion", Json::String(rv));
        inner.objects.insert(k, next.clone());
        Ok(next)
    }

    async fn replace_status(&self, kind: ObjectKind, obj: &Json) -> StoreResult<Json> {
        let name = name_of(obj)?.to_string();
        let k = key(kind, namespace_of(obj), &name);
        let mut inner = self.lock();
        inner.record(StoreOp::UpdateStatus, kind, &name)?;
        let mut current = inner.objects.get(&k).cloned().ok_or_else(|| StoreError::NotFound { kind, name: name.clone() })?;
        check_version(obj, &current)?;
        if let Some(root) = current.as_object_mut() {
            root.insert("status".into(), obj.get("status").cloned().unwrap_or(Json::Null));
        }
        let rv = inner.bump_rv();
        set_meta(&mut current, "resourceVersion", Json::String(rv));
        inner.objects.insert(k, current.clone());
        Ok(current)
    }
}

fn check_version(incoming: &Json, current: &Json) -> StoreResult<()> {
    match (meta_str(incoming, "resourceVersion"), meta_str(current, "resourceVersion")) {
        (Some(want), Some(have)) if want != have => Err(StoreError::Conflict(format!(
            "the object has been modified; resourceVersion {} is stale (current {})",
            want, have
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str) -> Json {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name, "namespace": "ns"},
            "spec": {"ports": [{"name": "http", "port": 9200}]}
        })
    }

    #[tokio::test]
    async fn create_stamps_platform_fields() {
        let store = MemoryStore::new();
        let out = store.create(ObjectKind::Service, &svc("a")).await.unwrap();
        assert!(meta_str(&out, "resourceVersion").is_some());
        assert!(meta_str(&out, "uid").is_some());
        assert!(out.pointer("/spec/clusterIP").and_then(|v| v.as_str()).is_some());
        assert_eq!(out.pointer("/spec/ports/0/protocol"), Some(&json!("TCP")));
        let again = store.create(ObjectKind::Service, &svc("a")).await.unwrap_err();
        assert!(matches!(again, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn headless_services_keep_none() {
        let store = MemoryStore::new();
        let mut s = svc("h");
        s["spec"]["clusterIP"] = json!("None");
        let out = store.create(ObjectKind::Service, &s).await.unwrap();
        assert_eq!(out.pointer("/spec/clusterIP"), Some(&json!("None")));
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(ObjectKind::Service, &svc("a")).await.unwrap();
        assert!(store.mutate(ObjectKind::Service, Some("ns"), "a", |o| o["spec"]["ports"][0]["port"] = json!(1)));
        let err = store.update(ObjectKind::Service, &created).await.unwrap_err();
        assert!(err.is_conflict());
        let err = store.replace_status(ObjectKind::Service, &created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Get, ObjectKind::Secret, StoreError::Transport("boom".into()));
        let first = store.get(ObjectKind::Secret, "x", Some("ns")).await.unwrap_err();
        assert_eq!(first, StoreError::Transport("boom".into()));
        let second = store.get(ObjectKind::Secret, "x", Some("ns")).await.unwrap_err();
        assert!(second.is_not_found());
        assert_eq!(store.calls().len(), 2);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn update_preserves_status_and_identity() {
        let store = MemoryStore::new();
        let created = store.create(ObjectKind::Service, &svc("a")).await.unwrap();
        let uid = meta_str(&created, "uid").map(str::to_string);
        let mut next = created.clone();
        next["status"] = json!({"bogus": true});
        next["spec"]["ports"][0]["port"] = json!(9201);
        let updated = store.update(ObjectKind::Service, &next).await.unwrap();
        assert_eq!(meta_str(&updated, "uid").map(str::to_string), uid);
        assert!(updated.get("status").is_none());
        assert_ne!(meta_str(&updated, "resourceVersion"), meta_str(&created, "resourceVersion"));
    }
}
