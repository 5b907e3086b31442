//! lograft apply: diff-and-converge over JSON objects.
//!
//! Every generated object goes through [`converge`] (create, skip or update) or, for
//! create-once kinds such as credentials, [`ensure_once`]. Decisions use a structural
//! containment test plus the last-applied annotation for removed fields; stored-only
//! fields are server defaults and never count as divergence.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Instant;

use lograft_kubehub::{name_of, namespace_of, ObjectKind, ObjectStore, StoreError, StoreResult};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

mod quantity;

/// Annotation holding the desired object as last written by us.
pub const LAST_APPLIED: &str = "logging.lograft.io/last-applied";

/// Metadata fields owned by the platform.
const PLATFORM_META: [&str; 6] = ["resourceVersion", "uid", "creationTimestamp", "generation", "managedFields", "selfLink"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchDecision {
    Create,
    Skip,
    Update,
}

impl PatchDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchDecision::Create => "create",
            PatchDecision::Skip => "skip",
            PatchDecision::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: ObjectKind,
    pub name: String,
    pub decision: PatchDecision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Serialize a typed object into the JSON form the store speaks.
pub fn desired_json<T: Serialize>(obj: &T) -> StoreResult<Json> {
    Ok(serde_json::to_value(obj)?)
}

/// Copy of `v` without the fields that never take part in a comparison.
pub fn comparable(kind: ObjectKind, mut v: Json) -> Json {
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
        obj.remove("kind");
        obj.remove("apiVersion");
        if kind.is_workload() {
            obj.remove("metadata");
        }
    }
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for f in PLATFORM_META {
            meta.remove(f);
        }
        if let Some(ann) = meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            ann.remove(LAST_APPLIED);
        }
    }
    match kind {
        ObjectKind::StatefulSet => {
            if let Some(pvcs) = v.pointer_mut("/spec/volumeClaimTemplates").and_then(|p| p.as_array_mut()) {
                for pvc in pvcs.iter_mut().filter_map(|p| p.as_object_mut()) {
                    pvc.remove("status");
                    pvc.remove("kind");
                    pvc.remove("apiVersion");
                    if let Some(meta) = pvc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                        meta.remove("creationTimestamp");
                    }
                    if let Some(spec) = pvc.get_mut("spec").and_then(|s| s.as_object_mut()) {
                        spec.remove("volumeName");
                        spec.remove("volumeMode");
                    }
                }
            }
        }
        ObjectKind::Service => {
            if let Some(spec) = v.get_mut("spec").and_then(|s| s.as_object_mut()) {
                spec.remove("clusterIP");
                spec.remove("clusterIPs");
                spec.remove("ipFamilies");
            }
        }
        _ => {}
    }
    quantity::canonicalize_resources(&mut v);
    v
}

/// Zero values the API server drops on the way in (`omitempty`).
fn is_zero(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Bool(b) => !b,
        Json::String(s) => s.is_empty(),
        Json::Array(a) => a.is_empty(),
        Json::Object(o) => o.is_empty(),
        Json::Number(n) => n.as_f64() == Some(0.0),
    }
}

/// Structural containment: every field set in `desired` is present and equal in `stored`.
///
/// Arrays compare element-wise and must have the same length. Zero values in `desired`
/// match an absent field.
pub fn contains(stored: &Json, desired: &Json) -> bool {
    match (desired, stored) {
        (Json::Object(d), Json::Object(s)) => d.iter().all(|(k, dv)| match s.get(k) {
            Some(sv) => contains(sv, dv),
            None => is_zero(dv),
        }),
        (Json::Array(d), Json::Array(s)) => d.len() == s.len() && d.iter().zip(s.iter()).all(|(dv, sv)| contains(sv, dv)),
        (d, Json::Null) => is_zero(d),
        (Json::Null, _) => true,
        (d, s) => d == s,
    }
}

/// True when a field we wrote last time is gone from `desired` but still stored.
fn removed_fields(last: &Json, desired: &Json, stored: &Json) -> bool {
    match (last, desired, stored) {
        (Json::Object(l), Json::Object(d), Json::Object(s)) => l.iter().any(|(k, lv)| match (d.get(k), s.get(k)) {
            (None, Some(sv)) => !is_zero(sv),
            (Some(dv), Some(sv)) => removed_fields(lv, dv, sv),
            _ => false,
        }),
        _ => false,
    }
}

fn last_applied(stored: &Json) -> Option<Json> {
    let raw = stored.pointer("/metadata/annotations")?.get(LAST_APPLIED)?.as_str()?;
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "unreadable last-applied annotation; ignoring");
            None
        }
    }
}

pub fn decide(kind: ObjectKind, desired: &Json, stored: Option<&Json>) -> PatchDecision {
    let Some(stored) = stored else { return PatchDecision::Create };
    let d = comparable(kind, desired.clone());
    let s = comparable(kind, stored.clone());
    if !contains(&s, &d) {
        return PatchDecision::Update;
    }
    let dropped = last_applied(stored).is_some_and(|last| removed_fields(&comparable(kind, last), &d, &s));
    if dropped {
        PatchDecision::Update
    } else {
        PatchDecision::Skip
    }
}

fn annotations_mut(obj: &mut Json) -> Option<&mut Map<String, Json>> {
    let meta = obj.as_object_mut()?.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
    let ann = meta.as_object_mut()?.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
    ann.as_object_mut()
}

fn with_last_applied(desired: &Json) -> StoreResult<Json> {
    let snapshot = serde_json::to_string(desired)?;
    let mut out = desired.clone();
    let ann = annotations_mut(&mut out).ok_or_else(|| StoreError::Invalid("object is not a JSON map".into()))?;
    ann.insert(LAST_APPLIED.to_string(), Json::String(snapshot));
    Ok(out)
}

/// Object to send for a create.
pub fn prepare_create(desired: &Json) -> StoreResult<Json> {
    with_last_applied(desired)
}

/// Object to send for an update: desired plus carried platform fields and foreign annotations.
pub fn prepare_update(kind: ObjectKind, desired: &Json, stored: &Json) -> StoreResult<Json> {
    let mut next = with_last_applied(desired)?;
    if let (Some(meta), Some(stored_meta)) = (
        next.get_mut("metadata").and_then(|m| m.as_object_mut()),
        stored.get("metadata").and_then(|m| m.as_object()),
    ) {
        for f in ["resourceVersion", "creationTimestamp", "managedFields", "uid"] {
            if let Some(v) = stored_meta.get(f) {
                meta.insert(f.to_string(), v.clone());
            }
        }
    }
    if let Some(stored_ann) = stored.pointer("/metadata/annotations").and_then(|a| a.as_object()) {
        if let Some(ann) = annotations_mut(&mut next) {
            for (k, v) in stored_ann {
                if !ann.contains_key(k) {
                    ann.insert(k.clone(), v.clone());
                }
            }
        }
    }
    if kind == ObjectKind::Service {
        if let Some(spec) = next.get_mut("spec").and_then(|s| s.as_object_mut()) {
            for f in ["clusterIP", "clusterIPs"] {
                if let Some(v) = stored.pointer(&format!("/spec/{}", f)) {
                    spec.insert(f.to_string(), v.clone());
                }
            }
        }
    }
    Ok(next)
}

/// Create `desired` when absent, update it when it diverges, otherwise do nothing.
///
/// Store errors other than "not found" on the initial read are returned unchanged.
pub async fn converge(store: &dyn ObjectStore, kind: ObjectKind, desired: Json) -> StoreResult<Outcome> {
    let t0 = Instant::now();
    let res = converge_inner(store, kind, &desired).await;
    histogram!("converge_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "kind" => kind.as_str());
    match &res {
        Ok(out) => counter!("converge_total", 1u64, "kind" => kind.as_str(), "decision" => out.decision.as_str()),
        Err(e) => {
            counter!("converge_errors_total", 1u64, "kind" => kind.as_str());
            warn!(kind = %kind, error = %e, "converge failed");
        }
    }
    res
}

async fn converge_inner(store: &dyn ObjectStore, kind: ObjectKind, desired: &Json) -> StoreResult<Outcome> {
    let name = name_of(desired)?.to_string();
    let namespace = namespace_of(desired);
    let stored = match store.get(kind, &name, namespace).await {
        Ok(obj) => Some(obj),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let decision = decide(kind, desired, stored.as_ref());
    match (&decision, stored.as_ref()) {
        (PatchDecision::Create, _) => {
            store.create(kind, &prepare_create(desired)?).await?;
            info!(kind = %kind, name = %name, "created");
        }
        (PatchDecision::Update, Some(stored)) => {
            let summary = diff_summary(&comparable(kind, desired.clone()), &comparable(kind, stored.clone()));
            info!(kind = %kind, name = %name, adds = summary.adds, updates = summary.updates, removes = summary.removes, "changes detected, updating");
            store.update(kind, &prepare_update(kind, desired, stored)?).await?;
        }
        _ => debug!(kind = %kind, name = %name, "in sync"),
    }
    Ok(Outcome { kind, name, decision })
}

/// Create-once path: probe for existence and build/create only when absent. Never updates.
pub async fn ensure_once<F, Fut, E>(
    store: &dyn ObjectStore,
    kind: ObjectKind,
    name: &str,
    namespace: Option<&str>,
    build: F,
) -> Result<Outcome, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Json, E>>,
    E: From<StoreError>,
{
    let skip = Outcome { kind, name: name.to_string(), decision: PatchDecision::Skip };
    match store.get(kind, name, namespace).await {
        Ok(_) => {
            debug!(kind = %kind, name = %name, "exists; create-only object left untouched");
            counter!("converge_total", 1u64, "kind" => kind.as_str(), "decision" => "skip");
            return Ok(skip);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    let desired = build().await?;
    match store.create(kind, &prepare_create(&desired)?).await {
        Ok(_) => {
            info!(kind = %kind, name = %name, "created");
            counter!("converge_total", 1u64, "kind" => kind.as_str(), "decision" => "create");
            Ok(Outcome { kind, name: name.to_string(), decision: PatchDecision::Create })
        }
        Err(StoreError::AlreadyExists { .. }) => Ok(skip),
        Err(e) => Err(e.into()),
    }
}

/// Count added, changed and removed leaves between two objects.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                let min_len = aa.len().min(bb.len());
                s.updates += (0..min_len).filter(|&i| aa[i] != bb[i]).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
