#![allow(dead_code)]

use std::sync::Arc;

use lograft_elastic::MockCluster;
use lograft_kubehub::{MemoryStore, ObjectKind, StoreCall, StoreOp};
use lograft_reconcile::{Context, ReconcileConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<MockCluster>,
    pub ctx: Context,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(MockCluster::new());
        let ctx = Context::new(store.clone(), cluster.clone(), ReconcileConfig::default());
        Self { store, cluster, ctx }
    }

    /// Store a declaration and hand back what the controller would see.
    pub fn declare<K: Serialize + DeserializeOwned>(&self, kind: ObjectKind, yaml: &str) -> K {
        let declared: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        serde_json::from_value(self.store.insert(kind, declared)).unwrap()
    }

    /// Current stored copy of a declaration, as the next trigger would deliver it.
    pub fn latest<K: DeserializeOwned>(&self, kind: ObjectKind, name: &str) -> K {
        serde_json::from_value(self.store.object(kind, Some("ns"), name).unwrap()).unwrap()
    }

    pub fn stored(&self, kind: ObjectKind, name: &str) -> Option<serde_json::Value> {
        let ns = if kind.namespaced() { Some("ns") } else { None };
        self.store.object(kind, ns, name)
    }

    pub fn writes(&self) -> Vec<(StoreOp, ObjectKind, String)> {
        self.store.writes().into_iter().map(|StoreCall { op, kind, name }| (op, kind, name)).collect()
    }
}

pub fn w(op: StoreOp, kind: ObjectKind, name: &str) -> (StoreOp, ObjectKind, String) {
    (op, kind, name.to_string())
}
