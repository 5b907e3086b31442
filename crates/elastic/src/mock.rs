use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as Json;

use crate::{ClusterApi, ElasticError, ElasticResult, Endpoint, HealthReport, ServiceToken};

/// One recorded call against a [`MockCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: &'static str,
    pub url: String,
    pub target: String,
}

struct Inner {
    health: ElasticResult<HealthReport>,
    token: ElasticResult<String>,
    tokens: BTreeSet<String>,
    templates: BTreeMap<String, Json>,
    policies: BTreeMap<String, Json>,
    calls: Vec<MockCall>,
}

/// Scripted in-process [`ClusterApi`].
///
/// Health starts out unreachable until [`MockCluster::set_health`] is called. Templates
/// and policies are kept exactly as they were put. Service tokens are tracked by
/// `namespace/service/name`; issuing one that exists answers 409 like the real cluster.
pub struct MockCluster {
    inner: Mutex<Inner>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                health: Err(ElasticError::Transport("connection refused".into())),
                token: Ok("mock-token".into()),
                tokens: BTreeSet::new(),
                templates: BTreeMap::new(),
                policies: BTreeMap::new(),
                calls: Vec::new(),
            }),
        }
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_health(&self, status: &str, active_shards: i64) {
        self.lock().health = Ok(HealthReport { status: status.to_string(), active_shards });
    }

    pub fn fail_health(&self, err: ElasticError) {
        self.lock().health = Err(err);
    }

    pub fn set_token(&self, result: ElasticResult<String>) {
        self.lock().token = result;
    }

    /// Mark a service token as already issued.
    pub fn insert_token(&self, namespace: &str, service: &str, name: &str) {
        self.lock().tokens.insert(format!("{namespace}/{service}/{name}"));
    }

    pub fn has_token(&self, namespace: &str, service: &str, name: &str) -> bool {
        self.lock().tokens.contains(&format!("{namespace}/{service}/{name}"))
    }

    pub fn insert_template(&self, name: &str, body: Json) {
        self.lock().templates.insert(name.to_string(), body);
    }

    pub fn template(&self, name: &str) -> Option<Json> {
        self.lock().templates.get(name).cloned()
    }

    pub fn insert_policy(&self, name: &str, body: Json) {
        self.lock().policies.insert(name.to_string(), body);
    }

    pub fn policy(&self, name: &str) -> Option<Json> {
        self.lock().policies.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(|c| c.op).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, op: &'static str, ep: &Endpoint, target: &str) -> MutexGuard<'_, Inner> {
        let mut inner = self.lock();
        inner.calls.push(MockCall { op, url: ep.base_url.clone(), target: target.to_string() });
        inner
    }
}

#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn cluster_health(&self, ep: &Endpoint) -> ElasticResult<HealthReport> {
        self.record("cluster_health", ep, "").health.clone()
    }

    async fn create_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<ServiceToken> {
        let target = format!("{namespace}/{service}/{name}");
        let mut inner = self.record("create_service_token", ep, &target);
        let value = inner.token.clone()?;
        if !inner.tokens.insert(target) {
            return Err(ElasticError::Status { code: 409, body: "version_conflict_engine_exception".into() });
        }
        Ok(ServiceToken { name: name.to_string(), value })
    }

    async fn delete_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<()> {
        let target = format!("{namespace}/{service}/{name}");
        self.record("delete_service_token", ep, &target).tokens.remove(&target);
        Ok(())
    }

    async fn get_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>> {
        Ok(self.record("get_index_template", ep, name).templates.get(name).cloned())
    }

    async fn put_index_template(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()> {
        self.record("put_index_template", ep, name).templates.insert(name.to_string(), body.clone());
        Ok(())
    }

    async fn delete_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<()> {
        self.record("delete_index_template", ep, name).templates.remove(name);
        Ok(())
    }

    async fn get_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>> {
        Ok(self.record("get_lifecycle_policy", ep, name).policies.get(name).cloned())
    }

    async fn put_lifecycle_policy(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()> {
        self.record("put_lifecycle_policy", ep, name).policies.insert(name.to_string(), body.clone());
        Ok(())
    }

    async fn delete_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<()> {
        self.record("delete_lifecycle_policy", ep, name).policies.remove(name);
        Ok(())
    }
}
