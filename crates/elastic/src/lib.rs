//! lograft elastic: management API client for the search cluster.

#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::{Map, Value as Json};

mod http;
mod mock;

pub use http::HttpClusterApi;
pub use mock::{MockCall, MockCluster};

/// Service-account namespace that owns every integration token.
pub const SERVICE_ACCOUNT_NAMESPACE: &str = "elastic";

/// Where and how to reach one cluster's management API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `base_url` joined with `path`, tolerating a trailing slash on the base.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub active_shards: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceToken {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElasticError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
}

impl ElasticError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ElasticError::Status { code: 404, .. })
    }

    /// The entry already exists (service tokens cannot be re-issued under the same name).
    pub fn is_conflict(&self) -> bool {
        matches!(self, ElasticError::Status { code: 409, .. })
    }
}

pub type ElasticResult<T> = Result<T, ElasticError>;

/// Request/response surface of the cluster's administrative endpoint.
///
/// `get_*` calls return the stored body with the name wrapper removed, or `None` when
/// the cluster has no such entry. `delete_*` calls treat a missing entry as success.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    async fn cluster_health(&self, ep: &Endpoint) -> ElasticResult<HealthReport>;

    async fn create_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<ServiceToken>;

    async fn delete_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<()>;

    async fn get_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>>;

    async fn put_index_template(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()>;

    async fn delete_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<()>;

    async fn get_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>>;

    async fn put_lifecycle_policy(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()>;

    async fn delete_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<()>;
}

pub fn template_path(name: &str) -> String {
    format!("/_template/{name}")
}

pub fn policy_path(name: &str) -> String {
    format!("/_ilm/policy/{name}")
}

pub fn token_path(namespace: &str, service: &str, name: &str) -> String {
    format!("/_security/service/{namespace}/{service}/credential/token/{name}")
}

/// GET responses are keyed by entry name; return the inner body.
pub fn unwrap_named(mut response: Json, name: &str) -> Option<Json> {
    response.as_object_mut().and_then(|m| m.remove(name))
}

/// Rewrite `settings` as flat dotted keys with string values.
///
/// The cluster echoes settings nested and stringified (`{"index":{"number_of_shards":"2"}}`)
/// while requests use `{"index.number_of_shards": 2}`; both sides go through this before
/// comparison.
pub fn flatten_settings(mut body: Json) -> Json {
    if let Some(settings) = body.get_mut("settings") {
        let mut flat = Map::new();
        flatten_into(&mut flat, String::new(), settings);
        *settings = Json::Object(flat);
    }
    body
}

fn flatten_into(out: &mut Map<String, Json>, prefix: String, value: &Json) {
    match value {
        Json::Object(m) => {
            for (k, v) in m {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_into(out, key, v);
            }
        }
        Json::String(s) => {
            out.insert(prefix, Json::String(s.clone()));
        }
        Json::Null => {}
        other => {
            out.insert(prefix, Json::String(other.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_flatten_the_same_from_both_directions() {
        let sent = json!({ "index_patterns": ["a-*"], "settings": { "index.number_of_shards": 2, "index.lifecycle.name": "p" } });
        let echoed = json!({
            "order": 0,
            "index_patterns": ["a-*"],
            "settings": { "index": { "number_of_shards": "2", "lifecycle": { "name": "p" } } },
            "mappings": {},
        });
        assert_eq!(flatten_settings(sent)["settings"], flatten_settings(echoed)["settings"]);
    }

    #[test]
    fn unwrap_named_picks_the_entry() {
        let resp = json!({ "weekly": { "version": 3, "policy": {} } });
        assert_eq!(unwrap_named(resp.clone(), "weekly").unwrap()["version"], 3);
        assert!(unwrap_named(resp, "daily").is_none());
    }

    #[test]
    fn endpoint_urls_join_cleanly() {
        let ep = Endpoint::new("https://logs-master.ns:9200/");
        assert_eq!(ep.url("/_cluster/health"), "https://logs-master.ns:9200/_cluster/health");
        assert_eq!(
            token_path("elastic", "kibana", "token-sa"),
            "/_security/service/elastic/kibana/credential/token/token-sa"
        );
    }

    #[test]
    fn only_404_is_not_found() {
        assert!(ElasticError::Status { code: 404, body: String::new() }.is_not_found());
        assert!(!ElasticError::Status { code: 500, body: String::new() }.is_not_found());
        assert!(!ElasticError::Transport("refused".into()).is_not_found());
        assert!(ElasticError::Status { code: 409, body: String::new() }.is_conflict());
        assert!(!ElasticError::Status { code: 404, body: String::new() }.is_conflict());
    }
}
