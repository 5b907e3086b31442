use std::time::Duration;

use metrics::counter;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::{
    policy_path, template_path, token_path, unwrap_named, ClusterApi, ElasticError, ElasticResult, Endpoint,
    HealthReport, ServiceToken,
};

/// [`ClusterApi`] over HTTPS with basic auth.
///
/// Certificate verification is off: clusters serve the bundled self-signed certificate.
#[derive(Clone)]
pub struct HttpClusterApi {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: ServiceToken,
}

impl HttpClusterApi {
    pub fn new(timeout: Duration) -> ElasticResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ElasticError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn request(&self, method: Method, ep: &Endpoint, path: &str) -> RequestBuilder {
        let req = self.client.request(method, ep.url(path));
        match &ep.username {
            Some(user) => req.basic_auth(user, ep.password.as_deref()),
            None => req,
        }
    }

    async fn send(&self, op: &'static str, req: RequestBuilder) -> ElasticResult<Response> {
        counter!("elastic_requests_total", 1u64, "op" => op);
        let result = match req.send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                Err(ElasticError::Status { code, body })
            }
            Err(e) => Err(ElasticError::Transport(e.to_string())),
        };
        if let Err(e) = &result {
            if !e.is_not_found() {
                counter!("elastic_errors_total", 1u64, "op" => op);
            }
            debug!(op, error = %e, "management request failed");
        }
        result
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> ElasticResult<T> {
        resp.json::<T>().await.map_err(|e| ElasticError::Decode(e.to_string()))
    }

    async fn get_named(&self, op: &'static str, ep: &Endpoint, path: &str, name: &str) -> ElasticResult<Option<Json>> {
        match self.send(op, self.request(Method::GET, ep, path)).await {
            Ok(resp) => Ok(unwrap_named(Self::decode::<Json>(resp).await?, name)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_json(&self, op: &'static str, ep: &Endpoint, path: &str, body: &Json) -> ElasticResult<()> {
        self.send(op, self.request(Method::PUT, ep, path).json(body)).await.map(|_| ())
    }

    async fn delete(&self, op: &'static str, ep: &Endpoint, path: &str) -> ElasticResult<()> {
        match self.send(op, self.request(Method::DELETE, ep, path)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for HttpClusterApi {
    async fn cluster_health(&self, ep: &Endpoint) -> ElasticResult<HealthReport> {
        let resp = self.send("cluster_health", self.request(Method::GET, ep, "/_cluster/health")).await?;
        Self::decode(resp).await
    }

    async fn create_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<ServiceToken> {
        let path = token_path(namespace, service, name);
        let resp = self.send("create_service_token", self.request(Method::POST, ep, &path)).await?;
        Ok(Self::decode::<TokenResponse>(resp).await?.token)
    }

    async fn delete_service_token(
        &self,
        ep: &Endpoint,
        namespace: &str,
        service: &str,
        name: &str,
    ) -> ElasticResult<()> {
        self.delete("delete_service_token", ep, &token_path(namespace, service, name)).await
    }

    async fn get_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>> {
        self.get_named("get_index_template", ep, &template_path(name), name).await
    }

    async fn put_index_template(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()> {
        self.put_json("put_index_template", ep, &template_path(name), body).await
    }

    async fn delete_index_template(&self, ep: &Endpoint, name: &str) -> ElasticResult<()> {
        self.delete("delete_index_template", ep, &template_path(name)).await
    }

    async fn get_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<Option<Json>> {
        self.get_named("get_lifecycle_policy", ep, &policy_path(name), name).await
    }

    async fn put_lifecycle_policy(&self, ep: &Endpoint, name: &str, body: &Json) -> ElasticResult<()> {
        self.put_json("put_lifecycle_policy", ep, &policy_path(name), body).await
    }

    async fn delete_lifecycle_policy(&self, ep: &Endpoint, name: &str) -> ElasticResult<()> {
        self.delete("delete_lifecycle_policy", ep, &policy_path(name)).await
    }
}
