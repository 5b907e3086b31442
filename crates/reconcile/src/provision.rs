//! Ordered bootstrap of one search cluster.
//!
//! A pass walks the steps from [`plan`] in order and stops at the first store error.
//! Management API failures never stop a pass: the status write still runs. Every step
//! is idempotent against the store, so a failed pass is simply re-run from the top.

use base64::Engine;
use kube::ResourceExt;
use lograft_apply::{converge, desired_json, ensure_once, Outcome};
use lograft_builders::elasticsearch::{self as build, HTTP_PORT};
use lograft_core::{naming, ClusterHealth, Elasticsearch, ElasticsearchStatus, Role};
use lograft_elastic::{Endpoint, SERVICE_ACCOUNT_NAMESPACE};
use lograft_kubehub::ObjectKind;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{write_status, Context, ReconcileError, ReconcileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    SecuritySetup { tls: bool, password: bool },
    MasterReady,
    RoleReady(Role),
    HealthProbe,
    ServiceIntegrationCredential,
    StatusWritten,
}

impl ProvisioningStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningStep::SecuritySetup { .. } => "security_setup",
            ProvisioningStep::MasterReady | ProvisioningStep::RoleReady(Role::Master) => "master_ready",
            ProvisioningStep::RoleReady(Role::Data) => "data_ready",
            ProvisioningStep::RoleReady(Role::Ingestion) => "ingestion_ready",
            ProvisioningStep::RoleReady(Role::Client) => "client_ready",
            ProvisioningStep::HealthProbe => "health_probe",
            ProvisioningStep::ServiceIntegrationCredential => "service_integration_credential",
            ProvisioningStep::StatusWritten => "status_written",
        }
    }
}

/// Steps for one pass over `es`, in execution order.
///
/// Optional roles and security branches are decided here and nowhere else.
pub fn plan(es: &Elasticsearch) -> Vec<ProvisioningStep> {
    let mut steps = Vec::with_capacity(8);
    if let Some(security) = &es.spec.security {
        let tls = security.tls_enabled;
        let password = security.auto_generate_password && security.existing_secret.is_none();
        if tls || password {
            steps.push(ProvisioningStep::SecuritySetup { tls, password });
        }
    }
    steps.push(ProvisioningStep::MasterReady);
    steps.extend(Role::OPTIONAL.into_iter().filter(|r| es.spec.node(*r).is_some()).map(ProvisioningStep::RoleReady));
    steps.push(ProvisioningStep::HealthProbe);
    if es.spec.security.as_ref().is_some_and(|s| s.kibana_integration.is_some()) {
        steps.push(ProvisioningStep::ServiceIntegrationCredential);
    }
    steps.push(ProvisioningStep::StatusWritten);
    steps
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub steps: Vec<ProvisioningStep>,
    pub outcomes: Vec<Outcome>,
    pub health: ClusterHealth,
    pub active_shards: Option<i32>,
    /// The status write lost a race; run again soon.
    pub status_conflict: bool,
}

pub struct Provisioner<'a> {
    ctx: &'a Context,
}

impl<'a> Provisioner<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, es: &Elasticsearch) -> ReconcileResult<PassReport> {
        let id = es.name_any();
        let ns = es.namespace().ok_or_else(|| ReconcileError::MissingNamespace(format!("Elasticsearch/{id}")))?;
        let mut report = PassReport::default();
        let mut endpoint = None;

        for step in plan(es) {
            counter!("provision_step_total", 1u64, "step" => step.as_str());
            debug!(name = %id, step = step.as_str(), "provisioning step");
            report.steps.push(step);
            match step {
                ProvisioningStep::SecuritySetup { tls, password } => {
                    self.security(es, &id, &ns, tls, password, &mut report).await?;
                }
                ProvisioningStep::MasterReady => self.role(es, Role::Master, &mut report).await?,
                ProvisioningStep::RoleReady(role) => self.role(es, role, &mut report).await?,
                ProvisioningStep::HealthProbe => {
                    let ep = self.endpoint(es, &id, &ns).await;
                    self.probe(&id, ep.as_ref(), &mut report).await;
                    endpoint = ep;
                }
                ProvisioningStep::ServiceIntegrationCredential => {
                    if report.health == ClusterHealth::Ready {
                        if let Some(ep) = &endpoint {
                            self.integration(es, &id, &ns, ep, &mut report).await?;
                        }
                    } else {
                        debug!(name = %id, health = report.health.as_str(), "cluster not ready; token deferred");
                    }
                }
                ProvisioningStep::StatusWritten => {
                    report.status_conflict = self.status(es, &report).await?;
                }
            }
        }
        info!(name = %id, namespace = %ns, health = report.health.as_str(), "provisioning pass complete");
        Ok(report)
    }

    async fn security(
        &self,
        es: &Elasticsearch,
        id: &str,
        ns: &str,
        tls: bool,
        password: bool,
        report: &mut PassReport,
    ) -> ReconcileResult<()> {
        let store = self.ctx.store.as_ref();
        if password {
            let name = naming::password_secret_name(id);
            let out = ensure_once(store, ObjectKind::Secret, &name, Some(ns), || async move {
                Ok::<_, ReconcileError>(desired_json(&build::password_secret(es, &build::generate_password())?)?)
            })
            .await?;
            report.outcomes.push(out);
        }
        if tls {
            let name = naming::tls_secret_name(id);
            let out = ensure_once(store, ObjectKind::Secret, &name, Some(ns), || async move {
                Ok::<_, ReconcileError>(desired_json(&build::tls_secret(es)?)?)
            })
            .await?;
            report.outcomes.push(out);
        }
        Ok(())
    }

    /// Workload first, then its routable and headless services.
    async fn role(&self, es: &Elasticsearch, role: Role, report: &mut PassReport) -> ReconcileResult<()> {
        let store = self.ctx.store.as_ref();
        let sts = build::statefulset(es, role)?;
        report.outcomes.push(converge(store, ObjectKind::StatefulSet, desired_json(&sts)?).await?);
        for svc in build::services(es, role)? {
            report.outcomes.push(converge(store, ObjectKind::Service, desired_json(&svc)?).await?);
        }
        Ok(())
    }

    /// Master service address plus credentials. `None` when the password secret cannot be read.
    async fn endpoint(&self, es: &Elasticsearch, id: &str, ns: &str) -> Option<Endpoint> {
        let base = format!(
            "{}://{}.{}:{}",
            es.spec.scheme(),
            naming::workload_name(id, Role::Master),
            ns,
            HTTP_PORT
        );
        let ep = Endpoint::new(base);
        let Some(security) = es.spec.security.as_ref().filter(|s| s.has_password()) else {
            return Some(ep);
        };
        let secret_name = lograft_builders::password_source(security, id);
        match self.ctx.store.get(ObjectKind::Secret, &secret_name, Some(ns)).await {
            Ok(secret) => match secret_value(&secret, "password") {
                Some(pw) => Some(ep.with_basic_auth("elastic", pw)),
                None => {
                    warn!(name = %id, secret = %secret_name, "password secret has no usable password key");
                    None
                }
            },
            Err(e) => {
                warn!(name = %id, secret = %secret_name, error = %e, "cannot read cluster password");
                None
            }
        }
    }

    async fn probe(&self, id: &str, ep: Option<&Endpoint>, report: &mut PassReport) {
        let Some(ep) = ep else {
            report.health = ClusterHealth::NotReady;
            return;
        };
        match self.ctx.cluster.cluster_health(ep).await {
            Ok(h) => {
                report.health = ClusterHealth::classify(&h.status);
                report.active_shards = i32::try_from(h.active_shards).ok();
                debug!(name = %id, status = %h.status, shards = h.active_shards, "cluster health");
            }
            Err(e) => {
                report.health = ClusterHealth::NotReady;
                warn!(name = %id, url = %ep.base_url, error = %e, "health probe failed");
            }
        }
    }

    async fn integration(
        &self,
        es: &Elasticsearch,
        id: &str,
        ns: &str,
        ep: &Endpoint,
        report: &mut PassReport,
    ) -> ReconcileResult<()> {
        let Some(integration) = es.spec.security.as_ref().and_then(|s| s.kibana_integration.as_ref()) else {
            return Ok(());
        };
        let name = naming::integration_secret_name(id);
        let cluster = self.ctx.cluster.as_ref();
        let (service, token_name) = (integration.service.as_str(), integration.token_name.as_str());
        let issued = ensure_once(self.ctx.store.as_ref(), ObjectKind::Secret, &name, Some(ns), || async move {
            // The value of a token is only returned once; without our secret it has to be reissued.
            let token = match cluster.create_service_token(ep, SERVICE_ACCOUNT_NAMESPACE, service, token_name).await {
                Err(e) if e.is_conflict() => {
                    warn!(name = %id, token = %token_name, "service token exists without its secret; reissuing");
                    cluster.delete_service_token(ep, SERVICE_ACCOUNT_NAMESPACE, service, token_name).await?;
                    cluster.create_service_token(ep, SERVICE_ACCOUNT_NAMESPACE, service, token_name).await?
                }
                other => other?,
            };
            info!(name = %id, token = %token.name, "service token issued");
            Ok::<_, ReconcileError>(desired_json(&build::integration_secret(es, &token.value)?)?)
        })
        .await;
        match issued {
            Ok(out) => report.outcomes.push(out),
            Err(ReconcileError::Elastic(e)) => {
                let step = ProvisioningStep::ServiceIntegrationCredential.as_str();
                counter!("provision_step_errors_total", 1u64, "step" => step);
                warn!(name = %id, error = %e, "service token not issued; retrying next pass");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Replica counts are echoed from the declaration; health comes from this pass's probe.
    async fn status(&self, es: &Elasticsearch, report: &PassReport) -> ReconcileResult<bool> {
        let mut status = ElasticsearchStatus {
            version: Some(es.spec.version.clone()),
            cluster_state: report.health,
            active_shards: report.active_shards,
            ..ElasticsearchStatus::default()
        };
        for role in std::iter::once(Role::Master).chain(Role::OPTIONAL) {
            if let Some(node) = es.spec.node(role) {
                status.set_role_count(role, node.replicas);
            }
        }
        let declared = desired_json(es)?;
        write_status(self.ctx.store.as_ref(), ObjectKind::Elasticsearch, declared, serde_json::to_value(status)?).await
    }
}

/// Decoded `data.<key>` of a stored Secret.
fn secret_value(secret: &serde_json::Value, key: &str) -> Option<String> {
    let encoded = secret.get("data")?.get(key)?.as_str()?;
    let raw = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    String::from_utf8(raw).ok()
}
