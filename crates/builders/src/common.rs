use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ExecAction, PodSpec, Probe, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use lograft_core::{naming, KubernetesConfig, Security, MANAGED_ANNOTATION};

use crate::{BuildError, BuildResult};

/// Identity of the declaring resource, resolved once per build.
pub(crate) struct Owner {
    pub name: String,
    pub namespace: String,
    pub reference: OwnerReference,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> BuildResult<Self> {
        let kind = || K::kind(&()).into_owned();
        let namespace = obj.namespace().ok_or_else(|| BuildError::MissingIdentity { kind: kind(), field: "namespace" })?;
        let reference = obj.controller_owner_ref(&()).ok_or_else(|| BuildError::MissingIdentity { kind: kind(), field: "uid" })?;
        Ok(Self { name: obj.name_any(), namespace, reference })
    }

    /// Metadata for a namespaced child object.
    pub fn meta(&self, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta { namespace: Some(self.namespace.clone()), ..self.cluster_meta(name, labels) }
    }

    /// Metadata for a cluster-scoped child object.
    pub fn cluster_meta(&self, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(MANAGED_ANNOTATION.to_string(), "true".to_string())])),
            owner_references: Some(vec![self.reference.clone()]),
            ..ObjectMeta::default()
        }
    }
}

pub(crate) fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub(crate) fn selector(labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector { match_labels: Some(labels.clone()), ..LabelSelector::default() }
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), ..EnvVar::default() }
}

pub(crate) fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                ..SecretKeySelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

pub(crate) fn sorted(mut vars: Vec<EnvVar>) -> Vec<EnvVar> {
    vars.sort_by(|a, b| a.name.cmp(&b.name));
    vars
}

/// Secret holding the `elastic` user's password for a cluster named `cluster`.
pub fn password_source(security: &Security, cluster: &str) -> String {
    security.existing_secret.clone().unwrap_or_else(|| naming::password_secret_name(cluster))
}

pub(crate) fn exec_probe(script: &str) -> Probe {
    Probe {
        initial_delay_seconds: Some(15),
        period_seconds: Some(15),
        failure_threshold: Some(5),
        timeout_seconds: Some(5),
        exec: Some(ExecAction { command: Some(vec!["bash".into(), "-c".into(), script.to_string()]) }),
        ..Probe::default()
    }
}

/// Copy scheduling and sizing knobs onto a pod and its main container.
pub(crate) fn place(pod: &mut PodSpec, container: &mut Container, cfg: Option<&KubernetesConfig>) {
    let Some(cfg) = cfg else { return };
    container.resources = cfg.resources.clone();
    pod.affinity = cfg.affinity.clone();
    pod.tolerations = cfg.tolerations.clone();
    pod.priority_class_name = cfg.priority_class_name.clone();
    pod.node_selector = cfg.node_selector.clone();
}

pub(crate) fn service(
    meta: ObjectMeta,
    selector: BTreeMap<String, String>,
    ports: &[(&str, i32)],
    headless: bool,
) -> Service {
    let ports = ports
        .iter()
        .map(|(name, port)| ServicePort {
            name: Some(name.to_string()),
            port: *port,
            target_port: Some(IntOrString::Int(*port)),
            protocol: Some("TCP".to_string()),
            ..ServicePort::default()
        })
        .collect();
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(ports),
            cluster_ip: headless.then(|| "None".to_string()),
            publish_not_ready_addresses: headless.then_some(true),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}
