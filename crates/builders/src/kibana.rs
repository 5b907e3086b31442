use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Service, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use lograft_core::{naming, Kibana};

use crate::common::{self, env, exec_probe, labels, place, secret_env, selector, sorted, Owner};
use crate::templates;
use crate::BuildResult;

pub const PORT: i32 = 5601;
const TLS_VOLUME: &str = "tls";
const CERTS_PATH: &str = "/usr/share/kibana/config/certs";

fn app_labels(name: &str) -> BTreeMap<String, String> {
    labels(&[("app", name), ("service", "kibana")])
}

pub fn env_vars(kb: &Kibana) -> Vec<EnvVar> {
    let es = &kb.spec.elastic;
    let mut vars = vec![
        env("ELASTICSEARCH_HOSTS", es.host.as_str()),
        env("SERVER_HOST", "0.0.0.0"),
        env("SERVER_NAME", "kibana"),
    ];
    if let Some(security) = kb.spec.security.as_ref().filter(|s| s.tls_enabled) {
        vars.push(env("ELASTIC_USERNAME", "elastic"));
        vars.push(secret_env("ELASTIC_PASSWORD", &common::password_source(security, &es.cluster_name), "password"));
        vars.push(secret_env(
            "ELASTICSEARCH_SERVICEACCOUNTTOKEN",
            &naming::integration_secret_name(&es.cluster_name),
            "token",
        ));
        vars.push(env("ELASTICSEARCH_SSL_VERIFICATIONMODE", "none"));
    }
    sorted(vars)
}

pub fn deployment(kb: &Kibana) -> BuildResult<Deployment> {
    let owner = Owner::of(kb)?;
    let labels = app_labels(&owner.name);
    let tls = kb.spec.security.as_ref().map(|s| s.tls_enabled).unwrap_or(false);

    let mut container = Container {
        name: "kibana".to_string(),
        image: Some(format!("docker.elastic.co/kibana/kibana:{}", kb.spec.elastic.es_version)),
        env: Some(env_vars(kb)),
        ports: Some(vec![ContainerPort { name: Some("http".into()), container_port: PORT, ..ContainerPort::default() }]),
        readiness_probe: Some(exec_probe(templates::KIBANA_READINESS)),
        volume_mounts: tls.then(|| {
            vec![VolumeMount { name: TLS_VOLUME.into(), mount_path: CERTS_PATH.into(), ..VolumeMount::default() }]
        }),
        ..Container::default()
    };
    let mut pod = PodSpec {
        volumes: tls.then(|| {
            vec![Volume {
                name: TLS_VOLUME.into(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(naming::tls_secret_name(&kb.spec.elastic.cluster_name)),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            }]
        }),
        ..PodSpec::default()
    };
    place(&mut pod, &mut container, kb.spec.kubernetes_config.as_ref());
    pod.containers = vec![container];

    Ok(Deployment {
        metadata: owner.meta(&owner.name, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(kb.spec.replicas),
            selector: selector(&labels),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..ObjectMeta::default() }),
                spec: Some(pod),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    })
}

pub fn service(kb: &Kibana) -> BuildResult<Service> {
    let owner = Owner::of(kb)?;
    let labels = app_labels(&owner.name);
    Ok(common::service(owner.meta(&owner.name, labels.clone()), labels, &[("http", PORT)], false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lograft_core::{ElasticConfig, KibanaSpec, Security};

    fn kibana(security: Option<Security>) -> Kibana {
        let mut kb = Kibana::new(
            "kb",
            KibanaSpec {
                replicas: 2,
                elastic: ElasticConfig { host: "https://logs-master:9200".into(), cluster_name: "logs".into(), es_version: "8.10.0".into() },
                security,
                kubernetes_config: None,
            },
        );
        kb.metadata.namespace = Some("ns".into());
        kb.metadata.uid = Some("uid-kb".into());
        kb
    }

    #[test]
    fn plain_deployment_has_no_credentials() {
        let dep = deployment(&kibana(None)).unwrap();
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let pod = spec.template.spec.unwrap();
        assert!(pod.volumes.is_none());
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("docker.elastic.co/kibana/kibana:8.10.0"));
        let names: Vec<_> = c.env.as_ref().unwrap().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["ELASTICSEARCH_HOSTS", "SERVER_HOST", "SERVER_NAME"]);
    }

    #[test]
    fn tls_wires_password_token_and_certs() {
        let dep = deployment(&kibana(Some(Security { tls_enabled: true, ..Security::default() }))).unwrap();
        let pod = dep.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let secret_of = |n: &str| {
            env.iter()
                .find(|v| v.name == n)
                .and_then(|v| v.value_from.as_ref())
                .and_then(|s| s.secret_key_ref.as_ref())
                .and_then(|s| s.name.clone())
        };
        assert_eq!(secret_of("ELASTIC_PASSWORD").as_deref(), Some("logs-password"));
        assert_eq!(secret_of("ELASTICSEARCH_SERVICEACCOUNTTOKEN").as_deref(), Some("logs-sa-token"));
        let vol = &pod.volumes.unwrap()[0];
        assert_eq!(vol.secret.as_ref().unwrap().secret_name.as_deref(), Some("logs-tls-cert"));
    }

    #[test]
    fn service_exposes_dashboard_port() {
        let svc = service(&kibana(None)).unwrap();
        let port = &svc.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 5601);
    }
}
