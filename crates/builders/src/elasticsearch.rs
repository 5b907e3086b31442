//! Secrets, StatefulSets and Services for a search cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, EnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, SecurityContext,
    Service, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use lograft_core::{naming, Elasticsearch, NodeSpecificConfig, Role, Storage};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::common::{self, env, exec_probe, labels, place, secret_env, selector, sorted, Owner};
use crate::templates::{self, CERTIFICATE_FILE};
use crate::{BuildError, BuildResult};

pub const HTTP_PORT: i32 = 9200;
pub const TRANSPORT_PORT: i32 = 9300;

const DATA_PATH: &str = "/usr/share/elasticsearch/data";
const CERTS_PATH: &str = "/usr/share/elasticsearch/config/certs";
const PLUGINS_PATH: &str = "/usr/share/elasticsearch/plugins";
const TLS_VOLUME: &str = "tls-cert";
const PLUGIN_VOLUME: &str = "plugin-volume";

pub fn image(version: &str) -> String {
    format!("docker.elastic.co/elasticsearch/elasticsearch:{}", version)
}

/// 16 random alphanumerics.
pub fn generate_password() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect()
}

fn cluster_labels(id: &str) -> BTreeMap<String, String> {
    labels(&[("app", id)])
}

fn role_labels(id: &str, role: Role) -> BTreeMap<String, String> {
    labels(&[("app", &naming::workload_name(id, role)), ("role", role.as_str())])
}

fn secret(meta: ObjectMeta, key: &str, value: Vec<u8>) -> Secret {
    Secret { metadata: meta, data: Some(BTreeMap::from([(key.to_string(), ByteString(value))])), ..Secret::default() }
}

pub fn password_secret(es: &Elasticsearch, password: &str) -> BuildResult<Secret> {
    let owner = Owner::of(es)?;
    let meta = owner.meta(&naming::password_secret_name(&owner.name), cluster_labels(&owner.name));
    Ok(secret(meta, "password", password.as_bytes().to_vec()))
}

pub fn tls_secret(es: &Elasticsearch) -> BuildResult<Secret> {
    let owner = Owner::of(es)?;
    let meta = owner.meta(&naming::tls_secret_name(&owner.name), cluster_labels(&owner.name));
    Ok(secret(meta, CERTIFICATE_FILE, templates::certificate_bundle()?))
}

/// Holds the service token minted for the dashboard.
pub fn integration_secret(es: &Elasticsearch, token: &str) -> BuildResult<Secret> {
    let owner = Owner::of(es)?;
    let meta = owner.meta(&naming::integration_secret_name(&owner.name), cluster_labels(&owner.name));
    Ok(secret(meta, "token", token.as_bytes().to_vec()))
}

fn java_opts(node: &NodeSpecificConfig) -> String {
    match (&node.jvm_max_memory, &node.jvm_min_memory) {
        (Some(max), Some(min)) => format!("-Xmx{} -Xms{}", max, min),
        _ => "-Xmx1g -Xms1g".to_string(),
    }
}

/// Environment for one role's search nodes, sorted by name.
pub fn env_vars(es: &Elasticsearch, role: Role) -> BuildResult<Vec<EnvVar>> {
    let id = es.metadata.name.clone().unwrap_or_default();
    let spec = &es.spec;
    let node = spec.node(role).ok_or(BuildError::RoleNotDeclared(role))?;
    let mut vars = vec![
        env("ELASTIC_USERNAME", "elastic"),
        env("SCHEME", spec.scheme()),
        env("ES_JAVA_OPTS", java_opts(node)),
        env("discovery.seed_hosts", naming::headless_name(&id, Role::Master)),
        env("network.host", "0.0.0.0"),
        env("cluster.name", spec.cluster_name.as_str()),
    ];
    if let Some(security) = spec.security.as_ref().filter(|s| s.has_password()) {
        vars.push(secret_env("ELASTIC_PASSWORD", &common::password_source(security, &id), "password"));
    }
    match role {
        Role::Master => {
            vars.push(env("cluster.initial_master_nodes", naming::pod_names(&id, Role::Master, node.replicas)));
            vars.push(env("node.master", "true"));
            vars.push(env("node.data", "false"));
            vars.push(env("node.ingest", "false"));
        }
        Role::Data => vars.push(env("node.roles", "data")),
        Role::Ingestion => vars.push(env("node.roles", "ingest")),
        // coordinating-only
        Role::Client => vars.push(env("node.roles", "")),
    }
    if spec.tls_enabled() {
        let bundle = format!("{}/{}", CERTS_PATH, CERTIFICATE_FILE);
        vars.extend([
            env("xpack.security.enabled", "true"),
            env("xpack.security.transport.ssl.enabled", "true"),
            env("xpack.security.transport.ssl.verification_mode", "certificate"),
            env("xpack.security.transport.ssl.keystore.path", bundle.as_str()),
            env("xpack.security.transport.ssl.truststore.path", bundle.as_str()),
            env("xpack.security.http.ssl.enabled", "true"),
            env("xpack.security.http.ssl.keystore.path", bundle.as_str()),
            env("xpack.security.http.ssl.truststore.path", bundle.as_str()),
        ]);
    }
    Ok(sorted(vars))
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount { name: name.to_string(), mount_path: path.to_string(), ..VolumeMount::default() }
}

fn empty_dir(name: &str) -> Volume {
    Volume { name: name.to_string(), empty_dir: Some(EmptyDirVolumeSource::default()), ..Volume::default() }
}

fn claim_template(name: &str, storage: &Storage) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta { name: Some(name.to_string()), ..ObjectMeta::default() },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(storage.access_modes.clone()),
            storage_class_name: storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(storage.storage_size.clone()))])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

fn sysctl_init(image: &str) -> Container {
    Container {
        name: "sysctl-init".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["sysctl".into(), "-w".into(), "vm.max_map_count=262144".into()]),
        security_context: Some(SecurityContext { privileged: Some(true), run_as_user: Some(0), ..SecurityContext::default() }),
        ..Container::default()
    }
}

fn plugins_init(image: &str, plugins: &[String]) -> Container {
    let install = format!("bin/elasticsearch-plugin install --batch {}", plugins.join(" "));
    Container {
        name: "plugins".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["sh".into(), "-c".into(), install]),
        volume_mounts: Some(vec![mount(PLUGIN_VOLUME, PLUGINS_PATH)]),
        ..Container::default()
    }
}

pub fn statefulset(es: &Elasticsearch, role: Role) -> BuildResult<StatefulSet> {
    let owner = Owner::of(es)?;
    let spec = &es.spec;
    let node = spec.node(role).ok_or(BuildError::RoleNotDeclared(role))?;
    let name = naming::workload_name(&owner.name, role);
    let role_labels = role_labels(&owner.name, role);
    let image = image(&spec.version);

    let mut mounts = vec![mount(&name, DATA_PATH)];
    let mut volumes = Vec::new();
    if spec.tls_enabled() {
        mounts.push(mount(TLS_VOLUME, CERTS_PATH));
        volumes.push(Volume {
            name: TLS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(naming::tls_secret_name(&owner.name)),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        });
    }
    let mut init = vec![sysctl_init(&image)];
    if !spec.plugins.is_empty() {
        mounts.push(mount(PLUGIN_VOLUME, PLUGINS_PATH));
        volumes.push(empty_dir(PLUGIN_VOLUME));
        init.push(plugins_init(&image, &spec.plugins));
    }
    let claims = match &node.storage {
        Some(storage) => Some(vec![claim_template(&name, storage)]),
        None => {
            volumes.push(empty_dir(&name));
            None
        }
    };

    let mut container = Container {
        name: "elastic".to_string(),
        image: Some(image.clone()),
        env: Some(env_vars(es, role)?),
        env_from: node.custom_config.as_ref().map(|cm| {
            vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource { name: Some(cm.clone()), ..ConfigMapEnvSource::default() }),
                ..EnvFromSource::default()
            }]
        }),
        ports: Some(vec![
            ContainerPort { name: Some("http".into()), container_port: HTTP_PORT, ..ContainerPort::default() },
            ContainerPort { name: Some("transport".into()), container_port: TRANSPORT_PORT, ..ContainerPort::default() },
        ]),
        volume_mounts: Some(mounts),
        readiness_probe: Some(exec_probe(templates::ELASTICSEARCH_READINESS)),
        ..Container::default()
    };
    let mut pod = PodSpec {
        init_containers: Some(init),
        security_context: Some(PodSecurityContext { fs_group: Some(1000), run_as_user: Some(1000), ..PodSecurityContext::default() }),
        enable_service_links: Some(true),
        volumes: (!volumes.is_empty()).then_some(volumes),
        ..PodSpec::default()
    };
    place(&mut pod, &mut container, node.kubernetes_config.as_ref());
    pod.containers = vec![container];

    Ok(StatefulSet {
        metadata: owner.meta(&name, role_labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(node.replicas),
            service_name: name.clone(),
            selector: selector(&role_labels),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..StatefulSetUpdateStrategy::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(role_labels), ..ObjectMeta::default() }),
                spec: Some(pod),
            },
            volume_claim_templates: claims,
            ..StatefulSetSpec::default()
        }),
        ..StatefulSet::default()
    })
}

/// Routable `<id>-<role>` and headless `<id>-<role>-headless` services for one role.
pub fn services(es: &Elasticsearch, role: Role) -> BuildResult<[Service; 2]> {
    let owner = Owner::of(es)?;
    let labels = role_labels(&owner.name, role);
    let ports = [("http", HTTP_PORT), ("transport", TRANSPORT_PORT)];
    let routable = common::service(
        owner.meta(&naming::workload_name(&owner.name, role), labels.clone()),
        labels.clone(),
        &ports,
        false,
    );
    let headless =
        common::service(owner.meta(&naming::headless_name(&owner.name, role), labels.clone()), labels, &ports, true);
    Ok([routable, headless])
}

#[cfg(test)]
mod tests {
    use super::*;
    use lograft_core::Security;

    fn cluster(yaml: &str) -> Elasticsearch {
        let mut es: Elasticsearch = serde_yaml::from_str(yaml).unwrap();
        es.metadata.namespace = Some("ns".into());
        es.metadata.uid = Some("uid-1".into());
        es
    }

    fn logs() -> Elasticsearch {
        cluster(
            r#"
apiVersion: logging.lograft.io/v1beta1
kind: Elasticsearch
metadata: {name: logs}
spec:
  esClusterName: prod
  esVersion: 7.17.0
  esMaster: {replicas: 3}
"#,
        )
    }

    fn value<'a>(vars: &'a [EnvVar], name: &str) -> Option<&'a str> {
        vars.iter().find(|v| v.name == name).and_then(|v| v.value.as_deref())
    }

    #[test]
    fn master_env_lists_initial_nodes_from_zero() {
        let vars = env_vars(&logs(), Role::Master).unwrap();
        assert_eq!(value(&vars, "cluster.initial_master_nodes"), Some("logs-master-0,logs-master-1,logs-master-2"));
        assert_eq!(value(&vars, "discovery.seed_hosts"), Some("logs-master-headless"));
        assert_eq!(value(&vars, "SCHEME"), Some("http"));
        assert_eq!(value(&vars, "ES_JAVA_OPTS"), Some("-Xmx1g -Xms1g"));
        assert!(vars.iter().all(|v| !v.name.starts_with("xpack")));
        assert!(vars.windows(2).all(|w| w[0].name <= w[1].name));
    }

    #[test]
    fn tls_switches_scheme_and_mounts_bundle() {
        let mut es = logs();
        es.spec.security = Some(Security { tls_enabled: true, auto_generate_password: true, ..Security::default() });
        let vars = env_vars(&es, Role::Master).unwrap();
        assert_eq!(value(&vars, "SCHEME"), Some("https"));
        assert_eq!(vars.iter().filter(|v| v.name.starts_with("xpack.security")).count(), 8);
        let pw = vars.iter().find(|v| v.name == "ELASTIC_PASSWORD").unwrap();
        let sel = pw.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(sel.name.as_deref(), Some("logs-password"));

        let sts = statefulset(&es, Role::Master).unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let vols = pod.volumes.unwrap();
        assert!(vols.iter().any(|v| v.secret.as_ref().and_then(|s| s.secret_name.as_deref()) == Some("logs-tls-cert")));
    }

    #[test]
    fn existing_secret_wins_over_generated() {
        let mut es = logs();
        es.spec.security =
            Some(Security { existing_secret: Some("mine".into()), auto_generate_password: true, ..Security::default() });
        let vars = env_vars(&es, Role::Master).unwrap();
        let pw: Vec<_> = vars.iter().filter(|v| v.name == "ELASTIC_PASSWORD").collect();
        assert_eq!(pw.len(), 1);
        assert_eq!(pw[0].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap().name.as_deref(), Some("mine"));
    }

    #[test]
    fn statefulset_without_storage_uses_empty_dir() {
        let sts = statefulset(&logs(), Role::Master).unwrap();
        assert_eq!(sts.metadata.name.as_deref(), Some("logs-master"));
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name, "logs-master");
        assert!(spec.volume_claim_templates.is_none());
        let pod = spec.template.spec.unwrap();
        assert!(pod.volumes.unwrap().iter().any(|v| v.name == "logs-master" && v.empty_dir.is_some()));
        assert_eq!(pod.init_containers.unwrap().len(), 1);
    }

    #[test]
    fn storage_and_plugins_shape_the_pod() {
        let mut es = logs();
        es.spec.plugins = vec!["repository-s3".into(), "analysis-icu".into()];
        es.spec.data = Some(NodeSpecificConfig {
            replicas: 2,
            storage: Some(Storage { storage_size: "10Gi".into(), ..Storage::default() }),
            custom_config: Some("data-env".into()),
            ..NodeSpecificConfig::default()
        });
        let sts = statefulset(&es, Role::Data).unwrap();
        let spec = sts.spec.unwrap();
        let claim = &spec.volume_claim_templates.unwrap()[0];
        assert_eq!(claim.metadata.name.as_deref(), Some("logs-data"));
        let pvc = claim.spec.as_ref().unwrap();
        assert_eq!(pvc.access_modes.as_deref(), Some(&["ReadWriteOnce".to_string()][..]));
        let pod = spec.template.spec.unwrap();
        let init = pod.init_containers.unwrap();
        assert_eq!(init[1].command.as_ref().unwrap()[2], "bin/elasticsearch-plugin install --batch repository-s3 analysis-icu");
        let main = &pod.containers[0];
        assert!(main.env_from.is_some());
        assert_eq!(value(main.env.as_ref().unwrap(), "node.roles"), Some("data"));
    }

    #[test]
    fn undeclared_role_is_rejected() {
        assert_eq!(statefulset(&logs(), Role::Client).unwrap_err(), BuildError::RoleNotDeclared(Role::Client));
    }

    #[test]
    fn headless_service_publishes_not_ready_addresses() {
        let [routable, headless] = services(&logs(), Role::Master).unwrap();
        assert_eq!(routable.metadata.name.as_deref(), Some("logs-master"));
        assert!(routable.spec.as_ref().unwrap().cluster_ip.is_none());
        let spec = headless.spec.unwrap();
        assert_eq!(headless.metadata.name.as_deref(), Some("logs-master-headless"));
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.ports.unwrap().len(), 2);
    }

    #[test]
    fn builds_are_deterministic_and_owned() {
        let a = statefulset(&logs(), Role::Master).unwrap();
        let b = statefulset(&logs(), Role::Master).unwrap();
        assert_eq!(a, b);
        let owner = &a.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "Elasticsearch");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(a.metadata.annotations.unwrap()["logging.lograft.io/managed"], "true");
    }

    #[test]
    fn missing_uid_is_an_error() {
        let mut es = logs();
        es.metadata.uid = None;
        assert!(matches!(tls_secret(&es), Err(BuildError::MissingIdentity { .. })));
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let pw = generate_password();
        assert_eq!(pw.len(), 16);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
