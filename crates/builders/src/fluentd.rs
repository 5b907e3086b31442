use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, HostPathVolumeSource, PodSpec, PodTemplateSpec, ServiceAccount,
    Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use lograft_core::{naming, Fluentd};

use crate::common::{self, env, labels, place, secret_env, selector, sorted, Owner};
use crate::templates;
use crate::BuildResult;

pub const IMAGE: &str = "fluent/fluentd-kubernetes-daemonset:v1-debian-elasticsearch";
const CRI_PARSER: &str = "/^(?<time>.+) (?<stream>stdout|stderr)( (?<logtag>.))? (?<log>.*)$/";

fn app_labels(name: &str) -> BTreeMap<String, String> {
    labels(&[("app", name)])
}

pub fn configmap(fd: &Fluentd) -> BuildResult<ConfigMap> {
    let owner = Owner::of(fd)?;
    Ok(ConfigMap {
        metadata: owner.meta(&owner.name, app_labels(&owner.name)),
        data: Some(BTreeMap::from([("fluent.conf".to_string(), templates::FLUENT_CONF.to_string())])),
        ..ConfigMap::default()
    })
}

pub fn service_account(fd: &Fluentd) -> BuildResult<ServiceAccount> {
    let owner = Owner::of(fd)?;
    Ok(ServiceAccount { metadata: owner.meta(&owner.name, app_labels(&owner.name)), ..ServiceAccount::default() })
}

/// Cluster-scoped RBAC is keyed by namespace too, so same-named shippers never share it.
pub fn rbac_name(fd: &Fluentd) -> BuildResult<String> {
    let owner = Owner::of(fd)?;
    Ok(naming::cluster_scoped_name(&owner.namespace, &owner.name))
}

pub fn cluster_role(fd: &Fluentd) -> BuildResult<ClusterRole> {
    let owner = Owner::of(fd)?;
    let name = naming::cluster_scoped_name(&owner.namespace, &owner.name);
    Ok(ClusterRole {
        metadata: owner.cluster_meta(&name, app_labels(&owner.name)),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["pods".into(), "namespaces".into()]),
            verbs: vec!["get".into(), "list".into(), "watch".into()],
            ..PolicyRule::default()
        }]),
        ..ClusterRole::default()
    })
}

pub fn cluster_role_binding(fd: &Fluentd) -> BuildResult<ClusterRoleBinding> {
    let owner = Owner::of(fd)?;
    let name = naming::cluster_scoped_name(&owner.namespace, &owner.name);
    Ok(ClusterRoleBinding {
        metadata: owner.cluster_meta(&name, app_labels(&owner.name)),
        role_ref: RoleRef { api_group: "rbac.authorization.k8s.io".into(), kind: "ClusterRole".into(), name },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".into(),
            name: owner.name.clone(),
            namespace: Some(owner.namespace.clone()),
            ..Subject::default()
        }]),
    })
}

pub fn env_vars(fd: &Fluentd) -> Vec<EnvVar> {
    let es = &fd.spec.elastic;
    let mut vars = vec![
        env("FLUENT_ELASTICSEARCH_HOST", es.host.as_str()),
        env("FLUENT_ELASTICSEARCH_PORT", "9200"),
        env("FLUENT_CONTAINER_TAIL_PARSER_TYPE", CRI_PARSER),
        env("FLUENTD_SYSTEMD_CONF", "disable"),
    ];
    if let Some(security) = fd.spec.security.as_ref().filter(|s| s.tls_enabled) {
        vars.extend([
            env("FLUENT_ELASTICSEARCH_USER", "elastic"),
            env("FLUENT_ELASTICSEARCH_SSL_VERIFY", "false"),
            env("FLUENT_ELASTICSEARCH_SSL_VERSION", "TLSv1_2"),
            env("FLUENT_ELASTICSEARCH_SCHEME", "https"),
            secret_env("FLUENT_ELASTICSEARCH_PASSWORD", &common::password_source(security, &es.cluster_name), "password"),
        ]);
    }
    if let Some(strategy) = fd.spec.index_name_strategy {
        vars.push(env(
            "FLUENT_ELASTICSEARCH_LOGSTASH_PREFIX",
            format!("kubernetes-${{record['kubernetes']['{}']}}", strategy.field()),
        ));
    }
    sorted(vars)
}

fn host_path(name: &str, path: &str) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource { path: path.into(), ..HostPathVolumeSource::default() }),
        ..Volume::default()
    }
}

fn config_volume(name: &str, configmap: &str) -> Volume {
    Volume {
        name: name.into(),
        config_map: Some(ConfigMapVolumeSource { name: Some(configmap.into()), ..ConfigMapVolumeSource::default() }),
        ..Volume::default()
    }
}

pub fn daemonset(fd: &Fluentd) -> BuildResult<DaemonSet> {
    let owner = Owner::of(fd)?;
    let labels = app_labels(&owner.name);
    let config = fd.spec.custom_config.clone().unwrap_or_else(|| owner.name.clone());

    let mut volumes = vec![
        host_path("varlogs", "/var/log"),
        host_path("varlibdockercontainers", "/var/lib/docker/containers"),
        config_volume("fluentd", &config),
    ];
    let mut mounts = vec![
        VolumeMount { name: "varlogs".into(), mount_path: "/var/log".into(), ..VolumeMount::default() },
        VolumeMount {
            name: "varlibdockercontainers".into(),
            mount_path: "/var/lib/docker/containers".into(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
        VolumeMount {
            name: "fluentd".into(),
            mount_path: "/fluentd/etc/fluent.conf".into(),
            sub_path: Some("fluent.conf".into()),
            ..VolumeMount::default()
        },
    ];
    if let Some(extra) = &fd.spec.additional_config {
        volumes.push(config_volume("fluentd-additional", extra));
        mounts.push(VolumeMount {
            name: "fluentd-additional".into(),
            mount_path: "/fluentd/etc/conf.d/additional-config/".into(),
            ..VolumeMount::default()
        });
    }

    let mut container = Container {
        name: "fluentd".into(),
        image: Some(IMAGE.into()),
        env: Some(env_vars(fd)),
        volume_mounts: Some(mounts),
        ..Container::default()
    };
    let mut pod = PodSpec {
        service_account_name: Some(owner.name.clone()),
        volumes: Some(volumes),
        ..PodSpec::default()
    };
    place(&mut pod, &mut container, fd.spec.kubernetes_config.as_ref());
    pod.containers = vec![container];

    Ok(DaemonSet {
        metadata: owner.meta(&owner.name, labels.clone()),
        spec: Some(DaemonSetSpec {
            selector: selector(&labels),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..ObjectMeta::default() }),
                spec: Some(pod),
            },
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    })
}
