mod support;

use base64::Engine;
use lograft_core::{ClusterHealth, Elasticsearch};
use lograft_elastic::ElasticError;
use lograft_kubehub::{ObjectKind, StoreError, StoreOp};
use lograft_reconcile::{ProvisioningStep, Provisioner, ReconcileError};
use serde_json::json;
use support::{w, Harness};

const LOGS: &str = r#"
apiVersion: logging.lograft.io/v1beta1
kind: Elasticsearch
metadata: { name: logs, namespace: ns }
spec:
  esClusterName: logs
  esVersion: 8.10.0
  esMaster: { replicas: 3 }
"#;

fn with(extra: &str) -> String {
    format!("{LOGS}{extra}")
}

fn env_value(sts: &serde_json::Value, name: &str) -> Option<String> {
    sts.pointer("/spec/template/spec/containers/0/env")?
        .as_array()?
        .iter()
        .find(|v| v["name"] == name)
        .and_then(|v| v["value"].as_str())
        .map(str::to_string)
}

#[tokio::test]
async fn fresh_pass_creates_master_objects_and_reports_not_ready() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(
        h.writes(),
        [
            w(StoreOp::Create, ObjectKind::StatefulSet, "logs-master"),
            w(StoreOp::Create, ObjectKind::Service, "logs-master"),
            w(StoreOp::Create, ObjectKind::Service, "logs-master-headless"),
            w(StoreOp::UpdateStatus, ObjectKind::Elasticsearch, "logs"),
        ]
    );
    assert_eq!(report.health, ClusterHealth::NotReady);
    assert!(!report.status_conflict);

    let stored = h.stored(ObjectKind::Elasticsearch, "logs").unwrap();
    assert_eq!(stored["status"]["esClusterState"], "NotReady");
    assert_eq!(stored["status"]["esMaster"], 3);
    assert_eq!(stored["status"]["esVersion"], "8.10.0");
    assert!(stored["status"].get("esData").is_none());
}

#[tokio::test]
async fn rerun_only_writes_status() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);
    Provisioner::new(&h.ctx).run(&es).await.unwrap();

    h.cluster.set_health("green", 12);
    h.store.clear_calls();
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(h.writes(), [w(StoreOp::UpdateStatus, ObjectKind::Elasticsearch, "logs")]);
    assert_eq!(report.health, ClusterHealth::Ready);
    let stored = h.stored(ObjectKind::Elasticsearch, "logs").unwrap();
    assert_eq!(stored["status"]["esClusterState"], "Ready");
    assert_eq!(stored["status"]["activeShards"], 12);
}

#[tokio::test]
async fn tls_off_never_requests_a_certificate() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, &with("  esSecurity: { autoGeneratePassword: true }\n"));

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(report.steps[0], ProvisioningStep::SecuritySetup { tls: false, password: true });
    assert!(h.stored(ObjectKind::Secret, "logs-tls-cert").is_none());
    assert!(h.stored(ObjectKind::Secret, "logs-password").is_some());
    let sts = h.stored(ObjectKind::StatefulSet, "logs-master").unwrap();
    assert_eq!(env_value(&sts, "SCHEME").as_deref(), Some("http"));

    let probe = &h.cluster.calls()[0];
    assert_eq!(probe.op, "cluster_health");
    assert_eq!(probe.url, "http://logs-master.ns:9200");
}

#[tokio::test]
async fn security_objects_precede_workloads() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(
        ObjectKind::Elasticsearch,
        &with("  esSecurity: { tlsEnabled: true, autoGeneratePassword: true }\n"),
    );

    Provisioner::new(&h.ctx).run(&es).await.unwrap();

    let writes = h.writes();
    assert_eq!(writes[0], w(StoreOp::Create, ObjectKind::Secret, "logs-password"));
    assert_eq!(writes[1], w(StoreOp::Create, ObjectKind::Secret, "logs-tls-cert"));
    assert_eq!(writes[2], w(StoreOp::Create, ObjectKind::StatefulSet, "logs-master"));
    let sts = h.stored(ObjectKind::StatefulSet, "logs-master").unwrap();
    assert_eq!(env_value(&sts, "SCHEME").as_deref(), Some("https"));
    assert_eq!(h.cluster.calls()[0].url, "https://logs-master.ns:9200");
}

#[tokio::test]
async fn master_is_converged_before_dependent_roles() {
    let h = Harness::new();
    let es: Elasticsearch =
        h.declare(ObjectKind::Elasticsearch, &with("  esData: { replicas: 2 }\n  esClient: { replicas: 1 }\n"));

    Provisioner::new(&h.ctx).run(&es).await.unwrap();

    let workloads: Vec<_> = h
        .store
        .calls()
        .into_iter()
        .filter(|c| c.kind == ObjectKind::StatefulSet && c.op == StoreOp::Get)
        .map(|c| c.name)
        .collect();
    assert_eq!(workloads, ["logs-master", "logs-data", "logs-client"]);

    let writes = h.writes();
    let pos = |name: &str| writes.iter().position(|(_, _, n)| n == name).unwrap();
    assert!(pos("logs-master-headless") < pos("logs-data"));
    assert!(h.stored(ObjectKind::StatefulSet, "logs-ingestion").is_none());

    let stored = h.stored(ObjectKind::Elasticsearch, "logs").unwrap();
    assert_eq!(stored["status"]["esData"], 2);
    assert_eq!(stored["status"]["esClient"], 1);
}

#[tokio::test]
async fn integration_token_waits_for_a_ready_cluster() {
    let h = Harness::new();
    let yaml = with("  esSecurity: { kibanaIntegration: {} }\n");
    h.declare::<Elasticsearch>(ObjectKind::Elasticsearch, &yaml);

    for status in [None, Some("red")] {
        if let Some(s) = status {
            h.cluster.set_health(s, 0);
        }
        let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
        let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();
        assert_eq!(report.health, ClusterHealth::NotReady);
        assert!(report.steps.contains(&ProvisioningStep::ServiceIntegrationCredential));
    }
    assert!(!h.cluster.ops().contains(&"create_service_token"));
    assert!(h.stored(ObjectKind::Secret, "logs-sa-token").is_none());

    h.cluster.set_health("yellow", 4);
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    Provisioner::new(&h.ctx).run(&es).await.unwrap();
    let token = h.stored(ObjectKind::Secret, "logs-sa-token").unwrap();
    let expected = base64::engine::general_purpose::STANDARD.encode("mock-token");
    assert_eq!(token["data"]["token"], json!(expected));
    let issued = h.cluster.calls().into_iter().find(|c| c.op == "create_service_token").unwrap();
    assert_eq!(issued.target, "elastic/kibana/token-sa");

    h.cluster.clear_calls();
    h.store.clear_calls();
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    Provisioner::new(&h.ctx).run(&es).await.unwrap();
    assert!(!h.cluster.ops().contains(&"create_service_token"));
    assert!(!h.writes().iter().any(|(_, kind, _)| *kind == ObjectKind::Secret));
}

#[tokio::test]
async fn orphaned_service_token_is_reissued() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, &with("  esSecurity: { kibanaIntegration: {} }\n"));
    h.cluster.set_health("green", 3);
    // minted on an earlier pass whose secret write never landed
    h.cluster.insert_token("elastic", "kibana", "token-sa");

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(
        h.cluster.ops(),
        ["cluster_health", "create_service_token", "delete_service_token", "create_service_token"]
    );
    assert!(h.cluster.has_token("elastic", "kibana", "token-sa"));
    assert!(h.stored(ObjectKind::Secret, "logs-sa-token").is_some());
    assert_eq!(report.steps.last(), Some(&ProvisioningStep::StatusWritten));
    assert_eq!(h.stored(ObjectKind::Elasticsearch, "logs").unwrap()["status"]["esClusterState"], "Ready");
}

#[tokio::test]
async fn refused_service_token_still_records_status() {
    let h = Harness::new();
    let yaml = with("  esSecurity: { kibanaIntegration: {} }\n");
    h.declare::<Elasticsearch>(ObjectKind::Elasticsearch, &yaml);
    h.cluster.set_health("green", 5);
    h.cluster.set_token(Err(ElasticError::Status { code: 409, body: "version_conflict_engine_exception".into() }));

    for _ in 0..3 {
        let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
        let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();
        assert_eq!(report.health, ClusterHealth::Ready);
        assert!(!report.status_conflict);
    }

    let stored = h.stored(ObjectKind::Elasticsearch, "logs").unwrap();
    assert_eq!(stored["status"]["esClusterState"], "Ready");
    assert_eq!(stored["status"]["activeShards"], 5);
    assert!(h.stored(ObjectKind::Secret, "logs-sa-token").is_none());

    h.cluster.set_token(Ok("late-token".into()));
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    Provisioner::new(&h.ctx).run(&es).await.unwrap();
    assert!(h.stored(ObjectKind::Secret, "logs-sa-token").is_some());
}

#[tokio::test]
async fn undecodable_health_reads_as_not_ready_and_the_pass_continues() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, &with("  esSecurity: { kibanaIntegration: {} }\n"));
    h.cluster.fail_health(ElasticError::Decode("expected value at line 1 column 1".into()));

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(report.health, ClusterHealth::NotReady);
    assert_eq!(report.steps.last(), Some(&ProvisioningStep::StatusWritten));
    assert_eq!(h.cluster.ops(), ["cluster_health"]);
    let stored = h.stored(ObjectKind::Elasticsearch, "logs").unwrap();
    assert_eq!(stored["status"]["esClusterState"], "NotReady");
}

#[tokio::test]
async fn credentials_are_never_rewritten() {
    let h = Harness::new();
    let yaml = with("  esSecurity: { tlsEnabled: true, autoGeneratePassword: true }\n");
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, &yaml);
    Provisioner::new(&h.ctx).run(&es).await.unwrap();
    let first = h.stored(ObjectKind::Secret, "logs-password").unwrap();

    h.store.clear_calls();
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(h.stored(ObjectKind::Secret, "logs-password").unwrap()["data"], first["data"]);
    assert!(!h.writes().iter().any(|(_, kind, _)| *kind == ObjectKind::Secret));
}

#[tokio::test]
async fn health_check_reads_the_referenced_password_secret() {
    let h = Harness::new();
    let es: Elasticsearch =
        h.declare(ObjectKind::Elasticsearch, &with("  esSecurity: { existingSecret: mine }\n"));
    h.store.insert(
        ObjectKind::Secret,
        json!({ "metadata": { "name": "mine", "namespace": "ns" }, "data": { "password": "aHVudGVyMg==" } }),
    );
    h.cluster.set_health("green", 1);

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();
    assert_eq!(report.health, ClusterHealth::Ready);

    // without the referenced secret the probe is skipped and the cluster reads as not ready
    let other: Elasticsearch = h.declare(
        ObjectKind::Elasticsearch,
        r#"
apiVersion: logging.lograft.io/v1beta1
kind: Elasticsearch
metadata: { name: other, namespace: ns }
spec:
  esClusterName: other
  esVersion: 8.10.0
  esSecurity: { existingSecret: absent }
"#,
    );
    let report = Provisioner::new(&h.ctx).run(&other).await.unwrap();
    assert_eq!(report.health, ClusterHealth::NotReady);
}

#[tokio::test]
async fn status_conflict_asks_for_a_rerun() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);
    h.store.fail_next(StoreOp::UpdateStatus, ObjectKind::Elasticsearch, StoreError::Conflict("stale".into()));

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();
    assert!(report.status_conflict);
}

#[tokio::test]
async fn stale_declaration_conflicts_on_status() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);
    h.store.mutate(ObjectKind::Elasticsearch, Some("ns"), "logs", |o| o["metadata"]["labels"] = json!({"team": "obs"}));

    let report = Provisioner::new(&h.ctx).run(&es).await.unwrap();
    assert!(report.status_conflict);
    assert!(h.stored(ObjectKind::Elasticsearch, "logs").unwrap().get("status").is_none());
}

#[tokio::test]
async fn store_failure_aborts_the_rest_of_the_pass() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);
    h.store.fail_next(StoreOp::Create, ObjectKind::StatefulSet, StoreError::Transport("connection reset".into()));

    let err = Provisioner::new(&h.ctx).run(&es).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store(StoreError::Transport(_))), "{err:?}");
    assert!(h.writes().iter().all(|(op, kind, _)| *op == StoreOp::Create && *kind == ObjectKind::StatefulSet));
    assert!(h.cluster.calls().is_empty());
}

#[tokio::test]
async fn drifted_master_is_restored_with_one_update() {
    let h = Harness::new();
    let es: Elasticsearch = h.declare(ObjectKind::Elasticsearch, LOGS);
    Provisioner::new(&h.ctx).run(&es).await.unwrap();
    h.store.mutate(ObjectKind::StatefulSet, Some("ns"), "logs-master", |o| o["spec"]["replicas"] = json!(1));

    h.store.clear_calls();
    let es: Elasticsearch = h.latest(ObjectKind::Elasticsearch, "logs");
    Provisioner::new(&h.ctx).run(&es).await.unwrap();

    assert_eq!(
        h.writes(),
        [
            w(StoreOp::Update, ObjectKind::StatefulSet, "logs-master"),
            w(StoreOp::UpdateStatus, ObjectKind::Elasticsearch, "logs"),
        ]
    );
    assert_eq!(h.stored(ObjectKind::StatefulSet, "logs-master").unwrap()["spec"]["replicas"], 3);
}

#[tokio::test]
async fn declaration_without_namespace_is_rejected() {
    let h = Harness::new();
    let es: Elasticsearch = serde_yaml::from_str(&LOGS.replace(", namespace: ns", "")).unwrap();
    let err = Provisioner::new(&h.ctx).run(&es).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MissingNamespace(_)));
    assert!(h.store.calls().is_empty());
}
