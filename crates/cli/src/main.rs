use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use kube::CustomResourceExt;
use lograft_core::{Elasticsearch, Fluentd, IndexLifecycle, IndexTemplate, Kibana};
use lograft_elastic::HttpClusterApi;
use lograft_kubehub::{KubeStore, LeaderLease};
use lograft_reconcile::{controller, Context, ReconcileConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lograft", version, about = "Logging stack operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers
    Run(RunArgs),
    /// Print the custom resource definitions as a YAML stream
    Crd,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Prometheus listener, `host:port` or `:port`
    #[arg(long = "metrics-addr", env = "LOGRAFT_METRICS_ADDR", default_value = ":8080")]
    metrics_addr: String,

    /// Only reconcile while holding the leader lease
    #[arg(long = "leader-elect", env = "LOGRAFT_LEADER_ELECT", action = ArgAction::SetTrue)]
    leader_elect: bool,

    /// Watch a single namespace (default: all)
    #[arg(long = "namespace", env = "LOGRAFT_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long = "requeue-secs", env = "LOGRAFT_REQUEUE_SECS", default_value_t = 10)]
    requeue_secs: u64,

    /// Timeout for calls to a cluster's management API
    #[arg(long = "elastic-timeout-secs", env = "LOGRAFT_ELASTIC_TIMEOUT_SECS", default_value_t = 10)]
    elastic_timeout_secs: u64,

    #[arg(long = "lease-namespace", env = "LOGRAFT_LEASE_NAMESPACE", default_value = "default")]
    lease_namespace: String,
}

const LEASE_NAME: &str = "lograft-leader";
const LEASE_DURATION: Duration = Duration::from_secs(15);

fn init_tracing() {
    let env = std::env::var("LOGRAFT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// `:8080` listens on every interface.
fn metrics_socket(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') { format!("0.0.0.0{addr}") } else { addr.to_string() };
    full.parse::<SocketAddr>().with_context(|| format!("invalid metrics address {addr:?}; expected host:port"))
}

fn init_metrics(addr: &str) -> Result<()> {
    let sock = metrics_socket(addr)?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(sock)
        .install()
        .context("installing metrics exporter")?;
    info!(addr = %sock, "Prometheus metrics exporter listening");
    Ok(())
}

fn crd_stream() -> Result<String> {
    let crds = [Elasticsearch::crd(), Kibana::crd(), Fluentd::crd(), IndexTemplate::crd(), IndexLifecycle::crd()];
    let mut docs = Vec::with_capacity(crds.len());
    for crd in &crds {
        docs.push(serde_yaml::to_string(crd).context("rendering CRD")?);
    }
    Ok(docs.iter().map(|d| format!("---\n{d}")).collect())
}

async fn run(args: RunArgs) -> Result<()> {
    init_metrics(&args.metrics_addr)?;
    let client = lograft_kubehub::get_kube_client().await.context("connecting to the cluster")?;

    let lost = if args.leader_elect {
        let lease = LeaderLease::new(client.clone(), &args.lease_namespace, LEASE_NAME, LEASE_DURATION);
        info!(identity = %lease.identity(), namespace = %args.lease_namespace, "waiting for leadership");
        Some(lease.hold().await)
    } else {
        None
    };

    let cluster = HttpClusterApi::new(Duration::from_secs(args.elastic_timeout_secs)).context("building HTTP client")?;
    let config = ReconcileConfig { requeue: Duration::from_secs(args.requeue_secs), ..ReconcileConfig::default() };
    let ctx = Arc::new(Context::new(Arc::new(KubeStore::new(client.clone())), Arc::new(cluster), config));

    let controllers = controller::run(client, ctx, args.namespace.as_deref());
    match lost {
        Some(lost) => {
            tokio::select! {
                _ = controllers => {}
                _ = lost => {
                    warn!("leadership lost; exiting");
                    anyhow::bail!("leader lease lost");
                }
            }
        }
        None => controllers.await,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Crd => {
            print!("{}", crd_stream()?);
            Ok(())
        }
    }
}
