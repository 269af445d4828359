use amqp_scenario_engine::broker::{LapinBroker, redact_url};
use amqp_scenario_engine::ops::{Subscription, drain};
use amqp_scenario_engine::{
    Context, Engine, EngineConfig, MetricsSink, Placeholders, Scenario, ScenarioSpec,
};
use anyhow::Context as _;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Script file: optional engine config plus the scenarios every virtual user runs
#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    amqp: Option<Value>,
    scenarios: Vec<ScenarioSpec>,
}

#[derive(Debug, Default)]
struct Summary {
    completed: u64,
    failed: u64,
    received: u64,
    pending: u64,
}

impl Summary {
    fn merge(&mut self, other: Summary) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.received += other.received;
        self.pending += other.pending;
    }
}

/// Initialize the Prometheus metrics recorder
fn setup_prometheus_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    if let Ok(val) = env::var(name)
        && let Ok(parsed) = val.parse()
    {
        return parsed;
    }
    default
}

/// One virtual user: every scenario, `iterations` times, in order
async fn virtual_user(
    vu: usize,
    iterations: usize,
    scenarios: Arc<Vec<Scenario>>,
) -> (Summary, Vec<Subscription>) {
    let mut summary = Summary::default();
    let mut subscriptions = Vec::new();

    for iteration in 0..iterations {
        for scenario in scenarios.iter() {
            let mut context = Context::new();
            context.set_var("vu", vu);
            context.set_var("iteration", iteration);

            let run = scenario.run(context).await;
            match run.result {
                Ok(()) => summary.completed += 1,
                Err(e) => {
                    warn!("VU {} iteration {} failed: {}", vu, iteration, e);
                    summary.failed += 1;
                }
            }
            subscriptions.extend(run.subscriptions);
        }
    }

    (summary, subscriptions)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must be installed before any metric is recorded
    let prometheus_handle = setup_prometheus_metrics()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amqp_scenario_engine=info,amqp_scenario=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = env::args()
        .nth(1)
        .context("usage: amqp-scenario <script.json>")?;
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read script {}", path))?;
    let script: Script = serde_json::from_str(&raw).context("Invalid script")?;

    // Script config wins over the environment
    let config = match script.amqp {
        Some(value) => EngineConfig::from_json(value).context("Invalid amqp section")?,
        None => EngineConfig::from_env(),
    };
    info!(
        "Target: {} (channel strategy {:?}, subscribe timeout {:?})",
        redact_url(&config.url),
        config.channel_strategy,
        config.subscribe_timeout
    );

    let vus: usize = env_number("VUS", 1);
    let iterations: usize = env_number("ITERATIONS", 1);
    let drain_timeout = Duration::from_millis(env_number("DRAIN_TIMEOUT_MS", 5000));

    let engine = Engine::new(
        config,
        Arc::new(LapinBroker::new()),
        Arc::new(Placeholders),
        Arc::new(MetricsSink),
    );
    let scenarios: Arc<Vec<Scenario>> = Arc::new(
        script
            .scenarios
            .into_iter()
            .map(|spec| engine.create_scenario(spec))
            .collect(),
    );
    info!(
        "Running {} scenario(s) for {} VU(s) x {} iteration(s)",
        scenarios.len(),
        vus,
        iterations
    );

    let started_at = Instant::now();
    let mut tasks = JoinSet::new();
    for vu in 0..vus {
        tasks.spawn(virtual_user(vu, iterations, Arc::clone(&scenarios)));
    }

    let mut summary = Summary::default();
    let mut subscriptions = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((vu_summary, vu_subscriptions)) => {
                summary.merge(vu_summary);
                subscriptions.extend(vu_subscriptions);
            }
            Err(e) => warn!("Virtual user task failed: {}", e),
        }
    }

    let report = drain(subscriptions, drain_timeout).await;
    summary.received += report.received;
    summary.pending += report.pending;

    engine.cleanup().await;

    info!(
        "Finished in {:?}: {} completed, {} failed, {} received, {} consumer(s) pending",
        started_at.elapsed(),
        summary.completed,
        summary.failed,
        summary.received,
        summary.pending
    );
    println!("{}", prometheus_handle.render());

    Ok(())
}
