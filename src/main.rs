//! Adaptive Cache - simulated workload driver
//!
//! Builds a `CacheEngine`, registers a set of namespaces and drives them with
//! concurrent callers against a slow, occasionally failing data source.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adaptive_cache::{CacheEngine, Config, FetchStrategy, NamespaceConfig};

/// Synthetic record served by the fake data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: u64,
    body: String,
    loaded_at: i64,
}

/// Simulated data source latency.
const FETCH_LATENCY: Duration = Duration::from_millis(20);

/// One fetch in this many fails.
const FETCH_FAILURE_RATE: u32 = 20;

/// Pause between two requests of a worker.
const REQUEST_PAUSE: Duration = Duration::from_millis(5);

/// Main entry point for the simulation.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the engine and its namespaces
/// 4. Start the simulated callers and the stats reporter
/// 5. On SIGINT/SIGTERM, stop the workload and tear the engine down
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adaptive_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Adaptive Cache simulation");

    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let namespaces = resolve_namespaces(
        config
            .load_namespaces()
            .context("Failed to load namespace definitions")?,
    );

    let engine = Arc::new(CacheEngine::new(config.clone()));
    for ns in namespaces {
        engine.create_namespace(ns).await?;
    }

    let names = engine.namespaces().await;
    let mut handles: Vec<JoinHandle<()>> = (0..config.sim_workers.max(1))
        .map(|id| {
            spawn_worker(
                Arc::clone(&engine),
                names.clone(),
                id as u64,
                config.sim_key_space.max(1),
            )
        })
        .collect();
    handles.push(spawn_reporter(
        Arc::clone(&engine),
        Duration::from_secs(config.report_interval.max(1)),
    ));
    info!(workers = config.sim_workers, namespaces = names.len(), "Workload started");

    shutdown_signal().await;

    for handle in handles {
        handle.abort();
    }
    warn!("Workload aborted");

    report(&engine).await;
    engine.cleanup().await;

    info!("Simulation shutdown complete");
    Ok(())
}

/// Picks the namespaces to create: the file's list, or the defaults when
/// no file is set or it defines none.
fn resolve_namespaces(loaded: Option<Vec<NamespaceConfig>>) -> Vec<NamespaceConfig> {
    match loaded {
        Some(namespaces) if !namespaces.is_empty() => namespaces,
        Some(_) => {
            warn!("Namespace file defines no namespaces, using the defaults");
            default_namespaces()
        }
        None => default_namespaces(),
    }
}

/// Namespaces used when no definition file is configured.
fn default_namespaces() -> Vec<NamespaceConfig> {
    vec![
        NamespaceConfig::new("profiles")
            .with_strategy(FetchStrategy::CacheFirst)
            .with_compression(true)
            .with_max_age(Duration::from_secs(30)),
        NamespaceConfig::new("feed")
            .with_strategy(FetchStrategy::StaleWhileRevalidate)
            .with_max_size(2 * 1024 * 1024)
            .with_max_age(Duration::from_secs(5)),
        NamespaceConfig::new("sessions")
            .with_strategy(FetchStrategy::NetworkFirst)
            .with_encryption(true)
            .with_max_age(Duration::from_secs(60)),
    ]
}

// == Workload ==
fn spawn_worker(
    engine: Arc<CacheEngine>,
    namespaces: Vec<String>,
    id: u64,
    key_space: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if namespaces.is_empty() {
            warn!(worker = id, "No namespaces to drive, worker exiting");
            return;
        }

        let mut rng = StdRng::seed_from_u64(id);
        loop {
            let ns = &namespaces[rng.random_range(0..namespaces.len())];
            // Squaring skews traffic towards low ids so some keys are hot
            let r = rng.random_range(0..key_space);
            let record_id = (u128::from(r) * u128::from(r) / u128::from(key_space)) as u64;
            let fail = rng.random_ratio(1, FETCH_FAILURE_RATE);

            let key = format!("record:{}", record_id);
            let result = engine
                .get_with::<Record, _, _>(ns, &key, move || fetch_record(record_id, fail))
                .await;
            match result {
                Ok(Some(record)) => debug!(namespace = %ns, id = record.id, "Served record"),
                Ok(None) => debug!(namespace = %ns, key = %key, "No record"),
                Err(e) => debug!(namespace = %ns, key = %key, "Request failed: {}", e),
            }

            tokio::time::sleep(REQUEST_PAUSE).await;
        }
    })
}

async fn fetch_record(id: u64, fail: bool) -> anyhow::Result<Record> {
    tokio::time::sleep(FETCH_LATENCY).await;
    if fail {
        anyhow::bail!("data source unavailable for record {}", id);
    }
    Ok(Record {
        id,
        body: format!("record {} ", id).repeat(32),
        loaded_at: chrono::Utc::now().timestamp_millis(),
    })
}

// == Reporting ==
fn spawn_reporter(engine: Arc<CacheEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            report(&engine).await;
        }
    })
}

async fn report(engine: &CacheEngine) {
    for name in engine.namespaces().await {
        if let Some(stats) = engine.get_stats(&name).await {
            info!(
                namespace = %name,
                requests = stats.total_requests,
                hit_rate = stats.hit_rate(),
                entries = stats.entry_count,
                total_size = stats.total_size,
                max_size = stats.max_size,
                evictions = stats.evictions,
                avg_response_ms = stats.avg_response_time_ms,
                "Namespace stats"
            );
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
