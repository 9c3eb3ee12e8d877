use std::sync::Arc;

use clap::Parser;
use cluster_turndown_core::config::{self, Config};
use cluster_turndown_providers::select;
use cluster_turndown_store::{ScheduleStoreImplementation, in_memory::InMemoryScheduleStore, kube_store::KubeScheduleStore};
use main_error::MainError;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{args::Args, manager::TurndownManager, metrics::Metrics};

mod args;
mod http_server;
mod manager;
mod metrics;
mod scheduler;
mod strategy;
mod tracing;

/// Readiness probes run against the cloud API before the reconciler starts; see
/// `ProviderAdapter::validate` / `TurndownStrategy::validate`.
const STARTUP_VALIDATION_ATTEMPTS: u32 = 3;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to read configuration"))]
    ReadConfig { source: config::Error },

    #[snafu(display("Failed to select a cloud provider"))]
    SelectProvider { source: select::Error },

    #[snafu(display("Failed to create Kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display("Failed to set up metrics"))]
    SetUpMetrics { source: metrics::Error },

    #[snafu(display("Provider readiness validation failed at startup"))]
    ValidateProvider { source: strategy::Error },

    #[snafu(display("Failed to start HTTP server"))]
    StartHttpServer { source: http_server::Error },
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    tracing::init();

    let args = Args::parse();

    let config = Config::read_from_file(&args.config_file)
        .await
        .context(ReadConfigSnafu)?;

    let kube_client = kube::Client::try_default()
        .await
        .context(CreateKubeClientSnafu)?;

    let provider = Arc::new(
        select::select_provider(kube_client.clone(), &config.provider)
            .await
            .context(SelectProviderSnafu)?,
    );

    let metrics = Arc::new(Metrics::new().context(SetUpMetricsSnafu)?);

    let schedule_store: Arc<ScheduleStoreImplementation> = Arc::new(match config.schedule_store {
        config::ScheduleStoreConfig::Kube => KubeScheduleStore::new(kube_client.clone()).into(),
        config::ScheduleStoreConfig::InMemory => InMemoryScheduleStore::default().into(),
    });

    let strategy = strategy::select_strategy(
        Arc::clone(&provider),
        kube_client.clone(),
        Arc::clone(&metrics),
    );

    strategy
        .validate(STARTUP_VALIDATION_ATTEMPTS)
        .await
        .context(ValidateProviderSnafu)?;

    let manager = Arc::new(TurndownManager::new(strategy, Arc::clone(&schedule_store)));

    let (wake_tx, wake_rx) = mpsc::channel(8);

    if matches!(config.schedule_store, config::ScheduleStoreConfig::Kube) {
        scheduler::spawn_kube_watch_forwarder(kube_client.clone(), wake_tx.clone());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            http_server::wait_for_shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let scheduler_handle = tokio::spawn(scheduler::run(
        Arc::clone(&manager),
        Arc::clone(&schedule_store),
        wake_rx,
        shutdown.clone(),
    ));

    http_server::start_http_server(config.ports, schedule_store, Arc::clone(&manager), metrics, wake_tx)
        .await
        .context(StartHttpServerSnafu)?;

    shutdown.cancel();
    let _ = scheduler_handle.await;

    Ok(())
}
