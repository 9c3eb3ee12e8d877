use std::{
    collections::HashMap,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_server::Handle;
use chrono::{DateTime, Utc};
use cluster_turndown_core::{
    config::PortsConfig,
    schedule::{
        Repeat, ScheduleDirection, ScheduleState, TurndownSchedule, TurndownScheduleSpec, TurndownScheduleStatus,
    },
};
use cluster_turndown_store::{ScheduleStore, ScheduleStoreImplementation};
use futures::FutureExt;
use kube::api::ObjectMeta;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio::{sync::mpsc, time::sleep};
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer, trace::TraceLayer,
};
use tracing::{info, instrument, warn};

use crate::{manager::TurndownManager, metrics::Metrics};

mod metrics;

/// Fixed name of the singleton schedule resource; `POST /schedule` always creates or replaces
/// this one object.
const SCHEDULE_NAME: &str = "cluster-turndown";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to start HTTP server"))]
    StartHttpServer { source: std::io::Error },
}

#[derive(Snafu, Debug)]
pub enum HandlerError {
    #[snafu(display("schedule end must be after its start"))]
    InvalidWindow,

    #[snafu(display("a one-shot schedule's start must be in the future"))]
    StartAlreadyElapsed,

    #[snafu(display("schedule store error"), context(false))]
    Store {
        source: cluster_turndown_store::Error,
    },

    #[snafu(display("turndown manager error"), context(false))]
    Manager { source: crate::manager::Error },
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = match self {
            HandlerError::InvalidWindow | HandlerError::StartAlreadyElapsed => StatusCode::BAD_REQUEST,
            HandlerError::Store { .. } | HandlerError::Manager { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(error = ?self, "error handling request");
        (status, self.to_string()).into_response()
    }
}

pub struct AppState {
    pub schedule_store: Arc<ScheduleStoreImplementation>,
    pub manager: Arc<TurndownManager>,
    pub metrics: Arc<Metrics>,
    /// Nudges the Scheduler to reconcile immediately instead of waiting for its next timer
    /// fire or kube watch event.
    pub wake: mpsc::Sender<()>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    repeat: Repeat,
}

#[instrument(skip(state, body))]
async fn post_schedule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleRequest>,
) -> Result<StatusCode, HandlerError> {
    if body.end <= body.start {
        return Err(HandlerError::InvalidWindow);
    }
    if body.repeat == Repeat::None && body.start <= Utc::now() {
        return Err(HandlerError::StartAlreadyElapsed);
    }

    let metadata = match state.schedule_store.get().await? {
        Some(existing) => existing.metadata,
        None => ObjectMeta {
            name: Some(SCHEDULE_NAME.to_string()),
            ..Default::default()
        },
    };

    let schedule = TurndownSchedule {
        metadata,
        spec: TurndownScheduleSpec {
            start: body.start,
            end: body.end,
            repeat: body.repeat,
        },
        status: Some(TurndownScheduleStatus {
            state: ScheduleState::ScheduleSuccess,
            current: ScheduleDirection::ScaleDown,
            next_scale_down_time: Some(body.start),
            next_scale_up_time: Some(body.end),
            last_updated: None,
            finished: false,
            error: None,
            original_pool_sizes: HashMap::new(),
        }),
    };

    state.schedule_store.update(schedule).await?;
    let _ = state.wake.try_send(());
    info!("schedule created/replaced");
    Ok(StatusCode::OK)
}

/// Triggers an immediate scaleup (a no-op if the cluster was never turned down) and only deletes
/// the schedule once that scaleup has completed, so cancelling while the cluster is scaled down
/// never abandons it there.
#[instrument(skip(state))]
async fn post_cancel(State(state): State<Arc<AppState>>) -> Result<StatusCode, HandlerError> {
    let Some(schedule) = state.schedule_store.get().await? else {
        return Ok(StatusCode::OK);
    };
    let name = schedule.metadata.name.unwrap_or_default();
    state.manager.turnup(&name).await?;
    state.schedule_store.delete(&name).await?;
    let _ = state.wake.try_send(());
    info!(name, "schedule cancelled");
    Ok(StatusCode::OK)
}

pub async fn start_http_server(
    ports: PortsConfig,
    schedule_store: Arc<ScheduleStoreImplementation>,
    manager: Arc<TurndownManager>,
    metrics: Arc<Metrics>,
    wake: mpsc::Sender<()>,
) -> Result<(), Error> {
    let app_state = Arc::new(AppState {
        schedule_store,
        manager,
        metrics,
        wake,
    });

    // Prometheus metrics exporter, on its own port so it can stay up independently of the
    // schedule front.
    let metrics_app = Router::new()
        .route("/", get(|| async { Redirect::permanent("/metrics") }))
        .route("/metrics", get(metrics::get))
        .with_state(Arc::clone(&app_state));
    let metrics_listen_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, ports.metrics));
    info!(%metrics_listen_addr, "Starting metrics exporter");

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let handle_clone = handle.clone();
    tokio::spawn(async move {
        axum_server::bind(metrics_listen_addr)
            .handle(handle_clone)
            .serve(metrics_app.into_make_service())
            .await
    });

    let app = Router::new()
        .route("/schedule", post(post_schedule))
        .route("/cancel", post(post_cancel))
        .layer(TraceLayer::new_for_http())
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .with_state(app_state);

    let listen_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, ports.http));
    info!(%listen_addr, "Starting server");

    axum_server::bind(listen_addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context(StartHttpServerSnafu)?;

    info!("Shut down");

    Ok(())
}

async fn graceful_shutdown(handle: Handle) {
    wait_for_shutdown_signal().await;

    info!("Shutting down gracefully");

    handle.graceful_shutdown(Some(Duration::from_secs(5)));
    loop {
        info!(
            connections = handle.connection_count(),
            "Waiting for all connections to close"
        );
        sleep(Duration::from_secs(1)).await;
    }
}

pub async fn wait_for_shutdown_signal() {
    futures::future::select(
        tokio::signal::ctrl_c().map(|_| ()).boxed(),
        #[cfg(unix)]
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .unwrap()
            .recv()
            .map(|_| ())
            .boxed(),
        #[cfg(not(unix))]
        futures::future::pending::<()>(),
    )
    .await;
}
