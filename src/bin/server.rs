use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use evac_sim::config::SimConfig;
use evac_sim::error::SimError;
use evac_sim::simulation::{Scenario, Simulation};
use evac_sim::types::{RunReport, Snapshot};
use evac_sim::world::WorldHandle;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Debug, Default)]
struct ServerState {
    seed: u32,
    snapshot: Option<Snapshot>,
    report: Option<RunReport>,
    failure: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), SimError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let speed = std::env::var("EVAC_SPEED")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(1.0);

    let mut config = SimConfig::default();
    config.timings = config.timings.scaled(speed);
    let seed = config.seed.unwrap_or_else(rand::random::<u32>);
    let simulation = Simulation::start(Scenario::generate(seed, &config.building), &config)?;

    let state = Arc::new(Mutex::new(ServerState {
        seed,
        ..ServerState::default()
    }));
    start_snapshot_loop(state.clone(), simulation.world(), config.timings.tick());
    start_run(state.clone(), simulation);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/report", get(report_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!(port, seed, speed, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn snapshot_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    match guard.snapshot.as_ref() {
        Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "simulation has not produced a snapshot yet" })),
        ),
    }
}

async fn report_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    if let Some(failure) = guard.failure.as_ref() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "seed": guard.seed, "error": failure })),
        );
    }
    match guard.report.as_ref() {
        Some(report) => (StatusCode::OK, Json(json!(report))),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "seed": guard.seed, "running": true })),
        ),
    }
}

/// Copies a fresh snapshot out of the world actor once per tick until the
/// actor stops. Handlers only ever read the cached copy.
fn start_snapshot_loop(state: SharedState, world: WorldHandle, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let Ok(snapshot) = world.snapshot().await else {
                break;
            };
            let mut guard = state.lock().await;
            if guard.report.is_some() {
                break;
            }
            guard.snapshot = Some(snapshot);
        }
    });
}

fn start_run(state: SharedState, simulation: Simulation) {
    tokio::spawn(async move {
        let result = simulation.finish().await;
        let mut guard = state.lock().await;
        match result {
            Ok(finished) => {
                info!(seed = guard.seed, outcome = ?finished.report.outcome, "run complete");
                if finished.report.evacuated < finished.report.total_agents {
                    warn!(
                        evacuated = finished.report.evacuated,
                        total = finished.report.total_agents,
                        "run ended with occupants still inside"
                    );
                }
                guard.snapshot = Some(finished.snapshot);
                guard.report = Some(finished.report);
            }
            Err(err) => {
                error!(seed = guard.seed, error = %err, "run failed");
                guard.failure = Some(err.to_string());
            }
        }
    });
}
