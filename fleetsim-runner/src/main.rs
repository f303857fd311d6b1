// FleetSim Runner - Command-line fleet runner
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FleetSim Runner
//!
//! Provisions a fleet of simulated devices, writes their messages as JSON
//! lines and serves fleet metrics for Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Five devices of each built-in type, messages on stdout
//! fleetsim-runner --count 5
//!
//! # Custom types and routes, messages appended to a file
//! fleetsim-runner --types ./types --routes ./routes --output fleet.jsonl
//! ```

mod loader;
mod metrics;
mod output;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::Parser;
use fleetsim::presets;
use fleetsim::{
    DeviceCategory, FileRouteSource, Fleet, MemoryRouteSource, MessageSink, ProvisionParams,
    RouteSource, SimulatorConfig,
};
use loader::{load_config, load_types};
use metrics::{encode_metrics, update_device_metrics};
use output::JsonLinesSink;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// FleetSim fleet runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9200")]
    port: u16,

    /// Directory of device type JSON files (built-in types when absent)
    #[arg(short, long)]
    types: Option<PathBuf>,

    /// Directory of route JSON files (built-in routes when absent)
    #[arg(short, long)]
    routes: Option<PathBuf>,

    /// Devices to start per device type
    #[arg(short, long, default_value = "3")]
    count: usize,

    /// File to append messages to (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Simulator configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Exit once every device has finished
    #[arg(long, default_value = "false")]
    exit_when_done: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    fleet: Arc<Mutex<Fleet>>,
    device_types: Vec<String>,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing; stdout may carry the messages themselves
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("FleetSim Runner v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(ref path) => load_config(path).await?,
        None => SimulatorConfig::default(),
    };

    let types = match args.types {
        Some(ref dir) => load_types(dir).await?,
        None => {
            info!("No type directory given, using built-in device types");
            presets::device_types()
        }
    };

    let routes: Arc<dyn RouteSource> = match args.routes {
        Some(ref dir) => Arc::new(FileRouteSource::new(dir)),
        None => Arc::new(
            presets::routes()
                .into_iter()
                .fold(MemoryRouteSource::new(), MemoryRouteSource::with_route),
        ),
    };

    let sink: Arc<dyn MessageSink> = match args.output {
        Some(ref path) => {
            info!(path = %path.display(), "Writing messages to file");
            Arc::new(JsonLinesSink::append_to(path).await?)
        }
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let mut fleet = Fleet::new(config, sink, routes);
    let mut started = 0usize;
    for device_type in &types {
        for n in 0..args.count {
            let mut params = ProvisionParams::new("fleetsim-runner", device_type.clone());
            if let Some(seed) = args.seed {
                params = params.with_seed(seed.wrapping_add((started + n) as u64));
            }
            match fleet.provision(params).await {
                Ok(device) => {
                    fleet.start(device).await;
                }
                Err(e) => warn!(type_id = %device_type.type_id, error = %e, "Failed to provision device"),
            }
        }
        started += args.count;
    }
    info!(devices = fleet.stats().active_devices, types = types.len(), "Fleet started");

    let fleet = Arc::new(Mutex::new(fleet));
    let (done_tx, done_rx) = watch::channel(false);
    tokio::spawn(supervise(Arc::clone(&fleet), args.exit_when_done, done_tx));

    let state = Arc::new(AppState {
        fleet: Arc::clone(&fleet),
        device_types: types.iter().map(|t| t.type_id.clone()).collect(),
        start_time: std::time::Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(done_rx))
        .await?;

    let mut fleet = fleet.lock().await;
    let reports = fleet.stop_all().await;
    let stats = fleet.stats();
    info!(
        stopped = reports.len(),
        finished = stats.finished_devices,
        published = stats.messages_published,
        failures = stats.publish_failures,
        "Fleet shut down"
    );
    Ok(())
}

/// Reap finished devices and refresh the device gauges once a second.
async fn supervise(fleet: Arc<Mutex<Fleet>>, exit_when_done: bool, done: watch::Sender<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let mut fleet = fleet.lock().await;
        fleet.reap().await;

        let stats = fleet.stats();
        let per_category = [
            (
                DeviceCategory::Widget,
                fleet.active_in_category(DeviceCategory::Widget),
            ),
            (
                DeviceCategory::Automotive,
                fleet.active_in_category(DeviceCategory::Automotive),
            ),
        ];
        update_device_metrics(&stats, &per_category);

        if exit_when_done && stats.active_devices == 0 {
            let _ = done.send(true);
            return;
        }
    }
}

async fn shutdown_signal(mut done: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping fleet"),
        _ = done.wait_for(|finished| *finished) => info!("All devices finished"),
    }
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>FleetSim Runner</title></head>
<body>
    <h1>FleetSim Runner</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus metrics</li>
        <li><a href="/health">/health</a> - Health check</li>
        <li><a href="/ready">/ready</a> - Readiness check</li>
        <li><a href="/status">/status</a> - Fleet status (JSON)</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready while the fleet has devices running.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.fleet.lock().await.stats();
    if stats.active_devices > 0 {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "No devices running")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    device_types: Vec<String>,
    active_devices: usize,
    finished_devices: usize,
    messages_published: u64,
    publish_failures: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.fleet.lock().await.stats();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        device_types: state.device_types.clone(),
        active_devices: stats.active_devices,
        finished_devices: stats.finished_devices,
        messages_published: stats.messages_published,
        publish_failures: stats.publish_failures,
    })
}
