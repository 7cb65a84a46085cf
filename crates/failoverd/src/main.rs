//! failoverd - DNS failover controller daemon
//!
//! This is a thin integration layer: all reconciliation logic lives in
//! `failover-core`. `failoverd`'s job is to:
//! 1. Load and validate configuration from environment variables.
//! 2. Construct the leaf collaborators (Cloudflare client, Kubernetes
//!    health probe, DNS observer, state store) and wire them into a
//!    `ReconcileEngine`.
//! 3. Run the periodic/triggered reconcile loop alongside an HTTP control
//!    surface.
//!
//! ## Configuration
//!
//! All configuration is via `FAILOVER_`-prefixed environment variables.
//! See `failover_core::config::Configuration::from_env` for the full list.

use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::{error, info, warn};

use failover_core::config::{Configuration, LogFormat};
use failover_core::{
    DnsObserver, OperationalState, OperationalStateStore, ReconcileEngine, ReconcileEvent,
    ResolverDnsObserver, TriggerHandle, TriggerMux,
};
use failover_health_k8s::KubernetesHealthProbe;
use failover_provider_cloudflare::CloudflareClient;

/// Exit codes follow systemd conventions: 0 clean, 1 config/startup error,
/// 2 unexpected runtime error.
#[derive(Debug, Clone, Copy)]
enum FailoverExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<FailoverExitCode> for ExitCode {
    fn from(code: FailoverExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Configuration::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return FailoverExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("configuration validation error: {e}");
        return FailoverExitCode::ConfigError.into();
    }

    init_tracing(&config);

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {e}");
            return FailoverExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run(config).await {
            Ok(()) => FailoverExitCode::CleanShutdown,
            Err(e) => {
                error!(error = %e, "daemon exited with error");
                FailoverExitCode::RuntimeError
            }
        }
    });

    result.into()
}

fn init_tracing(config: &Configuration) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn run(config: Configuration) -> anyhow::Result<()> {
    info!(hostname = %config.hostname, "starting failoverd");

    let store: Arc<dyn OperationalStateStore> = match &config.state_store_path {
        Some(path) => {
            info!(path, "using file-backed operational state store");
            Arc::new(failover_core::state_store::FileOperationalStateStore::new(path))
        }
        None => {
            warn!("no FAILOVER_STATE_STORE_PATH set, using in-memory state (lost on restart)");
            Arc::new(failover_core::state_store::MemoryOperationalStateStore::new())
        }
    };
    let initial_state = store.load().await?;

    let dns_observer: Arc<dyn DnsObserver> = Arc::new(ResolverDnsObserver::new(
        config.hostname.clone(),
        config.failover_address.clone(),
        config.cdn_address_prefixes.clone(),
    ));

    let provider = Arc::new(CloudflareClient::new(
        config.cloudflare_api_token.clone(),
        config.cloudflare_zone_id.clone(),
        config.cloudflare_account_id.clone(),
        config.tunnel_id.clone(),
        config.cdn_tunnel_suffix.clone(),
        config.failover_address.clone(),
    ));

    let health_probe = Arc::new(
        KubernetesHealthProbe::try_default(
            config.k8s_namespace.clone(),
            config.k8s_label_selector.clone(),
            config.min_primary_replicas,
        )
        .await?,
    );

    let reconcile_interval = config.reconcile_interval;
    let http_bind_addr = config.http_bind_addr.clone();

    let (engine, mut events) = ReconcileEngine::new(
        config,
        health_probe,
        dns_observer,
        provider,
        store,
        initial_state,
    );
    let engine = Arc::new(engine);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_reconcile_event(event);
        }
    });

    let mux = TriggerMux::new(engine.clone(), reconcile_interval);
    let trigger = mux.handle();
    let mux_handle = tokio::spawn(mux.run());

    let app_state = AppState { engine, trigger };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .route("/state", get(state_handler))
        .route("/reconcile", post(reconcile_handler))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(http_bind_addr.as_str()).await?;
    info!(addr = %http_bind_addr, "http control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    mux_handle.abort();
    info!("failoverd shut down cleanly");
    Ok(())
}

fn log_reconcile_event(event: ReconcileEvent) {
    match event {
        ReconcileEvent::DriftCorrected { from, to } => {
            warn!(?from, ?to, "drift corrected");
        }
        ReconcileEvent::StabilizationStarted { phase } => {
            info!(%phase, "stabilization started");
        }
        ReconcileEvent::StabilizationAborted { reason } => {
            info!(reason, "stabilization aborted");
        }
        ReconcileEvent::Committed { target, phase } => {
            info!(?target, %phase, "commit succeeded");
        }
        ReconcileEvent::CommitFailed { target, error } => {
            error!(?target, error, "commit failed");
        }
        ReconcileEvent::Reconciled => {}
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[derive(Clone)]
struct AppState {
    engine: Arc<ReconcileEngine>,
    trigger: TriggerHandle,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "current_target": snapshot.current_target,
        "phase": snapshot.phase,
    }))
}

async fn state_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot: OperationalState = state.engine.snapshot().await;
    Json(snapshot)
}

async fn reconcile_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.trigger.trigger();
    (StatusCode::OK, Json(serde_json::json!({"status": "ok", "action": "triggered_reconciliation"})))
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    alerts: Vec<WebhookAlert>,
}

#[derive(Debug, Deserialize)]
struct WebhookAlert {
    #[serde(default)]
    labels: WebhookAlertLabels,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookAlertLabels {
    #[serde(default)]
    alertname: String,
}

async fn webhook_handler(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> impl IntoResponse {
    let mut dual_failure = false;
    for alert in &envelope.alerts {
        info!(
            alertname = %alert.labels.alertname,
            status = %alert.status,
            "received alert"
        );
        if alert.labels.alertname == "DualFailure" && alert.status == "firing" {
            dual_failure = true;
        }
    }

    if dual_failure {
        warn!("DualFailure alert firing, forcing phase");
        state.engine.force_dual_failure().await;
    }

    state.trigger.trigger();

    (StatusCode::OK, Json(serde_json::json!({"status": "ok", "action": "triggered_reconciliation"})))
}
