//! OIDC relying-party demo
//!
//! Single-binary web app that:
//! 1. Discovers the configured OpenID Connect issuer
//! 2. Logs users in with the authorization-code flow and PKCE
//! 3. Keeps them signed in with an encrypted session cookie
//! 4. Serves a public home page and a protected profile page

mod config;
mod error;
mod metrics;
mod middleware;
mod routes;
mod service;
mod templates;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use oidc_auth::constants::LOGIN_SWEEP_INTERVAL;
use oidc_auth::{FlowController, LoginStore, SessionManager, spawn_sweeper};
use provider::{HttpIdentityProvider, IdentityProvider};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Config};
use crate::routes::CookieSettings;
use crate::service::{DRAIN_TIMEOUT, ServiceAction, ServiceEvent, ServiceState, handle_event};

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<FlowController>,
    pub cookie: CookieSettings,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `/profile` requires a session, `/` only looks for one. The callback is
/// mounted at the path of the configured redirect URL. The in-flight limit
/// is one semaphore shared by every route.
fn build_router(state: AppState, callback_path: &str, max_connections: usize) -> Router {
    let protected = Router::new()
        .route("/profile", get(routes::profile))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_authentication,
        ));

    let public = Router::new()
        .route("/", get(routes::home))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::check_authentication,
        ));

    Router::new()
        .merge(protected)
        .merge(public)
        .route("/login", get(routes::login))
        .route(callback_path, get(routes::callback))
        .route("/logout", get(routes::logout).post(routes::logout))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, level from LOG_LEVEL or RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    info!(path = %cli.config.display(), "loading configuration");

    let config = Config::load(&cli.config, cli.key.clone())
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if config.key_generated {
        warn!("no session key configured, using a random one; sessions will not survive a restart");
    }
    info!(
        issuer = %config.issuer,
        client_id = %config.client_id,
        redirect_url = %config.redirect_url,
        confidential = config.client_secret.is_some(),
        "configuration loaded"
    );

    // Install Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()?;

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let (mut state, mut action) = handle_event(
        ServiceState::Initializing,
        ServiceEvent::ConfigLoaded { listen_addr },
    );

    let provider = loop {
        if !matches!(action, ServiceAction::Discover) {
            bail!("unexpected action before discovery: {action:?}");
        }
        match HttpIdentityProvider::discover(config.provider_settings()).await {
            Ok(provider) => break provider,
            Err(e) => {
                (state, action) = handle_event(
                    state,
                    ServiceEvent::DiscoveryFailed {
                        error: e.to_string(),
                        retryable: e.is_transient(),
                    },
                );
                match action {
                    ServiceAction::ScheduleRetry { delay } => {
                        warn!(
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "issuer discovery failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        (state, action) = handle_event(state, ServiceEvent::RetryTimer);
                    }
                    _ => bail!("issuer discovery failed: {e}"),
                }
            }
        }
    };

    (state, action) = handle_event(state, ServiceEvent::ProviderDiscovered);
    let ServiceAction::StartListener { addr } = action else {
        bail!("unexpected action after discovery: {action:?}");
    };

    let provider: Arc<dyn IdentityProvider> = Arc::new(provider);
    let logins = Arc::new(LoginStore::new(config.login_ttl, config.max_pending_logins));
    let sweeper = spawn_sweeper(logins.clone(), LOGIN_SWEEP_INTERVAL);
    let sessions = Arc::new(SessionManager::new(&config.key, config.session_ttl));
    let flow = FlowController::new(provider, logins, sessions)
        .with_post_logout_redirect(config.post_logout_redirect_url.clone());

    let app_state = AppState {
        flow: Arc::new(flow),
        cookie: CookieSettings {
            name: config.cookie_name.clone(),
            ttl: config.session_ttl,
        },
        started_at: Instant::now(),
        prometheus,
    };
    let app = build_router(app_state, &config.callback_path(), config.max_connections);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    (state, _) = handle_event(state, ServiceEvent::ListenerReady);
    info!(addr = %addr, "accepting requests");

    // The drain timeout starts at the shutdown signal, not at server start:
    // signal the server to stop accepting, then race the drain against it.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    (state, _) = handle_event(state, ServiceEvent::ShutdownSignal);
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => {
            (state, _) = handle_event(state, ServiceEvent::DrainTimeout);
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    sweeper.abort();
    info!(?state, "shutdown complete");
    Ok(())
}

/// JSON health report: status, issuer, uptime and pending logins.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "issuer": state.flow.provider().issuer(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pending_logins": state.flow.logins().len().await,
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
