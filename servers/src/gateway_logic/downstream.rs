use crate::gateway_logic::config::{Settings, TlsPaths};
use crate::gateway_logic::listener;
use crate::gateway_logic::model::{ErrorResponse, NotifyRequest, NotifyResponse, StatusResponse};
use crate::gateway_logic::session;
use crate::gateway_logic::state::AppState;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use lib_gateway::StoreError;
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Store failures surface to HTTP callers as `503` with a JSON body.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("Request failed: {}", self.0);
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/notify", post(notify_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// # Run
///
/// Serves the gateway until `stopped` is cancelled. The server deliberately outlives
/// the local shutdown signal: while the worker drains, `/status` and `/notify` keep
/// answering and only new WebSocket upgrades are refused.
pub async fn run(settings: &Settings, state: AppState, stopped: CancellationToken) -> Result<()> {
    let listener = listener::bind(settings.addr, settings.reuse_port)?;
    let app = router(state);

    match &settings.tls {
        Some(tls) => serve_tls(listener, app, tls, stopped).await,
        None => {
            log::info!("Gateway listening on ws://{}", settings.addr);
            let listener = tokio::net::TcpListener::from_std(listener)?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    stopped.cancelled().await;
                    log::info!("Gateway HTTP server shutting down.");
                })
                .await?;
            Ok(())
        }
    }
}

async fn serve_tls(
    listener: StdTcpListener,
    app: Router,
    tls: &TlsPaths,
    stopped: CancellationToken,
) -> Result<()> {
    log::info!("Loading TLS certs from: {}", tls.cert.display());
    let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .context("TLS Configuration Error")?;

    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        stopped.cancelled().await;
        log::info!("Gateway HTTPS server shutting down.");
        signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    log::info!("Gateway listening on wss://{}", listener.local_addr()?);
    axum_server::from_tcp_rustls(listener, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.is_shutting_down() {
        let body = ErrorResponse {
            error: "Server is shutting down".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

async fn notify_handler(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let message = format!("Server notification: {}", request.message);
    let report = state.dispatcher.broadcast(&message).await;
    let recipients = state.registry.global_total().await?;
    log::info!(
        "Manual notification delivered to {} local client(s), {} across the fleet",
        report.delivered,
        recipients
    );

    Ok(Json(NotifyResponse {
        status: "notification sent".to_string(),
        recipients,
        delivered: report.delivered,
    }))
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let active_connections = state.registry.global_total().await?;
    Ok(Json(StatusResponse {
        active_connections,
        local_connections: state.registry.size(),
        shutdown_pending: state.is_shutting_down(),
        phase: state.coordinator.phase(),
    }))
}

async fn health_handler() -> &'static str {
    "OK"
}
