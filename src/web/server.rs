//! Axum router construction and HTTP Basic auth gate (C12).

use anyhow::Result;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{handlers, AppState};

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("web server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/webhook", post(handlers::webhook))
        .route("/self-restart", post(handlers::self_restart))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    let open_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/patterns", get(handlers::list_patterns))
        .route("/patterns/{id}", get(handlers::get_pattern))
        .route("/analytics", get(handlers::analytics))
        .route("/maintenance/start", post(handlers::maintenance_start))
        .route("/maintenance/end", post(handlers::maintenance_end))
        .route("/maintenance/status", get(handlers::maintenance_status))
        .route("/self-restart/status", get(handlers::self_restart_status))
        .route("/self-restart/cancel", post(handlers::self_restart_cancel))
        .route("/resume", post(handlers::resume));

    Router::new()
        .merge(webhook_routes)
        .merge(open_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Checks `Authorization: Basic <base64(user:pass)>` against
/// `AppConfig::webhook_auth_username`/`webhook_auth_password`. Per
/// spec.md §6.1, only `/webhook` and `/self-restart` sit behind this.
async fn basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = header_value.strip_prefix("Basic ").ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = BASE64.decode(encoded).map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;
    let (user, pass) = credentials.split_once(':').ok_or(StatusCode::UNAUTHORIZED)?;

    if user == state.config.webhook_auth_username && pass == state.config.webhook_auth_password {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

