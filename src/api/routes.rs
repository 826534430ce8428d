use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{ok, ApiResult, AppState};
use crate::{
    config::Config,
    middleware::{make_span_with_request_id, request_id_middleware},
    routes,
};

/// Hosting platforms whose preview deployments may call the API
const ORIGIN_SUFFIXES: [&str; 5] = [
    ".vercel.app",
    ".netlify.app",
    ".web.app",
    ".firebaseapp.com",
    ".run.app",
];
const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];

/// Whether `origin` is on the allowlist
pub fn is_known_origin(origin: &str, configured: &[String]) -> bool {
    let origin = origin.trim_end_matches('/');
    if configured.iter().any(|o| o == origin) || DEV_ORIGINS.contains(&origin) {
        return true;
    }
    let Some((scheme, host)) = origin.split_once("://") else {
        return false;
    };
    matches!(scheme, "https" | "http") && ORIGIN_SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let configured = Arc::new(config.allowed_origins());
    let strict = config.cors_strict;
    let allow = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        if is_known_origin(origin, &configured) {
            return true;
        }
        if strict {
            tracing::warn!(origin, "CORS origin rejected");
            return false;
        }
        tracing::debug!(origin, "Allowing unlisted CORS origin");
        true
    });

    CorsLayer::new()
        .allow_origin(allow)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Creates the application router with every route and layer
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/health/db", get(database_health))
        .nest("/api", api_routes())
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
}

/// Domain routes under /api
fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(routes::auth::router())
        .merge(routes::users::router())
        .merge(routes::content::router())
        .merge(routes::feed::router())
        .merge(routes::messaging::router())
        .merge(routes::live::router())
        .merge(routes::gifts::router())
        .merge(routes::stores::router())
        .merge(routes::cart::router())
        .merge(routes::orders::router())
        .merge(routes::wallets::router())
        .merge(routes::moderation::router())
        .merge(routes::notifications::router())
        .merge(routes::admin::router())
}

async fn health_check(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    ok(json!({
        "status": "healthy",
        "backend": state.db.backend(),
        "cache": state.cache.is_enabled(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn database_health(State(state): State<AppState>) -> Response {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "database": "connected", "backend": state.db.backend() },
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "message": "Database unreachable",
                    "code": "DATABASE_UNAVAILABLE",
                })),
            )
                .into_response()
        }
    }
}

async fn not_found() -> Response {
    crate::error::AppError::not_found("Route not found").into_response()
}
