//! Request API: shared state and router assembly.

pub mod auth_api;
pub mod data_api;
pub mod error;
pub mod health;

use crate::analytics::AnalyticsEngine;
use crate::auth::{auth_middleware, CredentialStore, JwtHandler};
use crate::broker::EventBroker;
use crate::config::Config;
use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use crate::middleware::{logging::request_logging, request_deadline};
use crate::store::UserDataStore;
use crate::ws::websocket_handler;
use axum::{
    http::header::{AUTHORIZATION, CONTENT_TYPE},
    middleware as axum_mw,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers and stream sessions.
/// Constructed once in main; every component is read-only or internally
/// synchronized.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialStore>,
    pub jwt: Arc<JwtHandler>,
    pub data: Arc<UserDataStore>,
    pub analytics: Arc<AnalyticsEngine>,
    pub broker: Arc<EventBroker>,
    pub started_at: Instant,
}

/// Assemble the full router: rate-limited auth endpoints, bearer-guarded
/// data surface, public health surface, and the WebSocket upgrade.
pub fn router(state: AppState) -> Router {
    let limiter = RateLimitLayer::new(RateLimitConfig::default());

    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .route_layer(axum_mw::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/verify", get(auth_api::verify))
        .route("/api/auth/users", get(auth_api::list_users))
        .route("/api/auth/users/:username", delete(auth_api::delete_user))
        .route("/api/result", post(data_api::submit_result))
        .route("/api/results", get(data_api::list_results))
        .route("/api/statistics", get(data_api::statistics))
        .route("/api/analysis", get(data_api::analysis))
        .route("/api/history", get(data_api::list_history))
        .route("/api/export", get(data_api::export))
        .route("/api/clear", post(data_api::clear))
        .route_layer(axum_mw::from_fn_with_state(
            state.jwt.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Health surface and the stream upgrade stay public: the stream accepts
    // its token at the handshake or as the first message.
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/check", get(health::check))
        .route("/status", get(health::status))
        .route("/ws", get(websocket_handler))
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    Router::new()
        .merge(auth_routes)
        .merge(protected_routes)
        .merge(public_routes)
        .layer(cors)
        .layer(axum_mw::from_fn(request_deadline))
        .layer(axum_mw::from_fn(request_logging))
}
