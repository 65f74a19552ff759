//! `CredVault` HTTP server.
//!
//! Wires together the core library, storage backend, and HTTP routes into a
//! running Axum server serving the JSON API at `/v1/*`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Identified routes go through the auth middleware layer.
    let identified_routes = Router::new()
        .nest("/v1/accounts", routes::accounts::router())
        .nest("/v1/groups", routes::groups::router())
        .nest("/v1/customers", routes::customers::router())
        .nest("/v1/service-groups", routes::service_groups::router())
        .nest("/v1/services", routes::services::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    // Unauthenticated, so keep a lid on concurrent health probes.
    let sys_routes = Router::new()
        .nest("/v1/sys", routes::sys::router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(10));

    Router::new()
        .merge(sys_routes)
        .merge(identified_routes)
        .layer(TraceLayer::new_for_http())
        // No browser origins: callers arrive through the identifying proxy.
        .layer(CorsLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
