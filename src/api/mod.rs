//! API module
//!
//! HTTP API endpoints and middleware.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::auth::TokenService;
use crate::processing::TransactionGateway;

pub mod extract;
pub mod middleware;
pub mod response;
pub mod routes;

pub use response::ApiResponse;
pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub gateway: TransactionGateway,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(gateway: TransactionGateway, tokens: TokenService) -> Self {
        Self { gateway, tokens }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Order: logging -> auth -> handler
    let protected_routes = create_router().layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth_middleware,
    ));

    Router::new()
        // Health check (no auth)
        .route("/health", get(routes::health_check))
        .nest("/api/v1", protected_routes)
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
