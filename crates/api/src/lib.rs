//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - REST API routes for credit balances, history, transfers and purchases
//! - Error-to-response mapping
//! - Response types

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use skillswap_core::credits::CreditService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Credit ledger service.
    pub credits: Arc<CreditService>,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
