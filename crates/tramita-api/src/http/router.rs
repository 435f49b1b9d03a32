//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions (admin surface)
        .route(
            "/definitions",
            post(handlers::definition::create_definition)
                .get(handlers::definition::list_definitions),
        )
        .route("/definitions/{id}", get(handlers::definition::get_definition))
        .route(
            "/definitions/{id}/activate",
            post(handlers::definition::activate_definition),
        )
        .route(
            "/definitions/{id}/deactivate",
            post(handlers::definition::deactivate_definition),
        )
        // Statistics and maintenance
        .route(
            "/definitions/{id}/statistics",
            get(handlers::stats::get_statistics),
        )
        .route("/definitions/{id}/stale", get(handlers::stats::find_stale))
        // Instances
        .route(
            "/instances",
            post(handlers::instance::create_instance).get(handlers::instance::list_instances),
        )
        .route("/instances/{id}", get(handlers::instance::get_instance))
        .route("/instances/{id}/entity", put(handlers::instance::attach_entity))
        .route("/instances/{id}/transition", post(handlers::instance::transition))
        .route("/instances/{id}/pause", post(handlers::instance::pause))
        .route("/instances/{id}/resume", post(handlers::instance::resume))
        .route("/instances/{id}/complete", post(handlers::instance::complete))
        .route("/instances/{id}/cancel", post(handlers::instance::cancel))
        .route("/instances/{id}/error", post(handlers::instance::register_error))
        .route("/instances/{id}/recover", post(handlers::instance::recover))
        .route("/instances/{id}/history", get(handlers::instance::get_history));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
