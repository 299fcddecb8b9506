//! API module for report execution
//!
//! REST interface over the report engine.

pub mod handlers;
pub mod service;

pub use service::ReportService;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(service: Arc<ReportService>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/reports/execute", post(handlers::execute_report))
        .route("/api/v1/reports/sql", post(handlers::compile_sql))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
