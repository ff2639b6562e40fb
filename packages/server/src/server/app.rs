use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{delete, get, post},
    Extension, Router,
};
use tagcheck_core::{CrawlBounds, RunController};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::kernel::SessionHub;
use crate::server::routes::{
    cancel_run_handler, health_handler, list_validators_handler, run_events_handler,
    start_crawl_handler,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub hub: SessionHub,
    /// Bounds used for fields a crawl request leaves out
    pub default_bounds: CrawlBounds,
}

impl AppState {
    pub fn new(controller: RunController, default_bounds: CrawlBounds) -> Self {
        Self {
            controller,
            hub: SessionHub::new(),
            default_bounds,
        }
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/validators", get(list_validators_handler))
        .route("/api/crawl", post(start_crawl_handler))
        .route("/api/runs/:session_id", delete(cancel_run_handler))
        .route("/api/runs/:session_id/events", get(run_events_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
