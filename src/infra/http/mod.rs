//! JSON API surface under `/api`.

mod cors;
mod handlers;
mod middleware;

pub use cors::build_cors_layer;
pub use middleware::RequestContext;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::application::tenders::TenderService;
use crate::config::{CorsSettings, DeploymentEnvironment};

use self::middleware::{cache_policy, log_responses, set_request_context};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_KEY: &str = "x-cache-key";
pub const X_CACHE_BYPASS: &str = "x-cache-bypass";
pub const X_RESPONSE_TIME: &str = "x-response-time";

#[derive(Clone)]
pub struct HttpState {
    pub tenders: Arc<TenderService>,
    pub environment: DeploymentEnvironment,
}

pub fn build_router(state: HttpState, cors: &CorsSettings) -> Router {
    Router::new()
        .route("/api/tenders", get(handlers::list_tenders))
        .route("/api/tenders/search", get(handlers::suggestions))
        .route("/api/tenders/{code}", get(handlers::tender_detail))
        .route("/api/stats", get(handlers::stats))
        .route("/api/lpse", get(handlers::authorities))
        .route("/api/health", get(handlers::health))
        .route("/api/ping", get(handlers::ping))
        .with_state(state)
        .layer(axum_middleware::from_fn(cache_policy))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(build_cors_layer(cors))
}
