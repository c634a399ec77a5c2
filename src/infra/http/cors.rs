use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::CorsSettings;

use super::{X_CACHE, X_CACHE_BYPASS, X_CACHE_KEY, X_RESPONSE_TIME};

/// Read-only CORS policy. An empty list or `*` allows any origin; otherwise
/// only listed origins are echoed back, with `Vary: Origin`.
pub fn build_cors_layer(settings: &CorsSettings) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(X_CACHE_BYPASS),
        ])
        .expose_headers([
            HeaderName::from_static(X_CACHE),
            HeaderName::from_static(X_CACHE_KEY),
            HeaderName::from_static(X_RESPONSE_TIME),
        ]);

    if allows_any_origin(&settings.allowed_origins) {
        info!(target = "tenderscope::http", "CORS allows any origin");
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target = "tenderscope::http", origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    info!(target = "tenderscope::http", origins = ?settings.allowed_origins, "CORS restricted to configured origins");
    cors.allow_origin(AllowOrigin::list(origins))
}

fn allows_any_origin(origins: &[String]) -> bool {
    origins.is_empty() || origins.iter().any(|origin| origin.trim() == "*")
}
