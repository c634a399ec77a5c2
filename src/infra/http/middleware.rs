use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, header::CACHE_CONTROL},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::cache::CacheResource;

use super::X_CACHE_BYPASS;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Normalize bypass signals into `x-cache-bypass: 1` and stamp edge cache
/// headers on successful responses of TTL-governed paths.
pub async fn cache_policy(mut request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let resource = CacheResource::for_path(&path);

    if wants_bypass(&request, resource) {
        request
            .headers_mut()
            .insert(X_CACHE_BYPASS, HeaderValue::from_static("1"));
    }

    let mut response = next.run(request).await;

    if let Some(resource) = resource
        && response.status().is_success()
    {
        let ttl = resource.ttl().as_secs();
        let policy = format!("public, s-maxage={ttl}, stale-while-revalidate={}", ttl / 2);
        if let Ok(value) = HeaderValue::from_str(&policy) {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
    }
    response
}

fn wants_bypass(request: &Request<Body>, resource: Option<CacheResource>) -> bool {
    let query = request.uri().query().unwrap_or("");
    if has_flag(query, "refresh") {
        return true;
    }
    if resource == Some(CacheResource::Suggestions) && has_flag(query, "nocache") {
        return true;
    }
    request
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("no-cache") || value.contains("no-store"))
}

fn has_flag(query: &str, name: &str) -> bool {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == name && value == "1")
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "tenderscope::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "tenderscope::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}
