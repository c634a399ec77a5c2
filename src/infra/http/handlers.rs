use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::error::ErrorReport;
use crate::application::filters::RawTenderQuery;
use crate::application::response::ApiResponse;
use crate::application::tenders::{CacheStatus, Served, ServiceError};

use super::{HttpState, X_CACHE, X_CACHE_BYPASS, X_CACHE_KEY, X_RESPONSE_TIME};

const SOURCE: &str = "infra::http::handlers";

pub async fn list_tenders(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let query = RawTenderQuery::from_pairs(pairs).canonicalize();
    let result = state.tenders.list_tenders(&query, bypass(&headers)).await;
    respond(&state, result)
}

pub async fn tender_detail(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    let result = state.tenders.tender_detail(&code, bypass(&headers)).await;
    respond(&state, result)
}

pub async fn stats(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let result = state.tenders.stats(bypass(&headers)).await;
    respond(&state, result)
}

pub async fn authorities(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let result = state.tenders.authorities(bypass(&headers)).await;
    respond(&state, result)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SuggestionQuery {
    q: Option<String>,
}

pub async fn suggestions(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionQuery>,
) -> Response {
    let q = query.q.unwrap_or_default();
    let result = state.tenders.suggestions(&q, bypass(&headers)).await;
    respond(&state, result)
}

pub async fn health(State(state): State<HttpState>) -> Response {
    let mut report = state.tenders.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if !state.environment.exposes_error_details() {
        report = report.redact();
    }

    let mut response = (status, Json(report)).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if status.is_server_error() {
        ErrorReport::from_message(SOURCE, status, "health probe failed").attach(&mut response);
    }
    response
}

#[derive(Debug, Serialize)]
pub struct Pong {
    ping: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    time: OffsetDateTime,
}

pub async fn ping() -> Json<Pong> {
    Json(Pong {
        ping: "pong",
        time: OffsetDateTime::now_utc(),
    })
}

fn bypass(headers: &HeaderMap) -> bool {
    headers
        .get(X_CACHE_BYPASS)
        .is_some_and(|value| value.as_bytes() == b"1")
}

fn respond<T: Serialize>(state: &HttpState, result: Result<Served<T>, ServiceError>) -> Response {
    match result {
        Ok(served) => {
            let mut response = Json(&served.body).into_response();
            stamp(&mut response, served.cache, &served.key, served.elapsed);
            response
        }
        Err(err) => error_response(state, err),
    }
}

fn error_response(state: &HttpState, err: ServiceError) -> Response {
    match err {
        ServiceError::InvalidCode(ref inner) => {
            let mut response = failure(StatusCode::BAD_REQUEST, "Invalid tender code format", None);
            ErrorReport::from_error(SOURCE, StatusCode::BAD_REQUEST, inner).attach(&mut response);
            response
        }
        ServiceError::NotFound {
            cache,
            ref key,
            elapsed,
        } => {
            let mut response = failure(StatusCode::NOT_FOUND, "Tender not found", None);
            stamp(&mut response, cache, key, elapsed);
            ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, format!("no tender at {key}"))
                .attach(&mut response);
            response
        }
        ServiceError::Repo(ref inner) => {
            let details = state
                .environment
                .exposes_error_details()
                .then(|| inner.to_string());
            let mut response =
                failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", details);
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

fn failure(status: StatusCode, message: &'static str, details: Option<String>) -> Response {
    let body: ApiResponse<()> = ApiResponse::failure(message, details);
    (status, Json(body)).into_response()
}

fn stamp(response: &mut Response, cache: CacheStatus, key: &str, elapsed: std::time::Duration) {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(cache.as_str()));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(X_CACHE_KEY, value);
    }
    let timing = format!("{:.2}ms", elapsed.as_secs_f64() * 1_000.0);
    if let Ok(value) = HeaderValue::from_str(&timing) {
        headers.insert(X_RESPONSE_TIME, value);
    }
}
