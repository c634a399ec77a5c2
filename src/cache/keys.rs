//! Deterministic cache keys.
//!
//! Every key is `{version}:{tag}:...` with order-stable segments. Segment
//! normalization lower-cases, turns whitespace runs into `_`, strips key
//! delimiters and truncates to [`MAX_SEGMENT_LENGTH`] characters. Two distinct
//! filters can only collide when they differ solely in stripped delimiters or
//! beyond the truncation point; that bound is accepted, not cryptographic.

use std::fmt::Display;

use super::config::{CACHE_VERSION, CacheResource};
use crate::application::filters::TenderQuery;
use crate::application::search::SearchPredicate;
use crate::domain::types::TenderCode;

pub const MAX_SEGMENT_LENGTH: usize = 120;
/// Segment used for absent or blank values.
pub const ALL_SEGMENT: &str = "all";

const STRIPPED: &[char] = &[':', '/', '\\', '?', '&', '#'];

pub fn normalize_segment(value: Option<&str>) -> String {
    let Some(text) = value.map(str::trim).filter(|text| !text.is_empty()) else {
        return ALL_SEGMENT.to_string();
    };

    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if STRIPPED.contains(&ch) {
            continue;
        }
        out.push(ch);
    }

    out.chars().take(MAX_SEGMENT_LENGTH).collect()
}

fn number_segment<N: Display>(value: Option<N>) -> String {
    match value {
        Some(value) => normalize_segment(Some(&value.to_string())),
        None => ALL_SEGMENT.to_string(),
    }
}

fn build(parts: &[&str]) -> String {
    let mut key = String::from(CACHE_VERSION);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

pub fn list_key(query: &TenderQuery) -> String {
    let filters = &query.filters;
    let page = format!("page{}", query.page.page);
    let limit = format!("limit{}", query.page.limit);
    build(&[
        CacheResource::TenderList.tag(),
        &page,
        &limit,
        "search",
        &normalize_segment(filters.search.as_deref()),
        "category",
        &normalize_segment(filters.category.as_deref()),
        "status",
        &normalize_segment(filters.status.as_deref()),
        "minValue",
        &number_segment(filters.min_value),
        "maxValue",
        &number_segment(filters.max_value),
        "sourceId",
        &number_segment(filters.source_id),
        "fiscalYear",
        &number_segment(filters.fiscal_year),
    ])
}

pub fn detail_key(code: &TenderCode) -> String {
    build(&[
        CacheResource::TenderDetail.tag(),
        &normalize_segment(Some(code.as_str())),
    ])
}

pub fn stats_key() -> String {
    build(&[CacheResource::Stats.tag()])
}

pub fn authority_list_key() -> String {
    build(&[CacheResource::AuthorityList.tag()])
}

/// Suggestion key over the resolved predicate, tagged with its strategy so
/// queries that search differently never share an entry. `None` is a query
/// that short-circuits before reaching the store.
pub fn suggestions_key(predicate: Option<&SearchPredicate>) -> String {
    let Some(predicate) = predicate else {
        return build(&[CacheResource::Suggestions.tag(), ALL_SEGMENT]);
    };
    let terms = match predicate {
        SearchPredicate::PrefixMatch(code) => normalize_segment(Some(code)),
        SearchPredicate::TokenMatch(tokens) => normalize_segment(Some(&tokens.join(" "))),
        SearchPredicate::FullText(phrase) => normalize_segment(Some(phrase)),
    };
    build(&[CacheResource::Suggestions.tag(), predicate.kind(), &terms])
}

/// Prefix covering every key of the current schema version, optionally narrowed.
pub fn version_prefix(narrow: Option<&str>) -> String {
    match narrow.map(str::trim).filter(|value| !value.is_empty()) {
        Some(narrow) => format!("{CACHE_VERSION}:{narrow}"),
        None => format!("{CACHE_VERSION}:"),
    }
}
