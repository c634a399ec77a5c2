//! Search-mode selection and predicate construction for tender queries.
//!
//! A request resolves its predicate exactly once. The same [`TenderPredicate`]
//! value then drives both the count query and the row query so the reported
//! total always describes the rows that were returned.

use std::{fmt, str::FromStr};

use super::filters::{CanonicalFilterSet, MAX_SEARCH_LENGTH, sanitize_input};

/// Upper bound on tokens so the generated predicate stays small.
pub const MAX_TOKENS: usize = 6;
/// Minimum trimmed length before an autocomplete lookup touches the store.
pub const MIN_SUGGESTION_QUERY_LEN: usize = 2;
/// Hard cap on autocomplete rows.
pub const SUGGESTION_LIMIT: u32 = 10;

/// Process-wide choice between substring matching and native full-text search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    #[default]
    Contains,
    FullText,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Contains => "contains",
            SearchMode::FullText => "fts",
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contains" => Ok(SearchMode::Contains),
            "fts" => Ok(SearchMode::FullText),
            other => Err(format!("unknown search mode `{other}` (expected contains|fts)")),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three mutually exclusive search strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPredicate {
    /// Code or reference code starts with the digits.
    PrefixMatch(String),
    /// Every token must appear in at least one searchable column.
    TokenMatch(Vec<String>),
    /// Store-native full-text match, ORed with substring matches of the
    /// phrase's digit runs against both code columns.
    FullText(String),
}

impl SearchPredicate {
    /// Pick a strategy for the (already sanitized) search string.
    pub fn select(search: Option<&str>, mode: SearchMode) -> Option<Self> {
        let search = search?.trim();
        if looks_like_code(search) {
            return Some(Self::PrefixMatch(search.to_string()));
        }

        let tokens = search_tokens(search);
        if tokens.is_empty() {
            return None;
        }

        match mode {
            SearchMode::Contains => Some(Self::TokenMatch(tokens)),
            SearchMode::FullText => {
                sanitize_input(Some(search), MAX_SEARCH_LENGTH).map(Self::FullText)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrefixMatch(_) => "prefix",
            Self::TokenMatch(_) => "tokens",
            Self::FullText(_) => "fts",
        }
    }
}

/// Two or more ASCII digits and nothing else.
pub fn looks_like_code(search: &str) -> bool {
    let trimmed = search.trim();
    trimmed.len() >= 2 && trimmed.bytes().all(|b| b.is_ascii_digit())
}

/// Whitespace tokens longer than one character, at most [`MAX_TOKENS`].
pub fn search_tokens(search: &str) -> Vec<String> {
    let Some(cleaned) = sanitize_input(Some(search), MAX_SEARCH_LENGTH) else {
        return Vec::new();
    };

    cleaned
        .split(' ')
        .filter(|token| token.chars().count() > 1)
        .take(MAX_TOKENS)
        .map(str::to_string)
        .collect()
}

/// Digit runs of a full-text phrase that should still match codes by substring.
pub fn code_fragments(phrase: &str) -> Vec<String> {
    phrase
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| looks_like_code(run))
        .take(MAX_TOKENS)
        .map(str::to_string)
        .collect()
}

/// Full predicate for a listing: optional search strategy plus attribute filters.
///
/// Unset filters stay `None` and never produce a clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenderPredicate {
    pub search: Option<SearchPredicate>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub source_id: Option<i64>,
    pub fiscal_year: Option<i32>,
}

impl TenderPredicate {
    pub fn resolve(filters: &CanonicalFilterSet, mode: SearchMode) -> Self {
        let (min_value, max_value) = match (filters.min_value, filters.max_value) {
            (Some(min), Some(max)) if min > max => (Some(max), Some(min)),
            range => range,
        };

        Self {
            search: SearchPredicate::select(filters.search.as_deref(), mode),
            category: filters.category.clone(),
            status: filters.status.clone(),
            min_value,
            max_value,
            source_id: filters.source_id,
            fiscal_year: filters.fiscal_year,
        }
    }
}

/// Resolve the autocomplete predicate, or `None` when the query should short-circuit.
///
/// Suggestions always use prefix or token matching; full-text mode does not apply.
pub fn suggestion_predicate(query: &str) -> Option<SearchPredicate> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_SUGGESTION_QUERY_LEN {
        return None;
    }
    SearchPredicate::select(Some(trimmed), SearchMode::Contains)
}

/// Escape `LIKE` metacharacters so user input only ever matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
