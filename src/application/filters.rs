//! Normalization of untrusted listing parameters into a canonical filter set.

use thiserror::Error;
use tracing::debug;

use super::pagination::PageRequest;

/// Cap applied to free-text filters before they reach keys or predicates.
pub const MAX_TEXT_LENGTH: usize = 160;
/// Cap applied to the search string before it is split into tokens.
pub const MAX_SEARCH_LENGTH: usize = 200;

pub const MIN_FISCAL_YEAR: i32 = 2000;
pub const MAX_FISCAL_YEAR: i32 = 2100;

/// Trim, cap, strip control characters and collapse whitespace.
///
/// Returns `None` when nothing meaningful is left so callers never build an
/// "equals empty string" predicate.
pub fn sanitize_input(value: Option<&str>, max_len: usize) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut cleaned = String::with_capacity(trimmed.len().min(max_len));
    let mut pending_space = false;
    for ch in trimmed.chars().take(max_len) {
        if ch.is_ascii_control() {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !cleaned.is_empty() {
            cleaned.push(' ');
        }
        pending_space = false;
        cleaned.push(ch);
    }

    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("`{field}` is not a valid {expected}")]
    Malformed {
        field: &'static str,
        expected: &'static str,
    },
    #[error("`{field}` is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: &'static str,
    },
}

/// Canonical, validated listing filters. Built once per request, immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalFilterSet {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Issuing authority id.
    pub source_id: Option<i64>,
    pub fiscal_year: Option<i32>,
}

impl CanonicalFilterSet {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenderQuery {
    pub page: PageRequest,
    pub filters: CanonicalFilterSet,
}

/// Raw query string of the listing endpoint. Every field stays a string so a
/// malformed value can be detected here instead of rejecting the request.
#[derive(Debug, Clone, Default)]
pub struct RawTenderQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub source_id: Option<String>,
    pub fiscal_year: Option<String>,
}

impl RawTenderQuery {
    /// Collect known parameters from decoded query pairs. Later duplicates win and
    /// unknown keys are ignored; legacy parameter names are accepted as aliases.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut raw = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "page" => &mut raw.page,
                "limit" => &mut raw.limit,
                "search" => &mut raw.search,
                "category" | "kategori" => &mut raw.category,
                "status" => &mut raw.status,
                "minValue" | "nilai_min" => &mut raw.min_value,
                "maxValue" | "nilai_max" => &mut raw.max_value,
                "sourceId" | "lpse_id" => &mut raw.source_id,
                "fiscalYear" | "tahun" => &mut raw.fiscal_year,
                _ => continue,
            };
            *slot = Some(value);
        }
        raw
    }

    /// Validate every parameter; any failure falls back to the first default page without filters.
    pub fn canonicalize(&self) -> TenderQuery {
        match self.try_canonicalize() {
            Ok(query) => query,
            Err(err) => {
                debug!(
                    target = "tenderscope::tenders",
                    error = %err,
                    "listing parameters rejected, falling back to defaults"
                );
                TenderQuery::default()
            }
        }
    }

    pub fn try_canonicalize(&self) -> Result<TenderQuery, FilterError> {
        let page = match present(&self.page) {
            Some(raw) => parse_integer(raw, "page")?,
            None => 1,
        };
        if page < 1 {
            return Err(FilterError::OutOfRange {
                field: "page",
                reason: "must be at least 1",
            });
        }

        let limit = match present(&self.limit) {
            Some(raw) => parse_integer(raw, "limit")?,
            None => i64::from(PageRequest::DEFAULT_LIMIT),
        };
        if !(1..=i64::from(PageRequest::MAX_LIMIT)).contains(&limit) {
            return Err(FilterError::OutOfRange {
                field: "limit",
                reason: "must be between 1 and 100",
            });
        }

        let mut min_value = present(&self.min_value)
            .map(|raw| parse_amount(raw, "minValue"))
            .transpose()?;
        let mut max_value = present(&self.max_value)
            .map(|raw| parse_amount(raw, "maxValue"))
            .transpose()?;
        if let (Some(min), Some(max)) = (min_value, max_value)
            && min > max
        {
            min_value = Some(max);
            max_value = Some(min);
        }

        let source_id = match present(&self.source_id) {
            Some(raw) => {
                let id = parse_integer(raw, "sourceId")?;
                if id < 1 {
                    return Err(FilterError::OutOfRange {
                        field: "sourceId",
                        reason: "must be a positive integer",
                    });
                }
                Some(id)
            }
            None => None,
        };

        let fiscal_year = match present(&self.fiscal_year) {
            Some(raw) => {
                let year = parse_integer(raw, "fiscalYear")?;
                if !(i64::from(MIN_FISCAL_YEAR)..=i64::from(MAX_FISCAL_YEAR)).contains(&year) {
                    return Err(FilterError::OutOfRange {
                        field: "fiscalYear",
                        reason: "must be between 2000 and 2100",
                    });
                }
                i32::try_from(year).ok()
            }
            None => None,
        };

        let page = u32::try_from(page).map_err(|_| FilterError::OutOfRange {
            field: "page",
            reason: "exceeds supported range",
        })?;
        let limit = u32::try_from(limit).map_err(|_| FilterError::OutOfRange {
            field: "limit",
            reason: "exceeds supported range",
        })?;

        Ok(TenderQuery {
            page: PageRequest::new(page, limit),
            filters: CanonicalFilterSet {
                search: sanitize_input(self.search.as_deref(), MAX_TEXT_LENGTH),
                category: sanitize_input(self.category.as_deref(), MAX_TEXT_LENGTH),
                status: sanitize_input(self.status.as_deref(), MAX_TEXT_LENGTH),
                min_value,
                max_value,
                source_id,
                fiscal_year,
            },
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Accepts plain integers and integral decimals such as `2.0`.
fn parse_integer(raw: &str, field: &'static str) -> Result<i64, FilterError> {
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    let value = raw.parse::<f64>().map_err(|_| FilterError::Malformed {
        field,
        expected: "integer",
    })?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Ok(value as i64)
    } else {
        Err(FilterError::Malformed {
            field,
            expected: "integer",
        })
    }
}

fn parse_amount(raw: &str, field: &'static str) -> Result<f64, FilterError> {
    let value = raw.parse::<f64>().map_err(|_| FilterError::Malformed {
        field,
        expected: "number",
    })?;
    if !value.is_finite() {
        return Err(FilterError::Malformed {
            field,
            expected: "finite number",
        });
    }
    if value < 0.0 {
        return Err(FilterError::OutOfRange {
            field,
            reason: "must not be negative",
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawTenderQuery {
        RawTenderQuery::default()
    }

    #[test]
    fn sanitize_strips_controls_and_collapses_whitespace() {
        assert_eq!(
            sanitize_input(Some("  jalan\u{0007}   tol \u{00a0} baru\u{0000} "), MAX_TEXT_LENGTH)
                .as_deref(),
            Some("jalan tol baru")
        );
        // Tabs and newlines are control characters and vanish rather than separate words.
        assert_eq!(
            sanitize_input(Some("kode\t123"), MAX_TEXT_LENGTH).as_deref(),
            Some("kode123")
        );
        assert_eq!(sanitize_input(Some("   "), MAX_TEXT_LENGTH), None);
        assert_eq!(sanitize_input(Some("\u{0001}\u{007f}"), MAX_TEXT_LENGTH), None);
        assert_eq!(sanitize_input(None, MAX_TEXT_LENGTH), None);
    }

    #[test]
    fn sanitize_caps_length_in_characters() {
        let long = "é".repeat(400);
        let cleaned = sanitize_input(Some(&long), MAX_TEXT_LENGTH).expect("non-empty");
        assert_eq!(cleaned.chars().count(), MAX_TEXT_LENGTH);
    }

    #[test]
    fn pairs_accept_aliases_and_last_duplicate_wins() {
        let pairs = [
            ("kategori", "Konstruksi"),
            ("page", "1"),
            ("page", "2"),
            ("nilai_min", "10"),
            ("unknown", "x"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let raw = RawTenderQuery::from_pairs(pairs);
        assert_eq!(raw.category.as_deref(), Some("Konstruksi"));
        assert_eq!(raw.page.as_deref(), Some("2"));
        assert_eq!(raw.min_value.as_deref(), Some("10"));
    }

    #[test]
    fn defaults_apply_without_parameters() {
        let query = raw().canonicalize();
        assert_eq!(query.page, PageRequest::new(1, 10));
        assert!(query.filters.is_empty());
    }

    #[test]
    fn inverted_value_range_is_swapped() {
        let query = RawTenderQuery {
            min_value: Some("5000".into()),
            max_value: Some("100".into()),
            ..raw()
        }
        .canonicalize();

        assert_eq!(query.filters.min_value, Some(100.0));
        assert_eq!(query.filters.max_value, Some(5000.0));
    }

    #[test]
    fn any_invalid_parameter_falls_back_to_defaults() {
        let cases = [
            RawTenderQuery {
                page: Some("0".into()),
                search: Some("jalan".into()),
                ..raw()
            },
            RawTenderQuery {
                limit: Some("101".into()),
                ..raw()
            },
            RawTenderQuery {
                min_value: Some("-1".into()),
                ..raw()
            },
            RawTenderQuery {
                source_id: Some("abc".into()),
                ..raw()
            },
            RawTenderQuery {
                fiscal_year: Some("1999".into()),
                category: Some("konstruksi".into()),
                ..raw()
            },
        ];

        for case in cases {
            assert_eq!(case.canonicalize(), TenderQuery::default(), "{case:?}");
        }
    }

    #[test]
    fn valid_parameters_are_canonicalized() {
        let query = RawTenderQuery {
            page: Some("3".into()),
            limit: Some("25".into()),
            search: Some("  Jalan   Tol ".into()),
            category: Some("Konstruksi".into()),
            status: Some(" Aktif".into()),
            source_id: Some("12".into()),
            fiscal_year: Some("2024".into()),
            ..raw()
        }
        .try_canonicalize()
        .expect("valid query");

        assert_eq!(query.page, PageRequest::new(3, 25));
        assert_eq!(query.page.skip(), 50);
        assert_eq!(query.filters.search.as_deref(), Some("Jalan Tol"));
        assert_eq!(query.filters.category.as_deref(), Some("Konstruksi"));
        assert_eq!(query.filters.status.as_deref(), Some("Aktif"));
        assert_eq!(query.filters.source_id, Some(12));
        assert_eq!(query.filters.fiscal_year, Some(2024));
    }

    #[test]
    fn empty_numeric_parameters_are_treated_as_absent() {
        let query = RawTenderQuery {
            min_value: Some("".into()),
            page: Some(" ".into()),
            ..raw()
        }
        .try_canonicalize()
        .expect("valid query");

        assert_eq!(query.filters.min_value, None);
        assert_eq!(query.page.page, 1);
    }
}
