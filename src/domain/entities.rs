//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Issuing authority (LPSE) that publishes tenders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityRecord {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub province: Option<String>,
    pub city: Option<String>,
    pub total_tenders: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderRecord {
    pub id: i64,
    pub code: String,
    pub rup_code: Option<String>,
    pub name: String,
    pub authority_id: i64,
    pub category: Option<String>,
    pub status: Option<String>,
    pub stage: Option<String>,
    pub budget_value: Option<f64>,
    pub estimate_value: Option<f64>,
    pub fiscal_year: Option<i32>,
    pub detail_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub authority: AuthorityRecord,
}

/// Requirement documents scraped alongside a tender. Each field is free-form JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenderRequirements {
    pub general: Option<Value>,
    pub technical: Option<Value>,
    pub qualification: Option<Value>,
    pub procurement_documents: Option<Value>,
}

impl TenderRequirements {
    pub fn normalized(self) -> Self {
        Self {
            general: normalize_json(self.general),
            technical: normalize_json(self.technical),
            qualification: normalize_json(self.qualification),
            procurement_documents: normalize_json(self.procurement_documents),
        }
    }
}

/// Blank JSON strings and JSON `null` both collapse to an absent value.
fn normalize_json(value: Option<Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        Some(other) => Some(other),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderDetail {
    #[serde(flatten)]
    pub tender: TenderRecord,
    pub requirements: Option<TenderRequirements>,
}

/// Compact row returned by autocomplete lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderSuggestion {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub category: Option<String>,
    pub status: Option<String>,
    pub authority_name: Option<String>,
    pub budget_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenderStats {
    pub total_tenders: i64,
    pub total_authorities: i64,
    pub average_budget: f64,
    pub by_category: Vec<GroupCount>,
    pub by_status: Vec<GroupCount>,
    pub by_province: Vec<GroupCount>,
    pub recent_tenders: Vec<TenderRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub tenders: i64,
    pub authorities: i64,
}
