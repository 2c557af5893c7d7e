//! Data-provider contract types.
//!
//! # Design
//! Records stay untyped (`serde_json::Map`) because the adapter never owns a
//! schema; the only field it relies on is the identifier. Parameter structs
//! mirror the front-end contract and deserialize from its camelCase JSON so a
//! host can forward them verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::upload::Payload;

/// A record: an opaque JSON object carrying an identifier field.
pub type Record = Map<String, Value>;

/// Record identifier. The backend accepts both numeric and string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Int(id) => write!(f, "{id}"),
            Identifier::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Identifier::Int(id)
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Identifier::Str(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Identifier::Str(id)
    }
}

impl From<Identifier> for Value {
    fn from(id: Identifier) -> Self {
        match id {
            Identifier::Int(id) => Value::from(id),
            Identifier::Str(id) => Value::String(id),
        }
    }
}

/// One-based page number plus page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    /// Row offset of the first record on this page. Page 0 is treated as 1;
    /// offsets past `u64::MAX` clamp to it.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, per_page: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

/// Parameters for `get_list`.
///
/// `filter` is an arbitrary JSON object. Two keys are reserved: `q` holds
/// pass-through query parameters and `$OR` holds conditions combined with OR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetListParams {
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub filter: Value,
}

/// Parameters for `get_many_reference`: a list constrained to records whose
/// `target` field equals `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetManyReferenceParams {
    pub target: String,
    pub id: Identifier,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub filter: Value,
}

#[derive(Debug, Clone)]
pub struct CreateParams {
    pub data: Payload,
}

/// Parameters for `update`. Only the keys of `data` whose values differ from
/// `previous_data` are sent.
#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub id: Identifier,
    pub data: Payload,
    pub previous_data: Record,
}

#[derive(Debug, Clone)]
pub struct UpdateManyParams {
    pub ids: Vec<Identifier>,
    pub data: Payload,
}

/// Result of the list-style operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetListResult {
    pub data: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// `{data: ...}` envelope returned by every record-style operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResult<T> {
    pub data: T,
}
