//! Query-string composition for the NestJS CRUD request dialect.
//!
//! # Design
//! Filters arrive as arbitrary nested JSON. They are flattened into dotted
//! keys, split into `(field, operator, value)` conditions and rendered as
//! `filter=field||$op||value` pairs next to `sort`, `limit`, `page` and
//! `offset`. Everything here is a pure function of its inputs.
//!
//! Operator inference is a heuristic: a JSON number, or a string made only of
//! ASCII digits, becomes `$eq`; anything else becomes `$cont`. A caller who
//! wants a partial match on `"42"` must spell the operator out
//! (`{"code||$cont": "42"}`).

use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::ApiError;
use crate::types::Sort;

/// RFC 3986 unreserved characters stay bare, everything else is escaped.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Filter key holding pass-through query parameters.
pub const PASS_THROUGH_KEY: &str = "q";
/// Filter key holding conditions combined with OR.
pub const OR_KEY: &str = "$OR";

const CONDITION_DELIMITER: &str = "||";

/// Comparison operators understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LowerThan,
    GreaterThanEquals,
    LowerThanEquals,
    Starts,
    Ends,
    Contains,
    Excludes,
    In,
    NotIn,
    IsNull,
    NotNull,
    Between,
    EqualsLow,
    NotEqualsLow,
    StartsLow,
    EndsLow,
    ContainsLow,
    ExcludesLow,
    InLow,
    NotInLow,
}

impl CondOperator {
    const ALL: [CondOperator; 23] = [
        CondOperator::Equals,
        CondOperator::NotEquals,
        CondOperator::GreaterThan,
        CondOperator::LowerThan,
        CondOperator::GreaterThanEquals,
        CondOperator::LowerThanEquals,
        CondOperator::Starts,
        CondOperator::Ends,
        CondOperator::Contains,
        CondOperator::Excludes,
        CondOperator::In,
        CondOperator::NotIn,
        CondOperator::IsNull,
        CondOperator::NotNull,
        CondOperator::Between,
        CondOperator::EqualsLow,
        CondOperator::NotEqualsLow,
        CondOperator::StartsLow,
        CondOperator::EndsLow,
        CondOperator::ContainsLow,
        CondOperator::ExcludesLow,
        CondOperator::InLow,
        CondOperator::NotInLow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CondOperator::Equals => "$eq",
            CondOperator::NotEquals => "$ne",
            CondOperator::GreaterThan => "$gt",
            CondOperator::LowerThan => "$lt",
            CondOperator::GreaterThanEquals => "$gte",
            CondOperator::LowerThanEquals => "$lte",
            CondOperator::Starts => "$starts",
            CondOperator::Ends => "$ends",
            CondOperator::Contains => "$cont",
            CondOperator::Excludes => "$excl",
            CondOperator::In => "$in",
            CondOperator::NotIn => "$notin",
            CondOperator::IsNull => "$isnull",
            CondOperator::NotNull => "$notnull",
            CondOperator::Between => "$between",
            CondOperator::EqualsLow => "$eqL",
            CondOperator::NotEqualsLow => "$neL",
            CondOperator::StartsLow => "$startsL",
            CondOperator::EndsLow => "$endsL",
            CondOperator::ContainsLow => "$contL",
            CondOperator::ExcludesLow => "$exclL",
            CondOperator::InLow => "$inL",
            CondOperator::NotInLow => "$notinL",
        }
    }

    /// `$isnull` and `$notnull` are rendered without a value.
    pub fn takes_value(&self) -> bool {
        !matches!(self, CondOperator::IsNull | CondOperator::NotNull)
    }
}

impl FromStr for CondOperator {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CondOperator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ApiError::InvalidFilter(format!("unknown operator `{s}`")))
    }
}

impl std::fmt::Display for CondOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(field, operator, value)` filter triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: CondOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: CondOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Render as `field||$op||value` (unencoded).
    pub fn to_query_value(&self) -> String {
        let mut out = format!("{}{CONDITION_DELIMITER}{}", self.field, self.operator);
        if self.operator.takes_value() {
            out.push_str(CONDITION_DELIMITER);
            out.push_str(&value_text(&self.value));
        }
        out
    }
}

/// Flatten nested objects into dotted keys. Arrays and scalars are leaves;
/// empty objects and non-object roots contribute nothing.
pub fn flatten_object(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    if let Value::Object(map) = value {
        for (key, child) in map {
            flatten_into(child, key.clone(), &mut out);
        }
    }
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, format!("{path}.{key}"), out);
            }
        }
        leaf => out.push((path, leaf.clone())),
    }
}

/// Split a flat key on the first `||` or `:` into field and explicit
/// operator. An empty operator segment counts as absent.
fn split_operator(key: &str) -> (&str, Option<&str>) {
    let pipe = key.find(CONDITION_DELIMITER).map(|at| (at, CONDITION_DELIMITER.len()));
    let colon = key.find(':').map(|at| (at, 1));
    let split = match (pipe, colon) {
        (Some(p), Some(c)) => Some(if p.0 < c.0 { p } else { c }),
        (p, c) => p.or(c),
    };
    let Some((at, width)) = split else {
        return (key, None);
    };

    let rest = &key[at + width..];
    let end = [rest.find(CONDITION_DELIMITER), rest.find(':')]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());
    let operator = &rest[..end];
    (&key[..at], (!operator.is_empty()).then_some(operator))
}

/// Infer the operator for a value that came without one.
pub fn infer_operator(value: &Value) -> CondOperator {
    match value {
        Value::Number(_) => CondOperator::Equals,
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            CondOperator::Equals
        }
        _ => CondOperator::Contains,
    }
}

/// Drop the synthetic first segment of `_prefix.field` style keys.
pub fn normalize_field(field: &str) -> &str {
    if field.starts_with('_') {
        if let Some((_, rest)) = field.split_once('.') {
            return rest;
        }
    }
    field
}

/// Turn a (possibly nested) filter object into conditions, in key order.
pub fn compose_filter(filter: &Value) -> Result<Vec<Condition>, ApiError> {
    flatten_object(filter)
        .into_iter()
        .map(|(key, value)| {
            let (field, explicit) = split_operator(&key);
            let operator = match explicit {
                Some(op) => op.parse()?,
                None => infer_operator(&value),
            };
            Ok(Condition {
                field: normalize_field(field).to_string(),
                operator,
                value,
            })
        })
        .collect()
}

/// Encode the pass-through bucket as `key=value` pairs: flattened, nulls
/// skipped, keys sorted, arrays repeated.
pub fn compose_query_params(params: &Value) -> String {
    let mut flat = flatten_object(params);
    flat.sort_by(|a, b| a.0.cmp(&b.0));

    let mut pairs = Vec::new();
    for (key, value) in &flat {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_null()) {
                    pairs.push(encode_pair(key, &value_text(item)));
                }
            }
            other => pairs.push(encode_pair(key, &value_text(other))),
        }
    }
    pairs.join("&")
}

/// Split a list filter into its pass-through bucket, OR group and the
/// remaining AND filter.
pub fn split_list_filter(filter: &Value) -> (Value, Value, Value) {
    let Value::Object(map) = filter else {
        return (Value::Null, Value::Null, Value::Null);
    };
    let mut rest = map.clone();
    let pass_through = rest.remove(PASS_THROUGH_KEY).unwrap_or(Value::Null);
    let or = rest.remove(OR_KEY).unwrap_or(Value::Null);
    (pass_through, or, Value::Object(rest))
}

/// Join encoded query blocks with `&`, skipping empty ones.
pub fn merge_encoded_queries<I, S>(blocks: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    blocks
        .into_iter()
        .filter(|block| !block.as_ref().is_empty())
        .map(|block| block.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("&")
}

/// Builder for the backend's filter/sort/pagination block.
///
/// Parameters render in a fixed order: `filter`, `or`, `sort`, `limit`,
/// `page`, `offset`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestQuery {
    filter: Vec<Condition>,
    or: Vec<Condition>,
    sort: Vec<Sort>,
    limit: Option<u64>,
    page: Option<u64>,
    offset: Option<u64>,
}

impl RequestQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.filter.extend(conditions);
        self
    }

    pub fn or(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.or.extend(conditions);
        self
    }

    pub fn sort_by(mut self, sort: Option<&Sort>) -> Self {
        if let Some(sort) = sort {
            self.sort.push(sort.clone());
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Percent-encoded query string without a leading `?`.
    pub fn encode(&self) -> String {
        let mut pairs = Vec::new();
        for condition in &self.filter {
            pairs.push(encode_pair("filter", &condition.to_query_value()));
        }
        for condition in &self.or {
            pairs.push(encode_pair("or", &condition.to_query_value()));
        }
        for sort in &self.sort {
            pairs.push(encode_pair("sort", &format!("{},{}", sort.field, sort.order.as_str())));
        }
        if let Some(limit) = self.limit {
            pairs.push(format!("limit={limit}"));
        }
        if let Some(page) = self.page {
            pairs.push(format!("page={page}"));
        }
        if let Some(offset) = self.offset {
            pairs.push(format!("offset={offset}"));
        }
        pairs.join("&")
    }
}

fn encode_pair(key: &str, value: &str) -> String {
    format!("{}={}", encode_component(key), encode_component(value))
}

pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, QUERY_COMPONENT).to_string()
}

/// Plain-text rendering of a filter value; arrays are comma-joined.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}
