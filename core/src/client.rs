//! Stateless request builder and response parser for a NestJS CRUD backend.
//!
//! # Design
//! `CrudClient` holds only a `base_url` and the identifier field name and
//! carries no mutable state between calls. Each data-provider operation is
//! split into a `build_*` method that produces an `HttpRequest` and a
//! `parse_*` method that consumes an `HttpResponse`. The I/O in between
//! belongs to a `Transport`, keeping this half deterministic.

use serde_json::Value;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
use crate::query::{
    compose_filter, compose_query_params, merge_encoded_queries, split_list_filter, CondOperator,
    Condition, RequestQuery,
};
use crate::types::{DataResult, GetListParams, GetListResult, GetManyReferenceParams, Identifier, Record};

/// Synchronous, stateless client for a NestJS CRUD REST API.
#[derive(Debug, Clone)]
pub struct CrudClient {
    base_url: String,
    primary_key: String,
}

impl CrudClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            primary_key: "id".to_string(),
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn collection_url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.base_url)
    }

    fn record_url(&self, resource: &str, id: &Identifier) -> String {
        format!("{}/{resource}/{}", self.base_url, crate::query::encode_component(&id.to_string()))
    }

    fn with_query(url: String, query: &str) -> String {
        if query.is_empty() {
            url
        } else {
            format!("{url}?{query}")
        }
    }

    pub fn build_get_list(&self, resource: &str, params: &GetListParams) -> Result<HttpRequest, ApiError> {
        let (pass_through, or, filter) = split_list_filter(&params.filter);
        let query = RequestQuery::new()
            .filter(compose_filter(&filter)?)
            .or(compose_filter(&or)?)
            .sort_by(params.sort.as_ref())
            .limit(params.pagination.per_page)
            .page(params.pagination.page)
            .offset(params.pagination.offset());
        let query = merge_encoded_queries([compose_query_params(&pass_through), query.encode()]);
        Ok(get(Self::with_query(self.collection_url(resource), &query)))
    }

    pub fn build_get_one(&self, resource: &str, id: &Identifier) -> HttpRequest {
        get(self.record_url(resource, id))
    }

    pub fn build_get_many(&self, resource: &str, ids: &[Identifier]) -> HttpRequest {
        let ids: Vec<Value> = ids.iter().cloned().map(Value::from).collect();
        let query = RequestQuery::new()
            .filter([Condition::new(self.primary_key.as_str(), CondOperator::In, Value::Array(ids))])
            .encode();
        get(Self::with_query(self.collection_url(resource), &query))
    }

    pub fn build_get_many_reference(
        &self,
        resource: &str,
        params: &GetManyReferenceParams,
    ) -> Result<HttpRequest, ApiError> {
        let (pass_through, _, filter) = split_list_filter(&params.filter);
        let mut conditions = compose_filter(&filter)?;
        conditions.push(Condition::new(
            params.target.as_str(),
            CondOperator::Equals,
            Value::from(params.id.clone()),
        ));
        let query = RequestQuery::new()
            .filter(conditions)
            .sort_by(params.sort.as_ref())
            .limit(params.pagination.per_page)
            .offset(params.pagination.offset());
        let query = merge_encoded_queries([compose_query_params(&pass_through), query.encode()]);
        Ok(get(Self::with_query(self.collection_url(resource), &query)))
    }

    pub fn build_create(&self, resource: &str, body: RequestBody) -> HttpRequest {
        with_body(HttpMethod::Post, self.collection_url(resource), body)
    }

    /// Partial update (`PATCH`); `body` should hold only the changed fields.
    pub fn build_update(&self, resource: &str, id: &Identifier, body: RequestBody) -> HttpRequest {
        with_body(HttpMethod::Patch, self.record_url(resource, id), body)
    }

    /// Full replacement (`PUT`), used by `update_many`.
    pub fn build_replace(&self, resource: &str, id: &Identifier, body: RequestBody) -> HttpRequest {
        with_body(HttpMethod::Put, self.record_url(resource, id), body)
    }

    pub fn build_delete(&self, resource: &str, id: &Identifier) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Delete,
            url: self.record_url(resource, id),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Expects `{data: [...], total: n}`.
    pub fn parse_get_list(&self, response: HttpResponse) -> Result<GetListResult, ApiError> {
        let mut envelope = match parse_json(&response)? {
            Value::Object(map) => map,
            _ => return Err(ApiError::InvalidResponse("expected a `{data, total}` object".to_string())),
        };
        let data = match envelope.remove("data") {
            Some(Value::Array(items)) => into_records(items)?,
            _ => return Err(ApiError::InvalidResponse("missing `data` array".to_string())),
        };
        let total = envelope.get("total").and_then(Value::as_u64);
        Ok(GetListResult { data, total })
    }

    pub fn parse_get_one(&self, response: HttpResponse) -> Result<DataResult<Record>, ApiError> {
        Ok(DataResult {
            data: into_record(parse_json(&response)?)?,
        })
    }

    /// Accepts a bare array or a paginated envelope.
    pub fn parse_get_many(&self, response: HttpResponse) -> Result<DataResult<Vec<Record>>, ApiError> {
        let items = match parse_json(&response)? {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => return Err(ApiError::InvalidResponse("missing `data` array".to_string())),
            },
            _ => return Err(ApiError::InvalidResponse("expected an array of records".to_string())),
        };
        Ok(DataResult {
            data: into_records(items)?,
        })
    }

    /// The server's body is the created record and must carry its identifier.
    pub fn parse_create(&self, response: HttpResponse) -> Result<DataResult<Record>, ApiError> {
        let record = into_record(parse_json(&response)?)?;
        match record.get(&self.primary_key) {
            Some(id) if !id.is_null() => Ok(DataResult { data: record }),
            _ => Err(ApiError::MissingIdentifier(self.primary_key.clone())),
        }
    }

    pub fn parse_update(&self, response: HttpResponse) -> Result<DataResult<Record>, ApiError> {
        self.parse_get_one(response)
    }

    /// An empty body is fine; the requested id is merged into whatever the
    /// server sent.
    pub fn parse_delete(&self, response: HttpResponse, id: &Identifier) -> Result<DataResult<Record>, ApiError> {
        check_status(&response)?;
        let mut record = if response.body.trim().is_empty() {
            Record::new()
        } else {
            into_record(decode(&response.body)?)?
        };
        record.insert(self.primary_key.clone(), Value::from(id.clone()));
        Ok(DataResult { data: record })
    }
}

fn get(url: String) -> HttpRequest {
    HttpRequest {
        method: HttpMethod::Get,
        url,
        headers: Vec::new(),
        body: None,
    }
}

fn with_body(method: HttpMethod, url: String, body: RequestBody) -> HttpRequest {
    let content_type = match &body {
        RequestBody::Json(_) => "application/json".to_string(),
        RequestBody::Multipart(form) => form.content_type(),
    };
    HttpRequest {
        method,
        url,
        headers: vec![("content-type".to_string(), content_type)],
        body: Some(body),
    }
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if (200..300).contains(&response.status) {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

fn parse_json(response: &HttpResponse) -> Result<Value, ApiError> {
    check_status(response)?;
    decode(&response.body)
}

fn decode(body: &str) -> Result<Value, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

fn into_record(value: Value) -> Result<Record, ApiError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::InvalidResponse(format!("expected a record object, got `{other}`"))),
    }
}

fn into_records(items: Vec<Value>) -> Result<Vec<Record>, ApiError> {
    items.into_iter().map(into_record).collect()
}
