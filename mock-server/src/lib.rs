//! In-memory REST backend speaking the NestJS CRUD query dialect.
//!
//! Any path segment is a resource. Records are JSON objects with a
//! server-assigned integer `id`. List requests understand `filter`, `or`,
//! `sort`, `limit`, `offset` and `page`; create and update accept JSON or
//! multipart bodies.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use axum::{
    extract::{FromRequest, Multipart, Path, RawQuery, Request, State},
    http::{header, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

pub type Record = Map<String, Value>;

#[derive(Debug, Default)]
pub struct Store {
    resources: HashMap<String, Vec<Record>>,
    next_id: i64,
}

impl Store {
    /// Assign the next id and append the record.
    pub fn insert(&mut self, resource: &str, mut record: Record) -> Record {
        self.next_id += 1;
        record.insert("id".to_string(), Value::from(self.next_id));
        self.resources
            .entry(resource.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    pub fn records(&self, resource: &str) -> &[Record] {
        self.resources.get(resource).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find(&self, resource: &str, id: &str) -> Option<&Record> {
        self.records(resource)
            .iter()
            .find(|record| record.get("id").map(text).as_deref() == Some(id))
    }

    fn find_mut(&mut self, resource: &str, id: &str) -> Option<&mut Record> {
        self.resources
            .get_mut(resource)?
            .iter_mut()
            .find(|record| record.get("id").map(text).as_deref() == Some(id))
    }

    fn remove(&mut self, resource: &str, id: &str) -> Option<Record> {
        let records = self.resources.get_mut(resource)?;
        let at = records
            .iter()
            .position(|record| record.get("id").map(text).as_deref() == Some(id))?;
        Some(records.remove(at))
    }
}

pub type Db = Arc<RwLock<Store>>;

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn app() -> Router {
    app_with(Db::default())
}

/// Router over an existing store, so tests can seed records first.
pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/{resource}", get(list_records).post(create_record))
        .route(
            "/{resource}/{id}",
            get(get_record)
                .patch(update_record)
                .put(replace_record)
                .delete(delete_record),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_records(
    State(db): State<Db>,
    Path(resource): Path<String>,
    RawQuery(query): RawQuery,
) -> ApiResult<Json<Value>> {
    let query = ListQuery::parse(query.as_deref().unwrap_or(""))?;
    let store = db.read().await;

    let mut matched = Vec::new();
    for record in store.records(&resource) {
        if query.matches(record)? {
            matched.push(record.clone());
        }
    }
    query.sort(&mut matched);

    let total = matched.len();
    let paginated = query.limit.is_some() || query.page.is_some();
    let offset = query.effective_offset().min(total);
    let end = match query.limit {
        Some(limit) => offset.saturating_add(limit).min(total),
        None => total,
    };
    let data: Vec<Value> = matched[offset..end].iter().cloned().map(Value::Object).collect();

    if !paginated {
        return Ok(Json(Value::Array(data)));
    }
    let limit = query.limit.unwrap_or(total.max(1)).max(1);
    Ok(Json(json!({
        "count": data.len(),
        "data": data,
        "total": total,
        "page": offset / limit + 1,
        "pageCount": total.div_ceil(limit),
    })))
}

async fn create_record(
    State(db): State<Db>,
    Path(resource): Path<String>,
    request: Request,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let body = read_body(request).await?;
    let record = db.write().await.insert(&resource, body);
    tracing::debug!(%resource, id = %record["id"], "created record");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_record(
    State(db): State<Db>,
    Path((resource, id)): Path<(String, String)>,
) -> ApiResult<Json<Record>> {
    let store = db.read().await;
    store
        .find(&resource, &id)
        .map(|record| Json(record.clone()))
        .ok_or_else(not_found)
}

async fn update_record(
    State(db): State<Db>,
    Path((resource, id)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Json<Record>> {
    let changes = read_body(request).await?;
    let mut store = db.write().await;
    let record = store.find_mut(&resource, &id).ok_or_else(not_found)?;
    for (key, value) in changes {
        if key != "id" {
            record.insert(key, value);
        }
    }
    Ok(Json(record.clone()))
}

async fn replace_record(
    State(db): State<Db>,
    Path((resource, id)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Json<Record>> {
    let mut body = read_body(request).await?;
    let mut store = db.write().await;
    let record = store.find_mut(&resource, &id).ok_or_else(not_found)?;
    let record_id = record.get("id").cloned().unwrap_or(Value::Null);
    body.insert("id".to_string(), record_id);
    *record = body;
    Ok(Json(record.clone()))
}

async fn delete_record(
    State(db): State<Db>,
    Path((resource, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    db.write().await.remove(&resource, &id).ok_or_else(not_found)?;
    tracing::debug!(%resource, %id, "deleted record");
    Ok(StatusCode::OK)
}

fn not_found() -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, "record not found".to_string())
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

async fn read_body(request: Request) -> ApiResult<Record> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| (rejection.status(), rejection.body_text()))?;
        return read_multipart(multipart).await;
    }

    match Json::<Value>::from_request(request, &()).await {
        Ok(Json(Value::Object(record))) => Ok(record),
        Ok(Json(_)) => Err((StatusCode::UNPROCESSABLE_ENTITY, "expected a JSON object".to_string())),
        Err(rejection) => Err((rejection.status(), rejection.body_text())),
    }
}

/// Rebuild nested JSON from bracketed part names. File parts are stored as
/// `{filename, contentType, size}` descriptors.
async fn read_multipart(mut multipart: Multipart) -> ApiResult<Record> {
    let mut root = Value::Object(Map::new());
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;

        let value = match file_name {
            Some(filename) => json!({
                "filename": filename,
                "contentType": content_type,
                "size": data.len(),
            }),
            None => Value::String(String::from_utf8_lossy(&data).into_owned()),
        };
        place(&mut root, &field_path(&name), value);
    }
    match root {
        Value::Object(record) => Ok(record),
        _ => Err(bad_request("malformed multipart body")),
    }
}

/// `author[tags][]` -> `["author", "tags", ""]`; an empty segment appends.
fn field_path(name: &str) -> Vec<&str> {
    let Some(at) = name.find('[') else {
        return vec![name];
    };
    let mut path = vec![&name[..at]];
    let inner = name[at..].trim_start_matches('[').trim_end_matches(']');
    path.extend(inner.split("]["));
    path
}

fn place(target: &mut Value, path: &[&str], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    if segment.is_empty() {
        if !target.is_array() {
            *target = Value::Array(Vec::new());
        }
        if let Value::Array(items) = target {
            let mut child = Value::Null;
            place(&mut child, rest, value);
            items.push(child);
        }
    } else {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        if let Value::Object(map) = target {
            let slot = map.entry(segment.to_string()).or_insert(Value::Null);
            place(slot, rest, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Query dialect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub field: String,
    pub op: String,
    pub value: Option<String>,
}

impl Cond {
    fn parse(raw: &str) -> ApiResult<Self> {
        let mut parts = raw.splitn(3, "||");
        let field = parts.next().unwrap_or_default();
        let op = parts.next().ok_or_else(|| bad_request(format!("missing operator in `{raw}`")))?;
        Ok(Cond {
            field: field.to_string(),
            op: op.to_string(),
            value: parts.next().map(str::to_string),
        })
    }

    fn matches(&self, record: &Record) -> ApiResult<bool> {
        let actual = resolve(record, &self.field);
        let expected = self.value.as_deref().unwrap_or("");
        let (op, lower) = match self.op.strip_suffix('L') {
            Some(base) => (base, true),
            None => (self.op.as_str(), false),
        };
        let fold = |s: String| if lower { s.to_lowercase() } else { s };

        let result = match op {
            "$isnull" => actual.map_or(true, Value::is_null),
            "$notnull" => !actual.map_or(true, Value::is_null),
            _ => {
                let Some(actual) = actual.filter(|v| !v.is_null()) else {
                    return Ok(false);
                };
                let actual_text = fold(text(actual));
                let expected_text = fold(expected.to_string());
                match op {
                    "$eq" => equals(actual, &actual_text, &expected_text),
                    "$ne" => !equals(actual, &actual_text, &expected_text),
                    "$gt" => compare(actual, expected) == Some(Ordering::Greater),
                    "$lt" => compare(actual, expected) == Some(Ordering::Less),
                    "$gte" => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
                    "$lte" => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
                    "$starts" => actual_text.starts_with(&expected_text),
                    "$ends" => actual_text.ends_with(&expected_text),
                    "$cont" => actual_text.contains(&expected_text),
                    "$excl" => !actual_text.contains(&expected_text),
                    "$in" => expected_text.split(',').any(|item| equals(actual, &actual_text, item)),
                    "$notin" => !expected_text.split(',').any(|item| equals(actual, &actual_text, item)),
                    "$between" => {
                        let mut bounds = expected.splitn(2, ',');
                        let low = bounds.next().unwrap_or_default();
                        let high = bounds.next().unwrap_or_default();
                        matches!(compare(actual, low), Some(Ordering::Greater | Ordering::Equal))
                            && matches!(compare(actual, high), Some(Ordering::Less | Ordering::Equal))
                    }
                    other => return Err(bad_request(format!("unknown operator `{other}`"))),
                }
            }
        };
        Ok(result)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: Vec<Cond>,
    pub or: Vec<Cond>,
    pub sort: Vec<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub page: Option<usize>,
}

impl ListQuery {
    pub fn parse(query: &str) -> ApiResult<Self> {
        let mut parsed = ListQuery::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.trim_end_matches("[]") {
                "filter" => parsed.filter.push(Cond::parse(&value)?),
                "or" => parsed.or.push(Cond::parse(&value)?),
                "sort" => {
                    let (field, order) = value.split_once(',').unwrap_or((value.as_ref(), "ASC"));
                    parsed.sort.push((field.to_string(), order.eq_ignore_ascii_case("DESC")));
                }
                "limit" => parsed.limit = Some(number(&key, &value)?),
                "offset" => parsed.offset = Some(number(&key, &value)?),
                "page" => parsed.page = Some(number(&key, &value)?),
                _ => {}
            }
        }
        Ok(parsed)
    }

    /// Filters AND together; with `or` present the result is
    /// `(all filters) OR (all ors)`, and `or` alone means any of them.
    fn matches(&self, record: &Record) -> ApiResult<bool> {
        let all = |conds: &[Cond]| -> ApiResult<bool> {
            for cond in conds {
                if !cond.matches(record)? {
                    return Ok(false);
                }
            }
            Ok(true)
        };
        if self.or.is_empty() {
            return all(&self.filter);
        }
        if self.filter.is_empty() {
            for cond in &self.or {
                if cond.matches(record)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        Ok(all(&self.filter)? || all(&self.or)?)
    }

    fn sort(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            for (field, desc) in &self.sort {
                let ordering = order_values(resolve(a, field), resolve(b, field));
                let ordering = if *desc { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    /// `page` wins over `offset` when both are present.
    fn effective_offset(&self) -> usize {
        match (self.page, self.limit) {
            (Some(page), Some(limit)) => page.saturating_sub(1).saturating_mul(limit),
            _ => self.offset.unwrap_or(0),
        }
    }
}

fn number(key: &str, value: &str) -> ApiResult<usize> {
    value
        .parse()
        .map_err(|_| bad_request(format!("`{key}` must be a non-negative integer")))
}

fn resolve<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn equals(actual: &Value, actual_text: &str, expected: &str) -> bool {
    match (actual.as_f64(), expected.parse::<f64>()) {
        (Some(a), Ok(b)) => a == b,
        _ => actual_text == expected,
    }
}

fn compare(actual: &Value, expected: &str) -> Option<Ordering> {
    match (actual.as_f64(), expected.parse::<f64>()) {
        (Some(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(text(actual).as_str().cmp(expected)),
    }
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => text(a).cmp(&text(b)),
        },
    }
}
