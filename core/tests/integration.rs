//! Full CRUD lifecycle test against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives every provider
//! operation over real HTTP through a ureq-backed `Transport`. Validates that
//! request building, upload encoding and response parsing agree with an
//! actual server.

use async_trait::async_trait;
use crud_provider::{
    ApiError, CreateParams, DataProvider, FileBlob, GetListParams, GetManyReferenceParams, HttpMethod,
    HttpRequest, HttpResponse, Identifier, Pagination, Payload, RequestBody, Transport, UpdateManyParams,
    UpdateParams,
};
use serde_json::{json, Value};

/// Executes requests with ureq on the blocking pool.
///
/// Disables ureq's automatic status-code-as-error behavior so 4xx/5xx
/// responses are returned as data rather than `Err`, letting the client
/// handle status interpretation.
struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

fn execute(agent: &ureq::Agent, req: HttpRequest) -> Result<HttpResponse, ureq::Error> {
    let content_type = req
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| "application/json".to_string());
    let body: Vec<u8> = match &req.body {
        Some(RequestBody::Json(text)) => text.as_bytes().to_vec(),
        Some(RequestBody::Multipart(form)) => form.encode().to_vec(),
        None => Vec::new(),
    };

    let mut response = match req.method {
        HttpMethod::Get => agent.get(&req.url).call()?,
        HttpMethod::Delete => agent.delete(&req.url).call()?,
        HttpMethod::Post => agent.post(&req.url).content_type(&content_type).send(&body[..])?,
        HttpMethod::Put => agent.put(&req.url).content_type(&content_type).send(&body[..])?,
        HttpMethod::Patch => agent.patch(&req.url).content_type(&content_type).send(&body[..])?,
    };

    let status = response.status().as_u16();
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Ok(HttpResponse::new(status, body))
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || execute(&agent, request))
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
            .map_err(|e| ApiError::Transport(e.to_string()))
    }
}

fn record(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().unwrap().clone()
}

#[tokio::test(flavor = "multi_thread")]
async fn crud_lifecycle() {
    // Step 1: start mock server on a random port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));

    let provider = DataProvider::new(&format!("http://{addr}"), UreqTransport::new());

    // Step 2: list, should be empty.
    let list = provider.get_list("posts", &GetListParams::default()).await.unwrap();
    assert!(list.data.is_empty(), "expected empty list");
    assert_eq!(list.total, Some(0));

    // Step 3: create a plain JSON record.
    let created = provider
        .create(
            "posts",
            CreateParams {
                data: Payload::from_json(json!({"title": "Integration test", "views": 5})),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.data["title"], "Integration test");
    let id = Identifier::Int(created.data["id"].as_i64().unwrap());

    // Step 4: create with a multipart upload.
    let with_file = Payload::new().with("title", json!("With file")).with(
        "_fileUpload",
        Payload::new().with("cover", FileBlob::from_bytes("c.txt", "text/plain", &b"hello"[..])),
    );
    let multipart = provider.create("posts", CreateParams { data: with_file }).await.unwrap();
    assert_eq!(multipart.data["title"], "With file");
    assert_eq!(
        multipart.data["cover"],
        json!({"filename": "c.txt", "contentType": "text/plain", "size": 5})
    );

    // Step 5: create with a base64 upload.
    let inline = Payload::new().with("title", json!("Inline")).with(
        "_base64Upload",
        Payload::new().with("cover", FileBlob::from_bytes("c.txt", "text/plain", &b"hello"[..])),
    );
    let base64 = provider.create("posts", CreateParams { data: inline }).await.unwrap();
    assert_eq!(base64.data["cover"], "data:text/plain;base64,aGVsbG8=");

    // Step 6: get the first record.
    let fetched = provider.get_one("posts", &id).await.unwrap();
    assert_eq!(fetched.data, created.data);

    // Step 7: update the title; untouched fields survive the PATCH.
    let mut changed = fetched.data.clone();
    changed.insert("title".to_string(), json!("Updated title"));
    let updated = provider
        .update(
            "posts",
            UpdateParams {
                id: id.clone(),
                data: Payload::from(changed),
                previous_data: fetched.data.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.data["title"], "Updated title");
    assert_eq!(updated.data["views"], 5);

    // Step 8: filtered, sorted, paginated list.
    let params = GetListParams {
        pagination: Pagination::new(1, 2),
        sort: Some(crud_provider::Sort::new("id", crud_provider::SortOrder::Desc)),
        filter: json!({"title": "i"}),
    };
    let list = provider.get_list("posts", &params).await.unwrap();
    assert_eq!(list.total, Some(3));
    let titles: Vec<&Value> = list.data.iter().map(|r| &r["title"]).collect();
    assert_eq!(titles, vec![&json!("Inline"), &json!("With file")]);

    let list = provider
        .get_list(
            "posts",
            &GetListParams {
                filter: json!({"title": "Updated"}),
                ..GetListParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(list.total, Some(1));

    // Step 9: get many.
    let many = provider
        .get_many("posts", &[Identifier::Int(1), Identifier::Int(3)])
        .await
        .unwrap();
    let ids: Vec<i64> = many.data.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3]);

    // Step 10: references.
    for body in ["first", "second"] {
        provider
            .create(
                "comments",
                CreateParams {
                    data: Payload::from_json(json!({"postId": 1, "body": body})),
                },
            )
            .await
            .unwrap();
    }
    provider
        .create(
            "comments",
            CreateParams {
                data: Payload::from_json(json!({"postId": 2, "body": "other"})),
            },
        )
        .await
        .unwrap();
    let refs = provider
        .get_many_reference(
            "comments",
            &GetManyReferenceParams {
                target: "postId".to_string(),
                id: Identifier::Int(1),
                pagination: Pagination::default(),
                sort: None,
                filter: json!({}),
            },
        )
        .await
        .unwrap();
    assert_eq!(refs.total, Some(2));

    // Step 11: update many replaces each record.
    let replaced = provider
        .update_many(
            "posts",
            UpdateManyParams {
                ids: vec![Identifier::Int(2), Identifier::Int(3)],
                data: Payload::from_json(json!({"title": "Bulk"})),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        replaced.data,
        vec![record(json!({"title": "Bulk", "id": 2})), record(json!({"title": "Bulk", "id": 3}))]
    );

    // Step 12: delete many, then delete the first record.
    let deleted = provider
        .delete_many("posts", &[Identifier::Int(2), Identifier::Int(3)])
        .await
        .unwrap();
    assert_eq!(deleted.data, vec![record(json!({"id": 2})), record(json!({"id": 3}))]);

    let deleted = provider.delete("posts", &id).await.unwrap();
    assert_eq!(deleted.data, record(json!({"id": 1})));

    // Step 13: get after delete, should be NotFound.
    let err = provider.get_one("posts", &id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    // Step 14: delete again, should be NotFound.
    let err = provider.delete("posts", &id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    // Step 15: list, should be empty again.
    let list = provider.get_list("posts", &GetListParams::default()).await.unwrap();
    assert!(list.data.is_empty(), "expected empty list after delete");
}
