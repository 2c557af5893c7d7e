//! `DataProvider` driven through an in-memory transport that records every
//! request and answers from a closure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Barrier;
use tokio::time::timeout;

use async_trait::async_trait;
use crud_provider::{
    ApiError, CreateParams, DataProvider, FileBlob, GetListParams, HttpMethod, HttpRequest, HttpResponse,
    Identifier, Pagination, PartValue, Payload, RequestBody, Sort, SortOrder, Transport, UpdateManyParams,
    UpdateParams,
};
use serde_json::{json, Value};

const BASE_URL: &str = "http://api.test";

type Responder = dyn Fn(&HttpRequest) -> (u64, HttpResponse) + Send + Sync;

/// Records requests; the responder returns a delay in milliseconds and the response.
struct Recording {
    sent: Mutex<Vec<HttpRequest>>,
    respond: Box<Responder>,
}

impl Recording {
    fn new(respond: impl Fn(&HttpRequest) -> (u64, HttpResponse) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for Recording {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.sent.lock().unwrap().push(request.clone());
        let (delay, response) = (self.respond)(&request);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(response)
    }
}

/// Holds every request until `n` of them are in flight at once, so a
/// provider that awaits sub-requests one by one never gets past the first.
struct Rendezvous {
    barrier: Barrier,
    failing_id: Option<&'static str>,
}

impl Rendezvous {
    fn new(n: usize, failing_id: Option<&'static str>) -> Self {
        Self {
            barrier: Barrier::new(n),
            failing_id,
        }
    }
}

#[async_trait]
impl Transport for Rendezvous {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.barrier.wait().await;
        let id = last_id(&request.url);
        if self.failing_id == Some(id.as_str()) {
            return Ok(HttpResponse::new(500, "boom"));
        }
        Ok(HttpResponse::new(200, format!(r#"{{"id":{id}}}"#)))
    }
}

struct Unreachable;

#[async_trait]
impl Transport for Unreachable {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, ApiError> {
        Err(ApiError::Transport("connection refused".to_string()))
    }
}

fn provider(transport: &Arc<Recording>) -> DataProvider<Arc<Recording>> {
    DataProvider::new(BASE_URL, transport.clone())
}

fn last_id(url: &str) -> String {
    url.rsplit('/').next().unwrap().to_string()
}

fn json_sent(request: &HttpRequest) -> Value {
    let text = request.body.as_ref().and_then(RequestBody::as_json).unwrap();
    serde_json::from_str(text).unwrap()
}

fn record(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().unwrap().clone()
}

// --- reads ---

#[tokio::test]
async fn get_list_builds_query_and_reads_envelope() {
    let transport = Recording::new(|_| (0, HttpResponse::new(200, r#"{"data":[{"id":1,"title":"foo bar"}],"total":27}"#)));
    let params = GetListParams {
        pagination: Pagination::new(2, 10),
        sort: Some(Sort::new("title", SortOrder::Asc)),
        filter: json!({"title": "foo"}),
    };

    let result = provider(&transport).get_list("posts", &params).await.unwrap();

    assert_eq!(result.total, Some(27));
    assert_eq!(result.data, vec![record(json!({"id": 1, "title": "foo bar"}))]);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Get);
    assert_eq!(
        sent[0].url,
        "http://api.test/posts?filter=title%7C%7C%24cont%7C%7Cfoo&sort=title%2CASC&limit=10&page=2&offset=10"
    );
}

#[tokio::test]
async fn get_one_missing_record_is_not_found() {
    let transport = Recording::new(|_| (0, HttpResponse::new(404, "")));
    let err = provider(&transport).get_one("posts", &Identifier::Int(9)).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn transport_errors_propagate() {
    let provider = DataProvider::new(BASE_URL, Unreachable);
    let err = provider.get_list("posts", &GetListParams::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
}

// --- writes ---

#[tokio::test]
async fn update_sends_only_changed_fields_with_patch() {
    let transport = Recording::new(|_| (0, HttpResponse::new(200, r#"{"id":3,"title":"New","views":5}"#)));
    let params = UpdateParams {
        id: Identifier::Int(3),
        data: Payload::from_json(json!({"id": 3, "title": "New", "views": 5})),
        previous_data: record(json!({"id": 3, "title": "Old", "views": 5})),
    };

    let result = provider(&transport).update("posts", params).await.unwrap();

    assert_eq!(result.data["title"], "New");
    let sent = transport.sent();
    assert_eq!(sent[0].method, HttpMethod::Patch);
    assert_eq!(sent[0].url, "http://api.test/posts/3");
    assert_eq!(json_sent(&sent[0]), json!({"title": "New"}));
}

#[tokio::test]
async fn update_many_puts_full_payload_to_each_id() {
    let transport = Recording::new(|req| {
        let id = last_id(&req.url);
        (0, HttpResponse::new(200, format!(r#"{{"id":{id},"published":true}}"#)))
    });
    let params = UpdateManyParams {
        ids: vec![Identifier::Int(1), Identifier::Int(2)],
        data: Payload::from_json(json!({"published": true})),
    };

    let result = provider(&transport).update_many("posts", params).await.unwrap();

    let ids: Vec<&Value> = result.data.iter().map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&json!(1), &json!(2)]);
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    for request in &sent {
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(json_sent(request), json!({"published": true}));
    }
}

#[tokio::test]
async fn delete_merges_requested_id_into_empty_body() {
    let transport = Recording::new(|_| (0, HttpResponse::new(200, "")));
    let result = provider(&transport).delete("posts", &Identifier::from("abc")).await.unwrap();
    assert_eq!(result.data, record(json!({"id": "abc"})));
    assert_eq!(transport.sent()[0].url, "http://api.test/posts/abc");
}

#[tokio::test]
async fn delete_many_keeps_id_order_when_responses_arrive_out_of_order() {
    // Later ids answer first.
    let transport = Recording::new(|req| {
        let id: u64 = last_id(&req.url).parse().unwrap();
        (40 - id * 10, HttpResponse::new(200, ""))
    });
    let ids = [Identifier::Int(1), Identifier::Int(2), Identifier::Int(3)];

    let result = provider(&transport).delete_many("posts", &ids).await.unwrap();

    let returned: Vec<&Value> = result.data.iter().map(|r| &r["id"]).collect();
    assert_eq!(returned, vec![&json!(1), &json!(2), &json!(3)]);
    let mut urls: Vec<String> = transport.sent().into_iter().map(|r| r.url).collect();
    urls.sort();
    assert_eq!(
        urls,
        vec!["http://api.test/posts/1", "http://api.test/posts/2", "http://api.test/posts/3"]
    );
    assert!(transport.sent().iter().all(|r| r.method == HttpMethod::Delete));
}

#[tokio::test]
async fn delete_many_fails_when_any_sub_request_fails() {
    let transport = Recording::new(|req| match last_id(&req.url).as_str() {
        "2" => (0, HttpResponse::new(500, "boom")),
        _ => (10, HttpResponse::new(200, "")),
    });
    let ids = [Identifier::Int(1), Identifier::Int(2), Identifier::Int(3)];

    let err = provider(&transport).delete_many("posts", &ids).await.unwrap_err();

    match err {
        ApiError::HttpError { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected HttpError, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_many_issues_all_requests_before_awaiting_any() {
    let ids = [Identifier::Int(1), Identifier::Int(2), Identifier::Int(3)];
    let provider = DataProvider::new(BASE_URL, Rendezvous::new(ids.len(), None));

    let result = timeout(Duration::from_secs(2), provider.delete_many("posts", &ids))
        .await
        .expect("sub-requests were not in flight together")
        .unwrap();

    let returned: Vec<&Value> = result.data.iter().map(|r| &r["id"]).collect();
    assert_eq!(returned, vec![&json!(1), &json!(2), &json!(3)]);
}

#[tokio::test]
async fn update_many_issues_all_requests_before_awaiting_any() {
    let params = UpdateManyParams {
        ids: vec![Identifier::Int(3), Identifier::Int(1), Identifier::Int(2)],
        data: Payload::from_json(json!({"published": true})),
    };
    let provider = DataProvider::new(BASE_URL, Rendezvous::new(params.ids.len(), None));

    let result = timeout(Duration::from_secs(2), provider.update_many("posts", params))
        .await
        .expect("sub-requests were not in flight together")
        .unwrap();

    let returned: Vec<&Value> = result.data.iter().map(|r| &r["id"]).collect();
    assert_eq!(returned, vec![&json!(3), &json!(1), &json!(2)]);
}

#[tokio::test]
async fn update_many_fails_when_any_sub_request_fails() {
    let params = UpdateManyParams {
        ids: vec![Identifier::Int(1), Identifier::Int(2), Identifier::Int(3)],
        data: Payload::from_json(json!({"published": true})),
    };
    let provider = DataProvider::new(BASE_URL, Rendezvous::new(params.ids.len(), Some("2")));

    let err = timeout(Duration::from_secs(2), provider.update_many("posts", params))
        .await
        .expect("sub-requests were not in flight together")
        .unwrap_err();

    assert!(matches!(err, ApiError::HttpError { status: 500, .. }));
}

// --- uploads ---

#[tokio::test]
async fn create_inlines_base64_uploads() {
    let transport = Recording::new(|_| (0, HttpResponse::new(201, r#"{"id":7}"#)));
    let data = Payload::new().with("title", json!("Hi")).with(
        "_base64Upload",
        Payload::new().with("cover", FileBlob::from_bytes("a.png", "image/png", &b"abc"[..])),
    );

    let result = provider(&transport).create("posts", CreateParams { data }).await.unwrap();

    assert_eq!(result.data, record(json!({"id": 7})));
    let sent = transport.sent();
    assert_eq!(sent[0].method, HttpMethod::Post);
    assert_eq!(
        json_sent(&sent[0]),
        json!({"title": "Hi", "cover": "data:image/png;base64,YWJj"})
    );
}

#[tokio::test]
async fn create_sends_form_data_uploads_as_multipart() {
    let transport = Recording::new(|_| (0, HttpResponse::new(201, r#"{"id":8,"title":"Hi"}"#)));
    let data = Payload::new().with("title", json!("Hi")).with(
        "_fileUpload",
        Payload::new().with("cover", FileBlob::from_bytes("a.png", "image/png", &b"abc"[..])),
    );

    provider(&transport).create("posts", CreateParams { data }).await.unwrap();

    let sent = transport.sent();
    let form = sent[0].body.as_ref().and_then(RequestBody::as_multipart).unwrap();
    assert_eq!(
        sent[0].headers,
        vec![("content-type".to_string(), form.content_type())]
    );
    assert_eq!(form.get("title"), Some(&PartValue::Text("Hi".to_string())));
    assert!(form.get("_fileUpload").is_none());
    match form.get("cover") {
        Some(PartValue::File { filename, data, .. }) => {
            assert_eq!(filename, "a.png");
            assert_eq!(&data[..], b"abc");
        }
        other => panic!("expected a file part, got {other:?}"),
    }
}

#[tokio::test]
async fn create_without_identifier_in_response_fails() {
    let transport = Recording::new(|_| (0, HttpResponse::new(201, r#"{"title":"Hi"}"#)));
    let data = Payload::from_json(json!({"title": "Hi"}));
    let err = provider(&transport).create("posts", CreateParams { data }).await.unwrap_err();
    assert!(matches!(err, ApiError::MissingIdentifier(_)));
}
