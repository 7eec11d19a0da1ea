//! Integration tests for the Modifier middleware.

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zentinel_agent_modifier::config::QueryConfig;
use zentinel_agent_modifier::types::{empty, full, BoxError};
use zentinel_agent_modifier::{
    handler_fn, Handler, Modifier, ModifierConfig, Request, ResponseRecorder,
};

// =============================================================================
// Helpers
// =============================================================================

/// What the downstream handler received.
#[derive(Debug)]
struct Seen {
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

type Slot = Arc<Mutex<Option<Seen>>>;

/// A downstream handler that records the request and answers with a fixed
/// status, content type and body.
fn upstream(
    slot: Slot,
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> Arc<dyn Handler> {
    Arc::new(handler_fn(move |req: Request| {
        let slot = slot.clone();
        async move {
            let (parts, incoming) = req.into_parts();
            let bytes = incoming.collect().await.unwrap().to_bytes();
            *slot.lock().unwrap() = Some(Seen {
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body: bytes,
            });

            let mut response = http::Response::new(Bytes::from_static(body.as_bytes()));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, content_type.parse().unwrap());
            response
        }
    }))
}

fn json_upstream(slot: Slot, body: &'static str) -> Arc<dyn Handler> {
    upstream(slot, StatusCode::OK, "application/json", body)
}

fn post(uri: &str, body: &'static str) -> Request {
    http::Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(full(body))
        .unwrap()
}

async fn run(modifier: &Modifier, req: Request) -> http::Response<Bytes> {
    let mut recorder = ResponseRecorder::new();
    modifier.handle(req, &mut recorder).await;
    recorder.into_response()
}

fn text(response: &http::Response<Bytes>) -> &str {
    std::str::from_utf8(response.body()).unwrap()
}

// =============================================================================
// Configuration Parsing Tests
// =============================================================================

#[test]
fn test_parse_minimal_config() {
    let config: ModifierConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(config, ModifierConfig::default());
}

#[test]
fn test_parse_full_config() {
    let yaml = r#"
settings:
  max_body_size: 5242880
request: |
  {"question": "[[ .request.api.body.ask ]]"}
response:
  200: '{"answer": "[[ .response.body.text ]]"}'
  500: 'upstream failed'
headers:
  X-Request-ID: "req_[[ .context.unixtime ]]"
query:
  transform:
    question_id: "[[ .request.query.ask_id ]]"
"#;
    let config: ModifierConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.settings.max_body_size, 5242880);
    assert!(config.request_template().unwrap().contains(".request.api.body.ask"));
    assert_eq!(config.response.len(), 2);
    assert_eq!(config.headers.len(), 1);
    assert_eq!(
        config.query_templates().unwrap().get("question_id").map(String::as_str),
        Some("[[ .request.query.ask_id ]]")
    );
}

#[test]
fn test_parse_json_config() {
    let json = r#"{
        "request": "{\"q\": \"[[ .request.api.body.ask ]]\"}",
        "response": { "200": "[[ .response.body ]]" },
        "headers": { "X-Trace": "[[ .context.request_id ]]" }
    }"#;
    let config: ModifierConfig = serde_json::from_str(json).unwrap();
    assert!(config.response.contains_key(&200));
    assert!(config.query.is_none());

    let modifier = Modifier::new(&config, "json", json_upstream(Slot::default(), "{}")).unwrap();
    assert_eq!(modifier.header_templates(), 1);
    assert_eq!(modifier.response_statuses(), vec![200]);
}

#[test]
fn test_config_serialization_skips_empty_stages() {
    let config = ModifierConfig {
        request: Some("{}".to_string()),
        ..Default::default()
    };
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["request"], "{}");
    assert!(json.get("response").is_none());
    assert!(json.get("headers").is_none());
    assert!(json.get("query").is_none());
}

#[test]
fn test_invalid_response_template_fails_construction() {
    let config = ModifierConfig {
        response: HashMap::from([(200, "[[ if .x ]]unterminated".to_string())]),
        ..Default::default()
    };
    let err = Modifier::new(&config, "bad", json_upstream(Slot::default(), "{}"))
        .err()
        .unwrap();
    assert!(err.to_string().contains("response.200"));
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[tokio::test]
async fn test_full_round_trip() {
    let config = ModifierConfig {
        request: Some(r#"{"question": "[[ .request.api.body.ask ]]"}"#.to_string()),
        response: HashMap::from([(
            200,
            r#"{
  "answer": "[[ .response.body.text ]]",
  "question": "[[ .request.modified.body.question ]]",
  "original": "[[ .request.api.body.ask ]]",
  "status": [[ .response.status ]]
}"#
            .to_string(),
        )]),
        headers: HashMap::from([(
            "X-Request-ID".to_string(),
            "req_[[ .request.query.ask_id ]]".to_string(),
        )]),
        query: Some(QueryConfig {
            transform: HashMap::from([(
                "question_id".to_string(),
                "[[ .request.query.ask_id ]]_done".to_string(),
            )]),
        }),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(
        &config,
        "round-trip",
        json_upstream(slot.clone(), r#"{"text": "A systems language"}"#),
    )
    .unwrap();

    let response = run(&modifier, post("/ask?ask_id=7", r#"{"ask": "What is Rust?"}"#)).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert_eq!(seen.uri, "/ask?ask_id=7&question_id=7_done");
    assert_eq!(seen.headers.get("x-request-id").unwrap(), "req_7");
    assert_eq!(seen.body.as_ref(), br#"{"question": "What is Rust?"}"#);
    assert_eq!(
        seen.headers.get(CONTENT_LENGTH).unwrap(),
        &seen.body.len().to_string()
    );

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        text(&response),
        r#"{"answer":"A systems language","original":"What is Rust?","question":"What is Rust?","status":200}"#
    );
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(
        response.headers().get(CONTENT_LENGTH).unwrap(),
        &response.body().len().to_string()
    );
}

#[tokio::test]
async fn test_unlisted_status_passes_through() {
    let config = ModifierConfig {
        response: HashMap::from([(200, r#"{"wrapped": true}"#.to_string())]),
        ..Default::default()
    };
    let modifier = Modifier::new(
        &config,
        "pass",
        upstream(Slot::default(), StatusCode::NOT_FOUND, "text/plain", "no such thing"),
    )
    .unwrap();

    let response = run(&modifier, post("/missing", "{}")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text(&response), "no such thing");
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
}

#[tokio::test]
async fn test_response_body_without_templates_is_untouched() {
    let slot = Slot::default();
    let modifier = Modifier::new(
        &ModifierConfig::default(),
        "noop",
        json_upstream(slot.clone(), "{ \"spaced\" : 1 }"),
    )
    .unwrap();

    let response = run(&modifier, post("/p?b=2&a=1", r#"{ "keep" : "layout" }"#)).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert_eq!(seen.uri, "/p?b=2&a=1");
    assert_eq!(seen.body.as_ref(), br#"{ "keep" : "layout" }"#);
    assert_eq!(text(&response), "{ \"spaced\" : 1 }");
}

#[tokio::test]
async fn test_non_json_response_output_is_raw() {
    let config = ModifierConfig {
        response: HashMap::from([(
            201,
            "created [[ .response.body.id ]] for [[ .request.path ]]".to_string(),
        )]),
        ..Default::default()
    };
    let modifier = Modifier::new(
        &config,
        "raw",
        upstream(Slot::default(), StatusCode::CREATED, "text/plain", r#"{"id": 42}"#),
    )
    .unwrap();

    let response = run(&modifier, post("/items", "{}")).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(text(&response), "created 42 for /items");
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "21");
}

#[tokio::test]
async fn test_plain_text_upstream_body_is_a_string() {
    let config = ModifierConfig {
        response: HashMap::from([(200, r#"{"echo": "[[ .response.body ]]"}"#.to_string())]),
        ..Default::default()
    };
    let modifier = Modifier::new(
        &config,
        "plain",
        upstream(Slot::default(), StatusCode::OK, "text/plain", "hello"),
    )
    .unwrap();

    let response = run(&modifier, post("/", "{}")).await;

    assert_eq!(text(&response), r#"{"echo":"hello"}"#);
}

#[tokio::test]
async fn test_malformed_request_json_is_rejected() {
    let config = ModifierConfig {
        request: Some(r#"{"q": "[[ .request.api.body.ask ]]"}"#.to_string()),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "reject", json_upstream(slot.clone(), "{}")).unwrap();

    let response = run(&modifier, post("/ask", "{not json")).await;

    assert!(slot.lock().unwrap().is_none());
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(text(&response).starts_with("Request masking error: "));
    assert!(text(&response).ends_with('\n'));
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.headers().get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
}

#[tokio::test]
async fn test_oversized_request_body_is_rejected() {
    let mut config = ModifierConfig {
        request: Some("{}".to_string()),
        ..Default::default()
    };
    config.settings.max_body_size = 8;
    let modifier = Modifier::new(&config, "limit", json_upstream(Slot::default(), "{}")).unwrap();

    let response = run(&modifier, post("/", r#"{"much": "too long"}"#)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_response_template_error_is_500() {
    let config = ModifierConfig {
        response: HashMap::from([(200, "[[ .response.body.text.deeper ]]".to_string())]),
        ..Default::default()
    };
    let modifier = Modifier::new(
        &config,
        "broken",
        json_upstream(Slot::default(), r#"{"text": "scalar"}"#),
    )
    .unwrap();

    let response = run(&modifier, post("/", "{}")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(text(&response).starts_with("response masking error: "));
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );
    assert!(response.headers().get(CONTENT_LENGTH).is_none());
}

#[tokio::test]
async fn test_empty_header_result_is_not_written() {
    let config = ModifierConfig {
        headers: HashMap::from([
            ("X-Missing".to_string(), "[[ .request.headers.nope ]]".to_string()),
            ("X-Method".to_string(), "[[ lower .request.method ]]".to_string()),
        ]),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "headers", json_upstream(slot.clone(), "{}")).unwrap();

    run(&modifier, post("/", "{}")).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert!(seen.headers.get("x-missing").is_none());
    assert_eq!(seen.headers.get("x-method").unwrap(), "post");
}

#[tokio::test]
async fn test_context_is_fresh_per_request() {
    let config = ModifierConfig {
        response: HashMap::from([(200, "[[ .context.request_id ]]".to_string())]),
        ..Default::default()
    };
    let modifier = Modifier::new(&config, "ctx", json_upstream(Slot::default(), "{}")).unwrap();

    let first = run(&modifier, post("/", "{}")).await;
    let second = run(&modifier, post("/", "{}")).await;

    assert_eq!(first.body().len(), 16);
    assert_eq!(second.body().len(), 16);
    assert_ne!(first.body(), second.body());
}

#[tokio::test]
async fn test_bodyless_request_with_response_template() {
    let config = ModifierConfig {
        request: Some(r#"{"q": "[[ .request.api.body.ask ]]"}"#.to_string()),
        response: HashMap::from([(
            200,
            r#"{"asked": "[[ .request.api.body.ask ]]", "method": "[[ .request.method ]]"}"#
                .to_string(),
        )]),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "get", json_upstream(slot.clone(), "{}")).unwrap();

    let req = http::Request::builder()
        .method("GET")
        .uri("/status")
        .body(empty())
        .unwrap();
    let response = run(&modifier, req).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert!(seen.body.is_empty());
    assert_eq!(text(&response), r#"{"asked":"","method":"GET"}"#);
}

#[tokio::test]
async fn test_response_sees_buffered_request_without_request_template() {
    let config = ModifierConfig {
        response: HashMap::from([(
            200,
            r#"{"echo": "[[ .request.api.body.ask ]]", "same": [[ eq .request.api.body.ask .request.modified.body.ask ]]}"#
                .to_string(),
        )]),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "buffer", json_upstream(slot.clone(), "{}")).unwrap();

    let response = run(&modifier, post("/", r#"{"ask": "hi"}"#)).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert_eq!(seen.body.as_ref(), br#"{"ask": "hi"}"#);
    assert_eq!(text(&response), r#"{"echo":"hi","same":true}"#);
}

#[tokio::test]
async fn test_function_library_in_templates() {
    let config = ModifierConfig {
        request: Some(
            r#"{"user": "[[ default "anonymous" .request.api.body.user ]]", "tags": [[ toJSON .request.api.body.tags ]], "shout": "[[ upper .request.api.body.word ]]"}"#
                .to_string(),
        ),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "funcs", json_upstream(slot.clone(), "{}")).unwrap();

    run(&modifier, post("/", r#"{"tags": ["a", "b"], "word": "hey"}"#)).await;

    let seen = slot.lock().unwrap().take().unwrap();
    let body: serde_json::Value = serde_json::from_slice(&seen.body).unwrap();
    assert_eq!(body["user"], "anonymous");
    assert_eq!(body["tags"], serde_json::json!(["a", "b"]));
    assert_eq!(body["shout"], "HEY");
}

#[tokio::test]
async fn test_concurrent_requests_share_compiled_templates() {
    let config = ModifierConfig {
        request: Some(
            r#"{"n": [[ .request.api.body.n ]], "id": "[[ .context.request_id ]]"}"#.to_string(),
        ),
        ..Default::default()
    };
    let echo = handler_fn(|req: Request| async move {
        http::Response::new(req.into_body().collect().await.unwrap().to_bytes())
    });
    let modifier = Arc::new(Modifier::new(&config, "shared", Arc::new(echo)).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|n| {
            let modifier = modifier.clone();
            tokio::spawn(async move {
                let body = format!(r#"{{"n": {}}}"#, n);
                let req = http::Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(full(body))
                    .unwrap();
                (n, run(&modifier, req).await)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let (n, response) = task.await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["n"], n);
        ids.push(body["id"].as_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

/// A request body whose stream fails on the first read.
struct ResetBody;

impl http_body::Body for ResetBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<http_body::Frame<Bytes>, Self::Error>>> {
        std::task::Poll::Ready(Some(Err("connection reset by peer".into())))
    }
}

#[tokio::test]
async fn test_unreadable_request_body_is_rejected() {
    let config = ModifierConfig {
        request: Some(r#"{"q": "[[ .request.api.body.ask ]]"}"#.to_string()),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "reset", json_upstream(slot.clone(), "{}")).unwrap();

    let req = http::Request::builder()
        .method("POST")
        .uri("/ask")
        .body(ResetBody.boxed())
        .unwrap();
    let response = run(&modifier, req).await;

    assert!(slot.lock().unwrap().is_none());
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(text(&response).starts_with("Request masking error: failed to read request body"));
}

#[tokio::test]
async fn test_case_functions_on_absent_values_leave_no_placeholder() {
    let config = ModifierConfig {
        request: Some(r#"{"who": "[[ upper .request.api.body.user ]]"}"#.to_string()),
        headers: HashMap::from([
            ("X-Up".to_string(), "[[ upper .request.headers.absent ]]".to_string()),
            ("X-Low".to_string(), "id-[[ lower .request.headers.absent ]]".to_string()),
        ]),
        ..Default::default()
    };
    let slot = Slot::default();
    let modifier = Modifier::new(&config, "case", json_upstream(slot.clone(), "{}")).unwrap();

    run(&modifier, post("/", "{}")).await;

    let seen = slot.lock().unwrap().take().unwrap();
    assert!(seen.headers.get("x-up").is_none());
    assert_eq!(seen.headers.get("x-low").unwrap(), "id-");
    assert_eq!(seen.body.as_ref(), br#"{"who": ""}"#);
}
