//! NDJSON streaming client against a scripted local server.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use pretty_assertions::assert_eq;
use proposal_stream_client::{
    AuthError, Authenticator, ChannelNotifier, ClientConfig, StreamCallbacks, StreamClient,
    StreamError, StreamRequest,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Scripted server
// ============================================================================

struct Reply {
    status: StatusCode,
    chunks: Vec<Vec<u8>>,
    /// Keep the body open after the chunks.
    hang: bool,
}

impl Reply {
    fn ok(chunks: &[&[u8]]) -> Self {
        Self {
            status: StatusCode::OK,
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            hang: false,
        }
    }

    fn lines(lines: &[&str]) -> Self {
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        Self::ok(&[body.as_bytes()])
    }

    fn status(status: StatusCode) -> Self {
        Self {
            status,
            chunks: Vec::new(),
            hang: false,
        }
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    authorization: Option<String>,
    body: String,
}

#[derive(Clone, Default)]
struct Script {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Script {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            seen: Arc::default(),
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn scripted(
    State(script): State<Script>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    script.seen.lock().unwrap().push(Seen {
        method,
        path: uri.path().to_string(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let reply = script
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::status(StatusCode::GONE));

    let chunks = stream::iter(
        reply
            .chunks
            .into_iter()
            .map(|c| Ok::<_, Infallible>(Bytes::from(c))),
    );
    let body = if reply.hang {
        Body::from_stream(chunks.chain(stream::pending()))
    } else {
        Body::from_stream(chunks)
    };

    axum::http::Response::builder()
        .status(reply.status)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .unwrap()
}

async fn start_test_server(script: Script) -> std::net::SocketAddr {
    let app = Router::new().fallback(scripted).with_state(script);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ============================================================================
// Stub authenticator
// ============================================================================

struct StubAuth {
    token: Option<String>,
    refreshed: Option<String>,
    refreshes: AtomicUsize,
}

impl StubAuth {
    fn with_token(token: &str, refreshed: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: Some(token.to_string()),
            refreshed: refreshed.map(str::to_string),
            refreshes: AtomicUsize::new(0),
        })
    }

    fn without_token(refreshed: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: None,
            refreshed: refreshed.map(str::to_string),
            refreshes: AtomicUsize::new(0),
        })
    }

    fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for StubAuth {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refreshed
            .clone()
            .ok_or(AuthError::Rejected { status: 401 })
    }
}

struct Harness {
    client: StreamClient,
    script: Script,
    auth: Arc<StubAuth>,
    toasts: tokio::sync::mpsc::UnboundedReceiver<proposal_stream_client::Notice>,
}

async fn harness(replies: Vec<Reply>, auth: Arc<StubAuth>) -> Harness {
    harness_with(replies, auth, |_| {}).await
}

async fn harness_with(
    replies: Vec<Reply>,
    auth: Arc<StubAuth>,
    tweak: impl FnOnce(&mut ClientConfig),
) -> Harness {
    let script = Script::new(replies);
    let addr = start_test_server(script.clone()).await;
    let mut config = ClientConfig {
        api_base_url: format!("http://{addr}/api"),
        ..Default::default()
    };
    tweak(&mut config);
    let (notifier, toasts) = ChannelNotifier::new();
    let client = StreamClient::new(config, auth.clone(), Arc::new(notifier)).unwrap();
    Harness {
        client,
        script,
        auth,
        toasts,
    }
}

fn error_counter() -> (Arc<AtomicUsize>, StreamCallbacks) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let callbacks = StreamCallbacks::new().on_error(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    (count, callbacks)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_processing_then_completed_resolves_with_payload() {
    let mut h = harness(
        vec![Reply::lines(&[
            r#"{"status":"processing","message":"Reading RFP"}"#,
            r#"{"status":"processing","message":"Drafting"}"#,
            r#"{"status":"completed","data":{"x":1}}"#,
        ])],
        StubAuth::with_token("t-1", None),
    )
    .await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let p = progress.clone();
    let completed = Arc::new(Mutex::new(None));
    let c = completed.clone();
    let callbacks = StreamCallbacks::new()
        .on_processing(move |m| p.lock().unwrap().push(m.to_string()))
        .on_completed(move |v| *c.lock().unwrap() = Some(v.clone()));

    let result = h
        .client
        .stream(
            StreamRequest::post("proposals/42/generate", json!({"section": "intro"})),
            callbacks,
        )
        .await
        .unwrap();

    assert_eq!(result, json!({"x": 1}));
    assert_eq!(*progress.lock().unwrap(), vec!["Reading RFP", "Drafting"]);
    assert_eq!(*completed.lock().unwrap(), Some(json!({"x": 1})));

    let seen = h.script.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].path, "/api/proposals/42/generate");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer t-1"));
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body, json!({"section": "intro"}));
    assert!(h.toasts.try_recv().is_err());
}

#[tokio::test]
async fn test_stream_without_completion_fails_once_everywhere() {
    let mut h = harness(
        vec![Reply::lines(&[r#"{"status":"processing","message":"Working"}"#])],
        StubAuth::with_token("t-1", None),
    )
    .await;
    let (errors, callbacks) = error_counter();

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), callbacks)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Stream ended without a completion message.");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.toasts.try_recv().unwrap().message,
        "Stream ended without a completion message."
    );
    assert!(h.toasts.try_recv().is_err());
}

#[tokio::test]
async fn test_forbidden_then_ok_refreshes_and_retries_once() {
    let h = harness(
        vec![
            Reply::status(StatusCode::FORBIDDEN),
            Reply::lines(&[r#"{"status":"completed","data":"done"}"#]),
        ],
        StubAuth::with_token("stale", Some("fresh")),
    )
    .await;

    let result = h
        .client
        .stream(StreamRequest::post("x", json!({"a": 1})), StreamCallbacks::new())
        .await
        .unwrap();

    assert_eq!(result, json!("done"));
    assert_eq!(h.auth.refresh_count(), 1);
    let seen = h.script.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer stale"));
    assert_eq!(seen[1].authorization.as_deref(), Some("Bearer fresh"));
    assert_eq!(seen[0].body, seen[1].body);
}

#[tokio::test]
async fn test_second_forbidden_is_terminal() {
    let mut h = harness(
        vec![
            Reply::status(StatusCode::FORBIDDEN),
            Reply::status(StatusCode::FORBIDDEN),
            Reply::lines(&[r#"{"status":"completed","data":1}"#]),
        ],
        StubAuth::with_token("stale", Some("fresh")),
    )
    .await;
    let (errors, callbacks) = error_counter();

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), callbacks)
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::RefreshFailed));
    assert_eq!(err.to_string(), "Failed to refresh session.");
    assert_eq!(h.script.seen().len(), 2);
    assert_eq!(h.auth.refresh_count(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.toasts.try_recv().unwrap().message, "Failed to refresh session.");
}

#[tokio::test]
async fn test_refresh_failure_after_forbidden_is_refresh_failed() {
    let h = harness(
        vec![Reply::status(StatusCode::FORBIDDEN)],
        StubAuth::with_token("stale", None),
    )
    .await;

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::RefreshFailed));
    assert_eq!(h.script.seen().len(), 1);
}

#[tokio::test]
async fn test_missing_token_with_failed_refresh_sends_nothing() {
    let mut h = harness(vec![], StubAuth::without_token(None)).await;

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::SessionExpired));
    assert_eq!(err.to_string(), "Session expired. Please log in again.");
    assert!(h.script.seen().is_empty());
    assert_eq!(
        h.toasts.try_recv().unwrap().message,
        "Session expired. Please log in again."
    );
}

#[tokio::test]
async fn test_missing_token_is_refreshed_before_first_request() {
    let h = harness(
        vec![Reply::lines(&[r#"{"status":"completed","data":true}"#])],
        StubAuth::without_token(Some("fresh")),
    )
    .await;

    let result = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap();

    assert_eq!(result, json!(true));
    assert_eq!(h.script.seen()[0].authorization.as_deref(), Some("Bearer fresh"));
}

#[tokio::test]
async fn test_non_success_status_is_reported_with_reason() {
    let h = harness(
        vec![Reply::status(StatusCode::INTERNAL_SERVER_ERROR)],
        StubAuth::with_token("t", None),
    )
    .await;

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "HTTP error 500: Internal Server Error");
    assert_eq!(h.auth.refresh_count(), 0);
}

#[tokio::test]
async fn test_error_line_aborts_stream() {
    let h = harness(
        vec![Reply::lines(&[
            r#"{"status":"processing","message":"Step 1"}"#,
            r#"{"status":"error","message":"Pricing volume not found"}"#,
            r#"{"status":"completed","data":{"never":"seen"}}"#,
        ])],
        StubAuth::with_token("t", None),
    )
    .await;

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    let callbacks = StreamCallbacks::new().on_completed(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), callbacks)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Pricing volume not found");
    assert_eq!(completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_and_unknown_lines_are_skipped() {
    let h = harness(
        vec![Reply::lines(&[
            "{not json",
            "",
            r#"{"status":"queued"}"#,
            r#"{"status":"completed","data":[1,2]}"#,
        ])],
        StubAuth::with_token("t", None),
    )
    .await;

    let result = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap();
    assert_eq!(result, json!([1, 2]));
}

#[tokio::test]
async fn test_lines_and_characters_split_across_chunks() {
    let body = "{\"status\":\"processing\",\"message\":\"Résumé ✓\"}\n{\"status\":\"completed\",\"data\":\"ok ✓\"}\n";
    let bytes = body.as_bytes();
    // Cut inside the multi-byte "é" and again inside the second line.
    let first_cut = body.find('é').unwrap() + 1;
    let second_cut = body.find("completed").unwrap();
    let h = harness(
        vec![Reply::ok(&[
            &bytes[..first_cut],
            &bytes[first_cut..second_cut],
            &bytes[second_cut..],
        ])],
        StubAuth::with_token("t", None),
    )
    .await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let p = progress.clone();
    let raw = Arc::new(Mutex::new(String::new()));
    let r = raw.clone();
    let callbacks = StreamCallbacks::new()
        .on_processing(move |m| p.lock().unwrap().push(m.to_string()))
        .on_chunk(move |text| r.lock().unwrap().push_str(text));

    let result = h
        .client
        .stream(StreamRequest::post("x", json!({})), callbacks)
        .await
        .unwrap();

    assert_eq!(result, json!("ok ✓"));
    assert_eq!(*progress.lock().unwrap(), vec!["Résumé ✓"]);
    assert_eq!(*raw.lock().unwrap(), body);
}

#[tokio::test]
async fn test_unterminated_final_line_is_discarded() {
    let h = harness(
        vec![Reply::ok(&[br#"{"status":"completed","data":1}"#])],
        StubAuth::with_token("t", None),
    )
    .await;

    let err = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Stream ended without a completion message.");
}

#[tokio::test]
async fn test_batch_stops_after_expected_completions() {
    let h = harness(
        vec![Reply::lines(&[
            r#"{"status":"completed","data":{"section":"a"}}"#,
            r#"{"status":"completed","data":{"section":"b"}}"#,
            r#"{"status":"completed","data":{"section":"c"}}"#,
        ])
        .hanging()],
        StubAuth::with_token("t", None),
    )
    .await;

    let landed = Arc::new(AtomicUsize::new(0));
    let l = landed.clone();
    let callbacks = StreamCallbacks::new().on_completed(move |_| {
        l.fetch_add(1, Ordering::SeqCst);
    });

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        h.client
            .stream_batch(StreamRequest::post("sections/regenerate", json!({})), 2, callbacks),
    )
    .await
    .expect("batch should not wait for the body to end")
    .unwrap();

    assert_eq!(results, vec![json!({"section": "a"}), json!({"section": "b"})]);
    assert_eq!(landed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_result_keeps_first_completion() {
    let h = harness(
        vec![Reply::lines(&[
            r#"{"status":"completed","data":"first"}"#,
            r#"{"status":"completed","data":"second"}"#,
        ])],
        StubAuth::with_token("t", None),
    )
    .await;

    let result = h
        .client
        .stream(StreamRequest::post("x", json!({})), StreamCallbacks::new())
        .await
        .unwrap();
    assert_eq!(result, json!("first"));
}

#[tokio::test]
async fn test_get_sends_no_body() {
    let h = harness(
        vec![Reply::lines(&[r#"{"status":"completed","data":null}"#])],
        StubAuth::with_token("t", None),
    )
    .await;

    let result = h
        .client
        .stream(StreamRequest::get("proposals/42/status"), StreamCallbacks::new())
        .await
        .unwrap();

    assert_eq!(result, Value::Null);
    let seen = h.script.seen();
    assert_eq!(seen[0].method, Method::GET);
    assert!(seen[0].body.is_empty());
}

#[tokio::test]
async fn test_cancellation_is_silent() {
    let mut h = harness(
        vec![Reply::lines(&[r#"{"status":"processing","message":"Thinking"}"#]).hanging()],
        StubAuth::with_token("t", None),
    )
    .await;
    let (errors, callbacks) = error_counter();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.client.stream(
            StreamRequest::post("x", json!({})).with_cancellation(token),
            callbacks,
        ),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, StreamError::Cancelled));
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(h.toasts.try_recv().is_err());
}

#[tokio::test]
async fn test_line_without_newline_over_cap_fails_stream() {
    let long = format!(r#"{{"status":"processing","message":"{}""#, "x".repeat(200));
    let mut h = harness_with(
        vec![Reply::ok(&[long.as_bytes()]).hanging()],
        StubAuth::with_token("t", None),
        |config| config.max_line_bytes = 64,
    )
    .await;
    let (errors, callbacks) = error_counter();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.client.stream(StreamRequest::post("x", json!({})), callbacks),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert_eq!(err.to_string(), "Stream line exceeded 64 bytes without a newline.");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.toasts.try_recv().unwrap().message,
        "Stream line exceeded 64 bytes without a newline."
    );
}
