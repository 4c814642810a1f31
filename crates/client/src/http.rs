// crates/client/src/http.rs
//! One authenticated request whose response body is an NDJSON stream.
//!
//! The request resolves with the `completed` payload. A 403 triggers exactly
//! one token refresh and one retry; a second 403 is terminal. Every terminal
//! failure is routed three ways: a toast through the [`Notifier`], the
//! caller's `on_error` callback, and the returned `Err`.

use std::sync::Arc;

use proposal_stream_core::{
    classify_line, CompletionPolicy, CompletionTracker, LineDecoder, LineEvent, ProtocolError,
    Recorded,
};
use reqwest::{header, Method, Response, StatusCode, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::notify::Notifier;

type TextFn = Box<dyn FnMut(&str) + Send>;
type ValueFn = Box<dyn FnMut(&Value) + Send>;
type ErrorFn = Box<dyn FnMut(&StreamError) + Send>;

/// Optional callbacks for one stream. Owned by the call, so none of them can
/// fire after it settles.
#[derive(Default)]
pub struct StreamCallbacks {
    on_processing: Option<TextFn>,
    on_completed: Option<ValueFn>,
    on_error: Option<ErrorFn>,
    on_chunk: Option<TextFn>,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress text from `processing` lines.
    pub fn on_processing(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_processing = Some(Box::new(f));
        self
    }

    pub fn on_completed(mut self, f: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_completed = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&StreamError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Raw decoded text of every body chunk, before line splitting.
    pub fn on_chunk(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    fn processing(&mut self, message: &str) {
        if let Some(f) = self.on_processing.as_mut() {
            f(message);
        }
    }

    fn completed(&mut self, data: &Value) {
        if let Some(f) = self.on_completed.as_mut() {
            f(data);
        }
    }

    fn error(&mut self, err: &StreamError) {
        if let Some(f) = self.on_error.as_mut() {
            f(err);
        }
    }

    fn chunk(&mut self, text: &str) {
        if let Some(f) = self.on_chunk.as_mut() {
            f(text);
        }
    }
}

impl std::fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_processing", &self.on_processing.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_chunk", &self.on_chunk.is_some())
            .finish()
    }
}

/// What to request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    endpoint: String,
    method: Method,
    payload: Option<Value>,
    cancel: Option<CancellationToken>,
}

impl StreamRequest {
    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::POST,
            payload: Some(payload),
            cancel: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::GET,
            payload: None,
            cancel: None,
        }
    }

    /// Any other verb. The payload is ignored for GET.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Abort the request or body read when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// NDJSON-over-HTTP streaming client.
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    auth: Arc<dyn Authenticator>,
    notifier: Arc<dyn Notifier>,
}

impl StreamClient {
    pub fn new(
        config: ClientConfig,
        auth: Arc<dyn Authenticator>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(StreamError::Request)?;
        Ok(Self::with_http_client(http, config, auth, notifier))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        config: ClientConfig,
        auth: Arc<dyn Authenticator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            http,
            config: Arc::new(config),
            auth,
            notifier,
        }
    }

    /// Run a single-result stream and resolve with its `completed` payload.
    pub async fn stream(
        &self,
        request: StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Value, StreamError> {
        let results = self.run(request, CompletionPolicy::Single, callbacks).await?;
        results
            .into_iter()
            .next()
            .ok_or(StreamError::Protocol(ProtocolError::NoCompletion))
    }

    /// Run a multi-item stream. Reading stops once `expected` completions
    /// arrived; each one is also passed to `on_completed` as it lands.
    pub async fn stream_batch(
        &self,
        request: StreamRequest,
        expected: usize,
        callbacks: StreamCallbacks,
    ) -> Result<Vec<Value>, StreamError> {
        self.run(request, CompletionPolicy::Batch { expected }, callbacks)
            .await
    }

    async fn run(
        &self,
        request: StreamRequest,
        policy: CompletionPolicy,
        mut callbacks: StreamCallbacks,
    ) -> Result<Vec<Value>, StreamError> {
        let cancel = request.cancel.clone().unwrap_or_default();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.exchange(&request, policy, &mut callbacks) => result,
        };

        match result {
            Ok(results) => Ok(results),
            Err(StreamError::Cancelled) => {
                tracing::info!(endpoint = %request.endpoint, "Stream cancelled by caller");
                Err(StreamError::Cancelled)
            }
            Err(err) => {
                tracing::error!(endpoint = %request.endpoint, error = %err, "Streaming request failed");
                self.notifier.error(&err.to_string());
                callbacks.error(&err);
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        request: &StreamRequest,
        policy: CompletionPolicy,
        callbacks: &mut StreamCallbacks,
    ) -> Result<Vec<Value>, StreamError> {
        let url = self.config.endpoint_url(&request.endpoint)?;
        let mut response = self.open(&url, request).await?;

        let mut decoder = LineDecoder::with_max_line_len(self.config.max_line_bytes);
        let mut tracker = CompletionTracker::new(policy);

        while let Some(bytes) = response.chunk().await.map_err(StreamError::Body)? {
            let chunk = decoder.feed(&bytes)?;
            if !chunk.text.is_empty() {
                callbacks.chunk(&chunk.text);
            }

            for line in chunk.lines() {
                match classify_line(line) {
                    LineEvent::Processing(message) => callbacks.processing(&message),
                    LineEvent::Completed(data) => {
                        if tracker.record(data) == Recorded::Accepted {
                            if let Some(data) = tracker.last() {
                                callbacks.completed(data);
                            }
                        }
                    }
                    LineEvent::Failed(message) => {
                        return Err(ProtocolError::server(message).into());
                    }
                    LineEvent::Skipped => {}
                }

                if tracker.is_satisfied() {
                    tracing::debug!(
                        endpoint = %request.endpoint,
                        received = tracker.received(),
                        "All expected completions received, closing stream"
                    );
                    return Ok(tracker.finish()?);
                }
            }
        }

        let leftover = decoder.finish();
        if !leftover.trim().is_empty() {
            tracing::warn!(
                endpoint = %request.endpoint,
                bytes = leftover.len(),
                "Discarding unterminated final line"
            );
        }

        Ok(tracker.finish()?)
    }

    /// Authenticate and send, with the single refresh-and-retry on 403.
    async fn open(&self, url: &Url, request: &StreamRequest) -> Result<Response, StreamError> {
        let token = match self.auth.access_token().await {
            Some(token) => token,
            None => {
                tracing::debug!("No stored access token, refreshing before request");
                self.auth.refresh().await.map_err(|e| {
                    tracing::warn!(error = %e, "Token refresh failed");
                    StreamError::SessionExpired
                })?
            }
        };

        let mut response = self.send(url, request, &token).await?;

        if response.status() == StatusCode::FORBIDDEN {
            tracing::info!(endpoint = %request.endpoint, "Got 403, refreshing session and retrying once");
            let token = self.auth.refresh().await.map_err(|e| {
                tracing::warn!(error = %e, "Token refresh after 403 failed");
                StreamError::RefreshFailed
            })?;

            response = self.send(url, request, &token).await?;
            if response.status() == StatusCode::FORBIDDEN {
                return Err(StreamError::RefreshFailed);
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        Ok(response)
    }

    async fn send(
        &self,
        url: &Url,
        request: &StreamRequest,
        token: &str,
    ) -> Result<Response, StreamError> {
        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json");

        if request.method != Method::GET {
            if let Some(payload) = &request.payload {
                builder = builder.json(payload);
            }
        }

        builder.send().await.map_err(StreamError::Request)
    }
}
