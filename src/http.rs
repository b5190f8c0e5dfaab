//! Transport to the processing backend.
//!
//! A submission is one POST of a serialized [`RequestEnvelope`] with the session's
//! bearer token. [`HttpClient`] is the seam the dispatcher sends through:
//! [`ReqwestHttpClient`] talks to a real backend and [`MockHttpClient`] replays
//! queued replies, optionally held open until a test releases them.
//!
//! [`RequestEnvelope`]: crate::domain::envelope::RequestEnvelope

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::envelope::CorrelationId;
use crate::error::{DispatchError, Result};

/// A serialized envelope addressed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Id carried inside `body`, repeated here so transports can log it
    pub correlation_id: CorrelationId,
    /// Backend base URL, without the path
    pub endpoint: String,
    pub method: String,
    /// Appended to `endpoint`, e.g. `/process`
    pub path: String,
    /// Envelope JSON
    pub body: String,
}

/// Status and raw body as the backend sent them; classification happens later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one envelope and returns whatever the backend answered.
///
/// Non-2xx statuses are returned as responses, not errors; only transport
/// failures are errors. A transport that gives up waiting must report
/// [`DispatchError::Timeout`] so the request settles as timed out.
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    async fn execute(
        &self,
        request: &HttpRequest,
        bearer_token: Option<&str>,
        timeout_ms: u64,
    ) -> Result<HttpResponse>;
}

fn transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout
    } else {
        DispatchError::HttpClient(e)
    }
}

/// Backend transport over a shared reqwest connection pool.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, e.g. with extra root certificates or a proxy.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip_all, fields(correlation_id = %request.correlation_id, path = %request.path))]
    async fn execute(
        &self,
        request: &HttpRequest,
        bearer_token: Option<&str>,
        timeout_ms: u64,
    ) -> Result<HttpResponse> {
        let method = request
            .method
            .parse::<reqwest::Method>()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP method '{}': {}", request.method, e))?;
        let url = format!("{}{}", request.endpoint, request.path);
        tracing::debug!(%url, timeout_ms, "Posting envelope");

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        match bearer_token.filter(|t| !t.is_empty()) {
            Some(token) => builder = builder.bearer_auth(token),
            None => tracing::warn!("Sending envelope without a bearer token"),
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(%url, error = %e, "Backend unreachable");
            transport_error(e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;

        tracing::info!(status, body_len = body.len(), "Backend answered");
        Ok(HttpResponse { status, body })
    }
}

/// A queued reply, optionally held until its release sender fires or drops.
struct QueuedReply {
    reply: Result<HttpResponse>,
    release: Option<oneshot::Receiver<()>>,
}

/// What [`MockHttpClient`] saw for one envelope.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub correlation_id: CorrelationId,
    pub method: String,
    pub endpoint: String,
    pub path: String,
    pub body: String,
    pub bearer_token: Option<String>,
    pub timeout_ms: u64,
}

/// In-memory backend for tests.
///
/// Replies are queued per `"{method} {path}"` and handed out in order. A held
/// reply keeps its request open, which is how tests model a slow backend; an
/// envelope that is aborted while held drops out of [`in_flight_count`].
///
/// ```ignore
/// let backend = MockHttpClient::new();
/// let release = backend.add_response_with_trigger(
///     "POST /process",
///     Ok(HttpResponse { status: 200, body: r#"{"response":[]}"#.to_string() }),
/// );
/// // ... submit, observe the countdown ...
/// release.send(()).unwrap();
/// ```
///
/// [`in_flight_count`]: MockHttpClient::in_flight_count
#[derive(Clone, Default)]
pub struct MockHttpClient {
    replies: Arc<Mutex<HashMap<String, VecDeque<QueuedReply>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, key: &str, reply: QueuedReply) {
        self.replies
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a reply returned as soon as an envelope arrives on `key`.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.enqueue(
            key,
            QueuedReply {
                reply: response,
                release: None,
            },
        );
    }

    /// Queue a reply that is held until the returned sender fires or is dropped.
    pub fn add_response_with_trigger(
        &self,
        key: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (release_tx, release_rx) = oneshot::channel();
        self.enqueue(
            key,
            QueuedReply {
                reply: response,
                release: Some(release_rx),
            },
        );
        release_tx
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Envelopes currently waiting on a reply.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Counts an envelope as in flight until dropped, abort included.
struct InFlightMark(Arc<AtomicUsize>);

impl InFlightMark {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlightMark {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(
        &self,
        request: &HttpRequest,
        bearer_token: Option<&str>,
        timeout_ms: u64,
    ) -> Result<HttpResponse> {
        let _mark = InFlightMark::new(&self.in_flight);
        self.calls.lock().push(MockCall {
            correlation_id: request.correlation_id,
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            path: request.path.clone(),
            body: request.body.clone(),
            bearer_token: bearer_token.map(str::to_string),
            timeout_ms,
        });

        let key = format!("{} {}", request.method, request.path);
        let queued = self
            .replies
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let Some(QueuedReply { reply, release }) = queued else {
            return Err(DispatchError::Other(anyhow::anyhow!(
                "MockHttpClient has no reply queued for {}",
                key
            )));
        };

        if let Some(release) = release {
            // Sender dropped counts as released
            let _ = release.await;
        }
        reply
    }
}
