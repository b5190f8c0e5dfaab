//! Dispatcher: the request/response orchestrator.
//!
//! Owns the form selections, the staged file, the single in-flight request slot and
//! the lifecycle state. Callers observe state through [`Dispatcher::view`] and
//! [`Dispatcher::subscribe`]; only the dispatcher mutates it.
//!
//! ```text
//! Idle ──submit()──> Building ──> InFlight ──> Succeeded | Failed | TimedOut | Cancelled ──> Idle
//! ```
//!
//! At most one request is in flight. Submitting again cancels the current request
//! before the new one starts, and an outcome is applied only while its correlation
//! id still owns the slot, so a superseded request can never mutate state.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};

use crate::builder;
use crate::domain::envelope::CorrelationId;
use crate::domain::form::{FormState, FormatType, OrderType, ResponseType, TransactionType};
use crate::domain::request::{
    Building, CancellationReason, Countdown, ErrorNotice, Request, RequestData,
    RequestLifecycleState, RequestOutcome, Transport,
};
use crate::error::{DispatchError, Result};
use crate::http::HttpClient;
use crate::intake::StagedFile;
use crate::output::ResultStore;
use crate::session::SessionStore;

/// Configuration for the dispatcher and the components around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Base URL of the processing backend
    pub endpoint: String,

    /// Path requests are posted to
    pub path: String,

    /// Transport-level timeout for each request in milliseconds
    pub request_timeout_ms: u64,

    /// Client countdown bound in seconds
    pub countdown_secs: u64,

    /// Countdown tick period in milliseconds
    pub countdown_tick_ms: u64,

    /// Inactivity bound before a forced logout, in seconds
    pub idle_timeout_secs: u64,

    /// How often the idle monitor checks the clock, in milliseconds
    pub idle_check_interval_ms: u64,

    /// Gap between consecutive downloads of a batch download, in milliseconds
    pub download_stagger_ms: u64,

    /// Delay after the last batch download before the results are cleared, in milliseconds
    pub download_clear_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            path: "/process".to_string(),
            request_timeout_ms: 60_000,
            countdown_secs: 60,
            countdown_tick_ms: 1000,
            idle_timeout_secs: 300,
            idle_check_interval_ms: 1000,
            download_stagger_ms: 500,
            download_clear_delay_ms: 100,
        }
    }
}

impl DispatchConfig {
    pub fn countdown(&self) -> Countdown {
        Countdown {
            secs: self.countdown_secs,
            tick: Duration::from_millis(self.countdown_tick_ms),
        }
    }
}

/// Capacity of the lifecycle broadcast; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Snapshot of everything a front-end renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherView {
    pub state: RequestLifecycleState,
    pub form: FormState,
    /// Seconds left on the countdown while a request is in flight
    pub countdown_remaining: Option<u64>,
    /// Correlation id of the in-flight request
    pub correlation_id: Option<CorrelationId>,
    pub error: Option<ErrorNotice>,
    pub result_count: usize,
    pub staged_file: Option<String>,
}

/// Handle to a submitted request.
#[derive(Debug)]
pub struct Submission {
    correlation_id: CorrelationId,
    outcome_rx: oneshot::Receiver<RequestOutcome>,
}

impl Submission {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the request's outcome.
    ///
    /// Resolves exactly once. A superseded request resolves as cancelled.
    pub async fn outcome(self) -> Result<RequestOutcome> {
        self.outcome_rx.await.map_err(|_| {
            DispatchError::Other(anyhow::anyhow!(
                "Request task for {} ended without an outcome",
                self.correlation_id
            ))
        })
    }
}

/// The request currently owning the in-flight slot.
struct InFlightSlot {
    correlation_id: CorrelationId,
    cancel_tx: oneshot::Sender<CancellationReason>,
}

impl InFlightSlot {
    fn cancel(self, reason: CancellationReason) {
        // Task may already be settling; its outcome is then discarded as stale
        let _ = self.cancel_tx.send(reason);
    }
}

struct Inner {
    form: FormState,
    staged: Option<StagedFile>,
    state: RequestLifecycleState,
    in_flight: Option<InFlightSlot>,
    countdown_remaining: Option<u64>,
    error: Option<ErrorNotice>,
}

/// State shared between the dispatcher and its request tasks.
struct Shared {
    inner: Mutex<Inner>,
    results: ResultStore,
    events: broadcast::Sender<RequestLifecycleState>,
}

impl Shared {
    fn transition(&self, inner: &mut Inner, state: RequestLifecycleState) {
        tracing::debug!(from = ?inner.state, to = ?state, "Lifecycle transition");
        inner.state = state.clone();
        // No subscribers is fine
        let _ = self.events.send(state);
    }

    fn owns_slot(inner: &Inner, correlation_id: CorrelationId) -> bool {
        inner
            .in_flight
            .as_ref()
            .is_some_and(|slot| slot.correlation_id == correlation_id)
    }

    fn record_tick(&self, correlation_id: CorrelationId, remaining: u64) {
        let mut inner = self.inner.lock();
        if Self::owns_slot(&inner, correlation_id) {
            tracing::trace!(%correlation_id, remaining, "Countdown tick");
            inner.countdown_remaining = Some(remaining);
        }
    }

    /// Cancel whatever is in flight and return to Idle through Cancelled.
    fn cancel_in_flight(&self, inner: &mut Inner, reason: CancellationReason) -> bool {
        let Some(slot) = inner.in_flight.take() else {
            return false;
        };
        tracing::info!(correlation_id = %slot.correlation_id, ?reason, "Cancelling in-flight request");
        slot.cancel(reason);
        inner.countdown_remaining = None;
        counter!("edi_dispatch_requests_total", "outcome" => "cancelled").increment(1);
        self.transition(inner, RequestLifecycleState::Cancelled);
        self.transition(inner, RequestLifecycleState::Idle);
        true
    }

    /// Apply an outcome if its request still owns the slot.
    fn settle(&self, outcome: &RequestOutcome) {
        let correlation_id = outcome.correlation_id();
        let mut inner = self.inner.lock();
        if !Self::owns_slot(&inner, correlation_id) {
            tracing::debug!(%correlation_id, outcome = outcome.variant(), "Discarding stale outcome");
            return;
        }
        inner.in_flight = None;
        inner.countdown_remaining = None;

        match outcome {
            RequestOutcome::Succeeded(request) => {
                self.results.replace(request.state.results.clone());
                // A processed file is consumed
                inner.staged = None;
            }
            RequestOutcome::Failed(_) | RequestOutcome::TimedOut(_) => {
                inner.error = outcome.error_notice();
            }
            RequestOutcome::Cancelled(_) => {}
        }

        counter!("edi_dispatch_requests_total", "outcome" => outcome.variant()).increment(1);
        self.transition(&mut inner, outcome.lifecycle_state());
        self.transition(&mut inner, RequestLifecycleState::Idle);
    }
}

/// Request/response orchestrator.
pub struct Dispatcher<H, S>
where
    H: HttpClient,
    S: SessionStore,
{
    http_client: H,
    session: Arc<S>,
    config: DispatchConfig,
    shared: Arc<Shared>,
}

impl<H, S> Dispatcher<H, S>
where
    H: HttpClient + 'static,
    S: SessionStore + 'static,
{
    pub fn new(http_client: H, session: Arc<S>, config: DispatchConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            http_client,
            session,
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    form: FormState::default(),
                    staged: None,
                    state: RequestLifecycleState::Idle,
                    in_flight: None,
                    countdown_remaining: None,
                    error: None,
                }),
                results: ResultStore::new(),
                events,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Results held for download; shared with an [`crate::OutputReconciler`].
    pub fn results(&self) -> ResultStore {
        self.shared.results.clone()
    }

    /// Subscribe to every lifecycle transition, including the transient outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<RequestLifecycleState> {
        self.shared.events.subscribe()
    }

    pub fn view(&self) -> DispatcherView {
        let inner = self.shared.inner.lock();
        DispatcherView {
            state: inner.state.clone(),
            form: inner.form,
            countdown_remaining: inner.countdown_remaining,
            correlation_id: inner.in_flight.as_ref().map(|slot| slot.correlation_id),
            error: inner.error.clone(),
            result_count: self.shared.results.len(),
            staged_file: inner.staged.as_ref().map(|f| f.name().to_string()),
        }
    }

    pub fn state(&self) -> RequestLifecycleState {
        self.shared.inner.lock().state.clone()
    }

    pub fn form(&self) -> FormState {
        self.shared.inner.lock().form
    }

    pub fn error(&self) -> Option<ErrorNotice> {
        self.shared.inner.lock().error.clone()
    }

    // ------------------------------------------------------------------------
    // Form selections
    // ------------------------------------------------------------------------

    /// Change the transaction type, discarding the staged file if the new type needs none.
    pub fn set_transaction_type(&self, transaction_type: TransactionType) {
        let mut inner = self.shared.inner.lock();
        let change = inner.form.set_transaction_type(transaction_type);
        if change.discard_file && inner.staged.take().is_some() {
            tracing::debug!(%transaction_type, "Discarded staged file");
        }
    }

    /// Change the response type; returns false if it is illegal for the transaction type.
    pub fn set_response_type(&self, response_type: ResponseType) -> bool {
        self.shared.inner.lock().form.set_response_type(response_type)
    }

    pub fn set_order_type(&self, order_type: OrderType) {
        self.shared.inner.lock().form.set_order_type(order_type);
    }

    pub fn set_format(&self, format: FormatType) {
        self.shared.inner.lock().form.set_format(format);
    }

    // ------------------------------------------------------------------------
    // File intake
    // ------------------------------------------------------------------------

    /// Stage a file, starting a fresh unit of work: held results and errors are cleared.
    pub fn stage_file(&self, file: StagedFile) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.form.is_file_input_disabled() {
            return Err(DispatchError::Validation(format!(
                "File input is disabled for {} requests",
                inner.form.transaction_type()
            )));
        }
        tracing::info!(file = %file.name(), size = file.size(), "File staged");
        inner.staged = Some(file);
        inner.error = None;
        self.shared.results.clear();
        Ok(())
    }

    /// Remove the staged file and any output; form selections are untouched.
    pub fn remove_file(&self) {
        let mut inner = self.shared.inner.lock();
        inner.staged = None;
        inner.error = None;
        self.shared.results.clear();
    }

    // ------------------------------------------------------------------------
    // Derived flags
    // ------------------------------------------------------------------------

    pub fn is_file_input_disabled(&self) -> bool {
        self.shared.inner.lock().form.is_file_input_disabled()
    }

    /// Whether the process action is unavailable.
    pub fn is_process_disabled(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.in_flight.is_some() || (inner.form.requires_file() && inner.staged.is_none())
    }

    pub fn is_cancel_enabled(&self) -> bool {
        self.shared.inner.lock().in_flight.is_some()
    }

    // ------------------------------------------------------------------------
    // Request lifecycle
    // ------------------------------------------------------------------------

    /// Submit the current selections.
    ///
    /// Validation failures are returned before anything is sent. A request already
    /// in flight is cancelled first. Must be called from within a tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn submit(&self) -> Result<Submission> {
        if !self.session.is_authenticated() {
            return Err(DispatchError::Unauthenticated);
        }
        let bearer_token = self.session.bearer_token();

        let mut inner = self.shared.inner.lock();
        if inner.form.requires_file() && inner.staged.is_none() {
            return Err(DispatchError::Validation(format!(
                "An input file is required for {} {} requests",
                inner.form.transaction_type(),
                inner.form.response_type()
            )));
        }

        self.shared
            .cancel_in_flight(&mut inner, CancellationReason::Superseded);

        self.shared
            .transition(&mut inner, RequestLifecycleState::Building);
        inner.error = None;
        self.shared.results.clear();

        let correlation_id = builder::new_correlation_id();
        let input_file = inner
            .staged
            .as_ref()
            .filter(|_| inner.form.requires_file())
            .map(StagedFile::to_base64);
        let envelope = builder::build(&inner.form, correlation_id, input_file);
        let request = Request {
            data: RequestData::new(envelope),
            state: Building {},
        };

        let transport = Transport {
            endpoint: self.config.endpoint.clone(),
            path: self.config.path.clone(),
            timeout_ms: self.config.request_timeout_ms,
            bearer_token,
        };
        let in_flight = match request.dispatch(self.http_client.clone(), transport) {
            Ok(in_flight) => in_flight,
            Err(e) => {
                tracing::error!(%correlation_id, error = %e, "Failed to dispatch request");
                self.shared
                    .transition(&mut inner, RequestLifecycleState::Idle);
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let countdown = self.config.countdown();
        let shared = self.shared.clone();

        // The slot is stored before the lock is released, so the task cannot settle
        // against an empty slot
        tokio::spawn(async move {
            let tick_shared = shared.clone();
            let cancellation = async move {
                // Sender dropped without a reason means the dispatcher went away
                cancel_rx.await.unwrap_or(CancellationReason::Teardown)
            };
            let outcome = in_flight
                .complete(
                    countdown,
                    move |remaining| tick_shared.record_tick(correlation_id, remaining),
                    cancellation,
                )
                .await;
            shared.settle(&outcome);
            let _ = outcome_tx.send(outcome);
        });

        inner.in_flight = Some(InFlightSlot {
            correlation_id,
            cancel_tx,
        });
        inner.countdown_remaining = Some(countdown.secs);
        self.shared
            .transition(&mut inner, RequestLifecycleState::InFlight);
        tracing::info!(%correlation_id, countdown_secs = countdown.secs, "Request in flight");

        Ok(Submission {
            correlation_id,
            outcome_rx,
        })
    }

    /// Cancel the in-flight request and return silently to Idle.
    ///
    /// Form selections and the staged file are preserved.
    pub fn cancel(&self) -> Result<()> {
        self.cancel_with(CancellationReason::User)
            .then_some(())
            .ok_or(DispatchError::NoRequestInFlight)
    }

    /// Cancel the in-flight request, if any, for `reason`.
    pub fn cancel_with(&self, reason: CancellationReason) -> bool {
        let mut inner = self.shared.inner.lock();
        self.shared.cancel_in_flight(&mut inner, reason)
    }

    /// Release the in-flight request and its timers.
    ///
    /// The request settles as cancelled, so its [`Submission`] still resolves.
    pub fn shutdown(&self) {
        self.cancel_with(CancellationReason::Teardown);
    }
}

impl<H, S> Drop for Dispatcher<H, S>
where
    H: HttpClient,
    S: SessionStore,
{
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if let Some(slot) = inner.in_flight.take() {
            // The request task settles as cancelled and releases its network task
            slot.cancel(CancellationReason::Teardown);
        }
    }
}
