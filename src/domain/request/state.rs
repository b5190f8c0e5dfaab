//! Request lifecycle types.
//!
//! Each submitted request progresses through distinct states encoded with the
//! typestate pattern, so only operations valid for the current state compile.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::domain::envelope::{CorrelationId, ProcessingResult, RequestEnvelope};
use crate::error::Result;
use crate::http::HttpResponse;

/// Marker trait for valid request states.
pub trait RequestState: Send {}

/// A request to the processing backend.
///
/// The generic parameter `T` represents the current state of the request.
#[derive(Debug)]
pub struct Request<T: RequestState> {
    /// The current state of the request.
    pub state: T,
    /// The envelope sent to the backend.
    pub data: RequestData,
}

/// Immutable data of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestData {
    pub envelope: RequestEnvelope,
    pub created_at: DateTime<Utc>,
}

impl RequestData {
    pub fn new(envelope: RequestEnvelope) -> Self {
        Self {
            envelope,
            created_at: Utc::now(),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.envelope.correlation_id
    }
}

// ============================================================================
// Request States
// ============================================================================

/// Envelope built and validated, not yet sent.
#[derive(Debug, Clone)]
pub struct Building {}

impl RequestState for Building {}

/// Request dispatched, waiting for the backend, the countdown or a cancellation.
#[derive(Debug)]
pub struct InFlight {
    pub dispatched_at: DateTime<Utc>,
    /// Receives the transport result from the spawned network task
    pub result_rx: oneshot::Receiver<Result<HttpResponse>>,
    /// Handle to abort the network task
    pub abort_handle: AbortHandle,
}

impl RequestState for InFlight {}

/// Backend answered with a result collection.
#[derive(Debug, Clone)]
pub struct Succeeded {
    pub results: Vec<ProcessingResult>,
    pub settled_at: DateTime<Utc>,
}

impl RequestState for Succeeded {}

/// Why a request failed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum FailureReason {
    /// Backend returned a non-success status.
    HttpStatus {
        status: u16,
        /// Message extracted from the error body, if any
        message: Option<String>,
    },

    /// Network error or other transport-level failure.
    Transport { error: String },

    /// Backend answered 2xx with a body that is not a result collection.
    InvalidResponse { error: String },

    /// The network task ended without reporting a result.
    TaskTerminated,
}

/// Message shown when nothing better can be derived from the failure.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "An unexpected error occurred while processing the request";

impl FailureReason {
    /// Returns a human-readable error message for this failure reason.
    pub fn to_error_message(&self) -> String {
        let message = match self {
            FailureReason::HttpStatus {
                message: Some(message),
                ..
            } => message.clone(),
            FailureReason::HttpStatus {
                status,
                message: None,
            } => format!("Server returned status {}", status),
            FailureReason::Transport { error } => error.clone(),
            FailureReason::InvalidResponse { .. } => "Invalid response from server".to_string(),
            FailureReason::TaskTerminated => GENERIC_FAILURE_MESSAGE.to_string(),
        };
        if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            message
        }
    }
}

/// Request failed (non-timeout).
#[derive(Debug, Clone)]
pub struct Failed {
    pub reason: FailureReason,
    pub settled_at: DateTime<Utc>,
}

impl RequestState for Failed {}

/// What gave up waiting on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeoutSource {
    /// The client countdown reached zero
    Countdown,
    /// The transport reported a timeout
    Transport,
}

/// Request exceeded its time bound.
#[derive(Debug, Clone)]
pub struct TimedOut {
    pub source: TimeoutSource,
    /// The configured bound, in seconds
    pub bound_secs: u64,
    pub settled_at: DateTime<Utc>,
}

impl RequestState for TimedOut {}

/// Reason for cancelling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancellationReason {
    /// User pressed cancel.
    User,
    /// A newer submission replaced this request.
    Superseded,
    /// The session ended (manual or inactivity logout).
    Logout,
    /// The owning dispatcher was dropped.
    Teardown,
}

/// Request was cancelled; never surfaced as an error.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub reason: CancellationReason,
    pub settled_at: DateTime<Utc>,
}

impl RequestState for Cancelled {}

// ============================================================================
// Outcomes and observable state
// ============================================================================

/// Terminal result of an in-flight request.
#[derive(Debug)]
pub enum RequestOutcome {
    Succeeded(Request<Succeeded>),
    Failed(Request<Failed>),
    TimedOut(Request<TimedOut>),
    Cancelled(Request<Cancelled>),
}

impl RequestOutcome {
    pub fn correlation_id(&self) -> CorrelationId {
        self.data().correlation_id()
    }

    pub fn data(&self) -> &RequestData {
        match self {
            RequestOutcome::Succeeded(r) => &r.data,
            RequestOutcome::Failed(r) => &r.data,
            RequestOutcome::TimedOut(r) => &r.data,
            RequestOutcome::Cancelled(r) => &r.data,
        }
    }

    /// Get the variant name, used as a metrics label.
    pub fn variant(&self) -> &'static str {
        match self {
            RequestOutcome::Succeeded(_) => "succeeded",
            RequestOutcome::Failed(_) => "failed",
            RequestOutcome::TimedOut(_) => "timed_out",
            RequestOutcome::Cancelled(_) => "cancelled",
        }
    }

    /// The lifecycle state this outcome is observed as.
    pub fn lifecycle_state(&self) -> RequestLifecycleState {
        match self {
            RequestOutcome::Succeeded(_) => RequestLifecycleState::Succeeded,
            RequestOutcome::Failed(r) => {
                RequestLifecycleState::Failed(r.state.reason.to_error_message())
            }
            RequestOutcome::TimedOut(_) => RequestLifecycleState::TimedOut,
            RequestOutcome::Cancelled(_) => RequestLifecycleState::Cancelled,
        }
    }

    /// The user-facing error for this outcome, if it is an error.
    pub fn error_notice(&self) -> Option<ErrorNotice> {
        match self {
            RequestOutcome::Failed(r) => Some(ErrorNotice::failure(
                r.state.reason.to_error_message(),
                Some(r.data.correlation_id()),
            )),
            RequestOutcome::TimedOut(r) => Some(ErrorNotice::timeout(
                r.state.bound_secs,
                r.data.correlation_id(),
            )),
            RequestOutcome::Succeeded(_) | RequestOutcome::Cancelled(_) => None,
        }
    }
}

/// Lifecycle of the dispatcher's single request slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason")]
pub enum RequestLifecycleState {
    #[default]
    Idle,
    Building,
    InFlight,
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Kind of a user-facing error; timeouts get their own affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    Timeout,
    Failure,
}

/// Error surfaced to the user after a request failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub kind: NoticeKind,
    pub message: String,
    pub correlation_id: Option<CorrelationId>,
}

impl ErrorNotice {
    pub fn timeout(bound_secs: u64, correlation_id: CorrelationId) -> Self {
        Self {
            kind: NoticeKind::Timeout,
            message: format!(
                "Request timed out after {} seconds. Correlation ID: {}",
                bound_secs, correlation_id
            ),
            correlation_id: Some(correlation_id),
        }
    }

    pub fn failure(message: String, correlation_id: Option<CorrelationId>) -> Self {
        let message = match correlation_id {
            Some(id) => format!("{} (Correlation ID: {})", message, id),
            None => message,
        };
        Self {
            kind: NoticeKind::Failure,
            message,
            correlation_id,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == NoticeKind::Timeout
    }
}
