//! State transitions for backend requests using the typestate pattern.
//!
//! ```text
//! Request<Building> ──dispatch()──> Request<InFlight> ──complete()──> Request<Succeeded>
//!                                                      ──complete()──> Request<Failed>
//!                                                      ──complete()──> Request<TimedOut>
//!                                                      ──complete()──> Request<Cancelled>
//! ```
//!
//! `dispatch()` spawns the network call as its own task and keeps an abort handle.
//! `complete()` races three things: the network result, a countdown that ticks
//! once per period, and an external cancellation future. Whichever settles first
//! decides the outcome, and the network task is aborted on every exit path, so a
//! late response can never be observed.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

use crate::domain::envelope::parse_response;
use crate::error::Result;
use crate::http::{HttpClient, HttpRequest, HttpResponse};

use super::state::{
    Building, CancellationReason, Cancelled, Failed, FailureReason, InFlight, Request,
    RequestOutcome, Succeeded, TimeoutSource, TimedOut,
};

/// Where and how to send a request.
#[derive(Debug, Clone)]
pub struct Transport {
    pub endpoint: String,
    pub path: String,
    pub timeout_ms: u64,
    pub bearer_token: Option<String>,
}

/// Client-side bound on waiting for the backend.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    /// Number of ticks before the request times out
    pub secs: u64,
    /// Tick period, one second outside of tests
    pub tick: Duration,
}

impl Request<Building> {
    /// Serialize the envelope and start the network call.
    pub fn dispatch<H: HttpClient + 'static>(
        self,
        http_client: H,
        transport: Transport,
    ) -> Result<Request<InFlight>> {
        let body = serde_json::to_string(&self.data.envelope)?;
        let http_request = HttpRequest {
            correlation_id: self.data.correlation_id(),
            endpoint: transport.endpoint,
            method: "POST".to_string(),
            path: transport.path,
            body,
        };

        let (tx, rx) = oneshot::channel();
        let bearer_token = transport.bearer_token;
        let timeout_ms = transport.timeout_ms;

        let task_handle = tokio::spawn(async move {
            let result = http_client
                .execute(&http_request, bearer_token.as_deref(), timeout_ms)
                .await;
            let _ = tx.send(result); // Receiver dropped means the request was settled
        });

        tracing::debug!(
            correlation_id = %self.data.correlation_id(),
            timeout_ms,
            "Request dispatched"
        );

        Ok(Request {
            data: self.data,
            state: InFlight {
                dispatched_at: Utc::now(),
                result_rx: rx,
                abort_handle: task_handle.abort_handle(),
            },
        })
    }
}

impl Request<InFlight> {
    /// Wait for the request to settle.
    ///
    /// `on_tick` is called with the remaining seconds after every countdown tick.
    /// `cancellation` resolves when the caller wants the request abandoned.
    pub async fn complete<F, Fut>(
        mut self,
        countdown: Countdown,
        mut on_tick: F,
        cancellation: Fut,
    ) -> RequestOutcome
    where
        F: FnMut(u64),
        Fut: Future<Output = CancellationReason>,
    {
        enum Settled {
            Network(std::result::Result<Result<HttpResponse>, oneshot::error::RecvError>),
            Expired,
            Cancelled(CancellationReason),
        }

        // Abort the network task however we leave, including being dropped mid-await
        let _abort = scopeguard::guard(self.state.abort_handle.clone(), |handle| {
            handle.abort();
        });

        tokio::pin!(cancellation);
        let mut ticker = tokio::time::interval_at(Instant::now() + countdown.tick, countdown.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut remaining = countdown.secs;

        let settled = loop {
            tokio::select! {
                biased;
                reason = &mut cancellation => break Settled::Cancelled(reason),
                result = &mut self.state.result_rx => break Settled::Network(result),
                _ = ticker.tick() => {
                    remaining = remaining.saturating_sub(1);
                    on_tick(remaining);
                    if remaining == 0 {
                        break Settled::Expired;
                    }
                }
            }
        };

        let correlation_id = self.data.correlation_id();
        let settled_at = Utc::now();

        match settled {
            Settled::Cancelled(reason) => {
                tracing::info!(%correlation_id, ?reason, "Request cancelled");
                RequestOutcome::Cancelled(Request {
                    data: self.data,
                    state: Cancelled { reason, settled_at },
                })
            }
            Settled::Expired => {
                tracing::warn!(%correlation_id, bound_secs = countdown.secs, "Countdown expired");
                RequestOutcome::TimedOut(Request {
                    data: self.data,
                    state: TimedOut {
                        source: TimeoutSource::Countdown,
                        bound_secs: countdown.secs,
                        settled_at,
                    },
                })
            }
            Settled::Network(Ok(Ok(response))) => {
                let data = self.data;
                match classify_response(&response) {
                    Ok(results) => {
                        tracing::info!(
                            %correlation_id,
                            result_count = results.len(),
                            "Request succeeded"
                        );
                        RequestOutcome::Succeeded(Request {
                            data,
                            state: Succeeded {
                                results,
                                settled_at,
                            },
                        })
                    }
                    Err(reason) => {
                        tracing::error!(
                            %correlation_id,
                            status = response.status,
                            error = %reason.to_error_message(),
                            "Request failed"
                        );
                        RequestOutcome::Failed(Request {
                            data,
                            state: Failed { reason, settled_at },
                        })
                    }
                }
            }
            Settled::Network(Ok(Err(e))) if e.is_timeout() => {
                tracing::warn!(%correlation_id, "Transport timed out");
                RequestOutcome::TimedOut(Request {
                    data: self.data,
                    state: TimedOut {
                        source: TimeoutSource::Transport,
                        bound_secs: countdown.secs,
                        settled_at,
                    },
                })
            }
            Settled::Network(Ok(Err(e))) => {
                tracing::error!(%correlation_id, error = %e, "Transport failed");
                RequestOutcome::Failed(Request {
                    data: self.data,
                    state: Failed {
                        reason: FailureReason::Transport {
                            error: e.to_string(),
                        },
                        settled_at,
                    },
                })
            }
            Settled::Network(Err(_)) => {
                // Channel closed: the network task died without sending a result
                tracing::error!(%correlation_id, "Network task terminated");
                RequestOutcome::Failed(Request {
                    data: self.data,
                    state: Failed {
                        reason: FailureReason::TaskTerminated,
                        settled_at,
                    },
                })
            }
        }
    }
}

/// Turn an HTTP response into results, or the reason it is a failure.
fn classify_response(
    response: &HttpResponse,
) -> std::result::Result<Vec<crate::domain::envelope::ProcessingResult>, FailureReason> {
    if !(200..300).contains(&response.status) {
        return Err(FailureReason::HttpStatus {
            status: response.status,
            message: message_from_body(&response.body),
        });
    }
    parse_response(&response.body).map_err(|e| FailureReason::InvalidResponse {
        error: e.to_string(),
    })
}

const MAX_BODY_MESSAGE_LEN: usize = 200;

/// Best-effort error message from an error response body.
///
/// Prefers a JSON `message` or `error` field (also nested as `error.message`),
/// then the raw body text.
fn message_from_body(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let field = value
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("error").and_then(|v| v.as_str()))
            .or_else(|| {
                value
                    .get("error")
                    .and_then(|v| v.get("message"))
                    .and_then(|v| v.as_str())
            });
        return field
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
    }

    Some(body.chars().take(MAX_BODY_MESSAGE_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::{CorrelationId, RequestBody, RequestEnvelope};
    use crate::domain::form::{FormatType, ResponseType, TransactionType};
    use crate::domain::request::state::RequestData;
    use crate::error::DispatchError;
    use crate::http::MockHttpClient;
    use std::future::pending;

    fn building() -> Request<Building> {
        Request {
            data: RequestData::new(RequestEnvelope {
                correlation_id: CorrelationId::from(uuid::Uuid::new_v4()),
                request: RequestBody {
                    transaction_type: TransactionType::GetSchema,
                    order_type: None,
                    format: FormatType::Json,
                    response_type: ResponseType::Asn,
                    input_file: None,
                },
            }),
            state: Building {},
        }
    }

    fn transport() -> Transport {
        Transport {
            endpoint: "https://edi.example.com".to_string(),
            path: "/process".to_string(),
            timeout_ms: 60_000,
            bearer_token: Some("token".to_string()),
        }
    }

    const COUNTDOWN: Countdown = Countdown {
        secs: 60,
        tick: Duration::from_secs(1),
    };

    #[tokio::test(start_paused = true)]
    async fn test_success_parses_results() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /process",
            Ok(HttpResponse {
                status: 200,
                body: r#"{"response":[{"success":true,"filename":"asn.json","content":"e30=","mimeType":"application/json","message":"ok"}]}"#.to_string(),
            }),
        );

        let in_flight = building().dispatch(mock.clone(), transport()).unwrap();
        let outcome = in_flight.complete(COUNTDOWN, |_| {}, pending()).await;

        match outcome {
            RequestOutcome::Succeeded(r) => {
                assert_eq!(r.state.results.len(), 1);
                assert_eq!(r.state.results[0].filename, "asn.json");
            }
            other => panic!("Expected success, got {}", other.variant()),
        }
        let calls = mock.get_calls();
        assert_eq!(calls[0].bearer_token.as_deref(), Some("token"));
        assert!(!calls[0].body.contains("Input File"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expiry_aborts_network() {
        let mock = MockHttpClient::new();
        let _trigger = mock.add_response_with_trigger(
            "POST /process",
            Ok(HttpResponse {
                status: 200,
                body: r#"{"response":[]}"#.to_string(),
            }),
        );

        let countdown = Countdown {
            secs: 3,
            tick: Duration::from_secs(1),
        };
        let mut ticks = Vec::new();
        let in_flight = building().dispatch(mock.clone(), transport()).unwrap();
        let outcome = in_flight
            .complete(countdown, |remaining| ticks.push(remaining), pending())
            .await;

        assert_eq!(ticks, vec![2, 1, 0]);
        match outcome {
            RequestOutcome::TimedOut(r) => {
                assert_eq!(r.state.source, TimeoutSource::Countdown);
                assert_eq!(r.state.bound_secs, 3);
            }
            other => panic!("Expected timeout, got {}", other.variant()),
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_timeout_is_timed_out() {
        let mock = MockHttpClient::new();
        mock.add_response("POST /process", Err(DispatchError::Timeout));

        let in_flight = building().dispatch(mock, transport()).unwrap();
        let outcome = in_flight.complete(COUNTDOWN, |_| {}, pending()).await;

        match &outcome {
            RequestOutcome::TimedOut(r) => assert_eq!(r.state.source, TimeoutSource::Transport),
            other => panic!("Expected timeout, got {}", other.variant()),
        }
        assert!(outcome.error_notice().unwrap().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_uses_body_message() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /process",
            Ok(HttpResponse {
                status: 400,
                body: r#"{"message":"Unsupported response type"}"#.to_string(),
            }),
        );

        let in_flight = building().dispatch(mock, transport()).unwrap();
        let outcome = in_flight.complete(COUNTDOWN, |_| {}, pending()).await;
        let notice = outcome.error_notice().unwrap();
        assert!(!notice.is_timeout());
        assert!(notice.message.starts_with("Unsupported response type (Correlation ID: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_success_body_fails() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /process",
            Ok(HttpResponse {
                status: 200,
                body: "<html>oops</html>".to_string(),
            }),
        );

        let in_flight = building().dispatch(mock, transport()).unwrap();
        let outcome = in_flight.complete(COUNTDOWN, |_| {}, pending()).await;
        assert_eq!(
            outcome.lifecycle_state(),
            crate::RequestLifecycleState::Failed("Invalid response from server".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wins_and_aborts() {
        let mock = MockHttpClient::new();
        let _trigger = mock.add_response_with_trigger(
            "POST /process",
            Ok(HttpResponse {
                status: 200,
                body: r#"{"response":[]}"#.to_string(),
            }),
        );

        let in_flight = building().dispatch(mock.clone(), transport()).unwrap();
        let cancellation = async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            CancellationReason::User
        };
        let outcome = in_flight.complete(COUNTDOWN, |_| {}, cancellation).await;

        assert!(outcome.error_notice().is_none());
        match outcome {
            RequestOutcome::Cancelled(r) => assert_eq!(r.state.reason, CancellationReason::User),
            other => panic!("Expected cancellation, got {}", other.variant()),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[test]
    fn test_message_from_body() {
        assert_eq!(
            message_from_body(r#"{"error":"Invalid token"}"#).as_deref(),
            Some("Invalid token")
        );
        assert_eq!(
            message_from_body(r#"{"error":{"message":"Queue full"}}"#).as_deref(),
            Some("Queue full")
        );
        assert_eq!(message_from_body(r#"{"status":500}"#), None);
        assert_eq!(
            message_from_body("Service Unavailable").as_deref(),
            Some("Service Unavailable")
        );
        assert_eq!(message_from_body("  "), None);
    }
}
