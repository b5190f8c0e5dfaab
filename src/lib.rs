//! Client for submitting EDI/JSON transactions to a processing backend.
//!
//! The [`Dispatcher`] assembles a request envelope from the form selections and a
//! staged file, sends it, and races the response against a client-side countdown.
//! At most one request is in flight; results are held until the
//! [`OutputReconciler`] downloads them. A [`Console`] wraps the dispatcher in an
//! authenticated session with an idle monitor that forces logout after inactivity.

pub mod builder;
pub mod console;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod http;
pub mod idle;
pub mod intake;
pub mod output;
pub mod session;

// Re-export commonly used types
pub use console::Console;
pub use dispatcher::{DispatchConfig, Dispatcher, DispatcherView, Submission};
pub use domain::envelope::{CorrelationId, ProcessingResult, RequestEnvelope};
pub use domain::form::{FormState, FormatType, OrderType, ResponseType, TransactionType};
pub use domain::request::{
    CancellationReason, ErrorNotice, FailureReason, NoticeKind, RequestLifecycleState,
    RequestOutcome, TimeoutSource,
};
pub use error::{DispatchError, Result};
pub use http::{HttpClient, HttpRequest, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use idle::{ActivityKind, IdleClock, IdleMonitor};
pub use intake::StagedFile;
pub use output::{
    Artifact, ArtifactSink, DirectorySink, MockArtifactSink, OutputReconciler, ResultStore,
};
pub use session::{
    Credentials, InMemorySessionStore, LoginResponse, LogoutReason, Navigator, RecordingNavigator,
    Route, SessionStore,
};
