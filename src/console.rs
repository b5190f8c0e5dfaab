//! Console: the authenticated dashboard session.
//!
//! Ties the dispatcher to the session store, navigation and the idle monitor.
//! Logout, whether manual or forced by inactivity, releases resources in a fixed
//! order: cancel the in-flight request, clear the session, then navigate.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;

use crate::dispatcher::{DispatchConfig, Dispatcher};
use crate::domain::request::CancellationReason;
use crate::http::HttpClient;
use crate::idle::{ActivityKind, IdleClock, IdleMonitor, OnIdleFn};
use crate::output::{ArtifactSink, OutputReconciler};
use crate::session::{Credentials, LoginResponse, LogoutReason, Navigator, Route, SessionStore};

pub struct Console<H, S, N>
where
    H: HttpClient,
    S: SessionStore,
    N: Navigator,
{
    dispatcher: Dispatcher<H, S>,
    session: Arc<S>,
    navigator: Arc<N>,
    clock: Arc<IdleClock>,
    idle_monitor: Mutex<Option<IdleMonitor>>,
}

impl<H, S, N> Console<H, S, N>
where
    H: HttpClient + 'static,
    S: SessionStore + 'static,
    N: Navigator + 'static,
{
    pub fn new(
        http_client: H,
        session: Arc<S>,
        navigator: Arc<N>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Dispatcher::new(http_client, session.clone(), config),
            session,
            navigator,
            clock: Arc::new(IdleClock::new()),
            idle_monitor: Mutex::new(None),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<H, S> {
        &self.dispatcher
    }

    /// Reconciler over this console's held results.
    pub fn output<K: ArtifactSink>(&self, sink: K) -> OutputReconciler<K> {
        let config = self.dispatcher.config();
        OutputReconciler::new(
            self.dispatcher.results(),
            sink,
            Duration::from_millis(config.download_stagger_ms),
            Duration::from_millis(config.download_clear_delay_ms),
        )
    }

    /// Resume a session restored at startup; unauthenticated users go to login.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.session.is_authenticated() {
            self.start_idle_monitor();
            true
        } else {
            self.navigator.navigate(Route::Login(LogoutReason::Manual));
            false
        }
    }

    pub fn login(self: &Arc<Self>, credentials: &Credentials) -> LoginResponse {
        let response = self.session.login(credentials);
        if response.success {
            self.start_idle_monitor();
            self.navigator.navigate(Route::Dashboard);
        }
        response
    }

    /// Report user interaction; resets the idle clock.
    pub fn record_activity(&self, kind: ActivityKind) {
        self.clock.record(kind);
    }

    pub fn is_idle_monitor_running(&self) -> bool {
        self.idle_monitor
            .lock()
            .as_ref()
            .is_some_and(IdleMonitor::is_running)
    }

    /// Manual logout.
    pub fn logout(&self) {
        tracing::info!("Logging out");
        self.end_session(LogoutReason::Manual);
    }

    /// Release timers and the in-flight request when the owning view goes away.
    pub fn teardown(&self) {
        self.stop_idle_monitor();
        self.dispatcher.shutdown();
    }

    fn start_idle_monitor(self: &Arc<Self>) {
        let config = self.dispatcher.config();
        // Idle time before this point belongs to the previous session
        self.clock.reset();

        let console = Arc::downgrade(self);
        let on_idle: OnIdleFn = Arc::new(move || {
            if let Some(console) = console.upgrade() {
                console.force_logout();
            }
        });

        let monitor = IdleMonitor::start(
            self.clock.clone(),
            Duration::from_secs(config.idle_timeout_secs),
            Duration::from_millis(config.idle_check_interval_ms),
            on_idle,
        );
        // Replacing stops any previous monitor
        *self.idle_monitor.lock() = Some(monitor);
    }

    fn stop_idle_monitor(&self) {
        if let Some(mut monitor) = self.idle_monitor.lock().take() {
            monitor.stop();
        }
    }

    fn force_logout(&self) {
        tracing::warn!("Session expired due to inactivity");
        counter!("edi_dispatch_forced_logouts_total").increment(1);
        self.end_session(LogoutReason::Inactivity);
    }

    fn end_session(&self, reason: LogoutReason) {
        self.stop_idle_monitor();
        self.dispatcher.cancel_with(CancellationReason::Logout);
        self.session.logout();
        self.navigator.navigate(Route::Login(reason));
    }
}

impl<H, S, N> Drop for Console<H, S, N>
where
    H: HttpClient,
    S: SessionStore,
    N: Navigator,
{
    fn drop(&mut self) {
        if let Some(mut monitor) = self.idle_monitor.get_mut().take() {
            monitor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockHttpClient;
    use crate::session::{InMemorySessionStore, RecordingNavigator};

    fn credentials() -> Credentials {
        Credentials {
            username: "operator".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_starts_monitor_and_logout_stops_it() {
        let navigator = Arc::new(RecordingNavigator::new());
        let console = Console::new(
            MockHttpClient::new(),
            Arc::new(InMemorySessionStore::new(credentials())),
            navigator.clone(),
            DispatchConfig::default(),
        );

        assert!(!console.start());
        assert!(console.login(&credentials()).success);
        assert!(console.is_idle_monitor_running());

        console.logout();
        assert!(!console.is_idle_monitor_running());
        assert_eq!(
            navigator.routes(),
            vec![
                Route::Login(LogoutReason::Manual),
                Route::Dashboard,
                Route::Login(LogoutReason::Manual),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_does_not_start_monitor() {
        let navigator = Arc::new(RecordingNavigator::new());
        let console = Console::new(
            MockHttpClient::new(),
            Arc::new(InMemorySessionStore::new(credentials())),
            navigator.clone(),
            DispatchConfig::default(),
        );
        let bad = Credentials {
            username: "operator".to_string(),
            password: "guess".to_string(),
        };
        assert!(!console.login(&bad).success);
        assert!(!console.is_idle_monitor_running());
        assert!(navigator.routes().is_empty());
    }
}
