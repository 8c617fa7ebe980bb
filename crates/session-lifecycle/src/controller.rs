//! Orchestrates the session lifecycle: initialization, provider events,
//! scheduled refresh and teardown.
//!
//! The controller is the only writer of [`SessionStore`] and the only caller
//! of [`AuthStateMachine::set_state`]. Consumers observe it through
//! [`SessionConsumer`].

use crate::auth_fsm::AuthState;
use crate::backend::AuthBackend;
use crate::consumer::{SessionConsumer, SessionView};
use crate::debounced::Debounced;
use crate::error::{AuthError, AuthResult};
use crate::event_debouncer::{AuthEventDebouncer, DEFAULT_DEBOUNCE_WINDOW};
use crate::retry::RetryPolicy;
use crate::scheduler::{TokenRefreshScheduler, DEFAULT_REFRESH_MARGIN};
use crate::session::{AuthEvent, AuthEventKind, Session};
use crate::state_machine::{
    AuthStateMachine, OperationKind, StateTransition, DEFAULT_INIT_COOLDOWN,
    DEFAULT_REFRESH_COOLDOWN,
};
use crate::store::SessionStore;
use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Delay applied to foreground revalidation bursts.
pub const DEFAULT_FOREGROUND_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Tunables for [`AuthController`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub debounce_window: Duration,
    pub refresh_margin: Duration,
    pub init_cooldown: Duration,
    pub refresh_cooldown: Duration,
    pub foreground_debounce: Duration,
    pub retry: RetryPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            init_cooldown: DEFAULT_INIT_COOLDOWN,
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            foreground_debounce: DEFAULT_FOREGROUND_DEBOUNCE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Refresh attempts in the current cycle.
#[derive(Debug, Default, Clone, Copy)]
struct RefreshAttempt {
    count: u32,
    last_attempt_at: Option<Instant>,
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    store: Arc<SessionStore>,
    machine: Mutex<AuthStateMachine>,
    /// Held while an event, a sign-out or an async result is applied.
    writer: Mutex<()>,
    debouncer: Mutex<AuthEventDebouncer>,
    scheduler: TokenRefreshScheduler,
    retry: RetryPolicy,
    attempts: Mutex<RefreshAttempt>,
    view_tx: watch::Sender<SessionView>,
    mounted: AtomicBool,
    refresh_cleanup_registered: Arc<AtomicBool>,
    listener: Mutex<Option<JoinHandle<()>>>,
    foreground: Debounced,
}

/// Releases an advisory operation lock when dropped.
struct OperationLease {
    inner: Arc<Inner>,
    kind: OperationKind,
}

impl OperationLease {
    fn acquire(inner: &Arc<Inner>, kind: OperationKind) -> Option<Self> {
        let acquired = inner.machine.lock().try_acquire(kind);
        acquired.then(|| Self {
            inner: Arc::clone(inner),
            kind,
        })
    }
}

impl Drop for OperationLease {
    fn drop(&mut self) {
        self.inner.machine.lock().release(self.kind);
    }
}

impl Inner {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn state(&self) -> AuthState {
        self.machine.lock().current()
    }

    /// Publish the current view if it changed.
    fn publish(&self) {
        let view = SessionView::new(self.store.get(), self.state());
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn set_state(&self, next: AuthState) -> AuthResult<AuthState> {
        let result = self.machine.lock().set_state(next);
        self.publish();
        result
    }

    /// Walk the shortest legal route from the current state to `target`.
    fn drive_to(&self, target: AuthState) -> AuthResult<AuthState> {
        let result = {
            let mut machine = self.machine.lock();
            let current = machine.current();
            match current.path_to(target) {
                Some(route) => route
                    .into_iter()
                    .try_fold(current, |_, step| machine.set_state(step)),
                None => Err(AuthError::InvalidStateTransition {
                    from: current,
                    to: target,
                }),
            }
        };
        self.publish();
        result
    }

    fn record_error(&self, error: AuthError) {
        self.machine.lock().set_error(error);
    }

    fn record_attempt(&self) -> u32 {
        let mut attempts = self.attempts.lock();
        attempts.count += 1;
        attempts.last_attempt_at = Some(Instant::now());
        attempts.count
    }

    fn reset_attempts(&self) {
        *self.attempts.lock() = RefreshAttempt::default();
    }

    /// Store `session`, move to Authenticated and arm the next refresh.
    /// An identical session while already Authenticated changes nothing.
    fn authenticate(self: &Arc<Self>, session: Session) -> AuthResult<()> {
        let unchanged = self.store.get().as_deref() == Some(&session);
        if unchanged && self.state() == AuthState::Authenticated {
            debug!(user_id = %session.user_id, "Session unchanged, skipping update");
            return Ok(());
        }

        if !unchanged {
            self.store.set(Some(session.clone()));
        }
        self.drive_to(AuthState::Authenticated)?;
        self.machine.lock().clear_error();
        self.arm_refresh(&session);
        Ok(())
    }

    /// Clear the session and move to Unauthenticated.
    fn sign_out_locally(&self) -> AuthResult<()> {
        self.scheduler.cancel();
        if self.store.get().is_some() {
            self.store.clear();
        }
        self.reset_attempts();
        self.drive_to(AuthState::Unauthenticated)?;
        Ok(())
    }

    fn arm_refresh(self: &Arc<Self>, session: &Session) {
        let weak = Arc::downgrade(self);
        let armed = self
            .scheduler
            .schedule(session, move || run_scheduled_refresh(weak));
        if armed.is_some() {
            self.register_refresh_cleanup();
        }
    }

    /// A refresh was turned away by the operation lock while the session is
    /// still due. Try again once the lock can be taken.
    fn rearm_after_cooldown(self: &Arc<Self>) {
        if self.state() != AuthState::Authenticated || self.scheduler.is_armed() {
            return;
        }
        let delay = self.machine.lock().retry_after(OperationKind::Refresh);
        let weak = Arc::downgrade(self);
        let armed = self
            .scheduler
            .schedule_in(delay, move || run_scheduled_refresh(weak));
        if armed.is_some() {
            self.register_refresh_cleanup();
        }
    }

    fn register_refresh_cleanup(&self) {
        if !self.refresh_cleanup_registered.swap(true, Ordering::SeqCst) {
            let scheduler = self.scheduler.clone();
            let registered = Arc::clone(&self.refresh_cleanup_registered);
            self.machine.lock().add_cleanup_task(move || {
                registered.store(false, Ordering::SeqCst);
                scheduler.cancel();
                Ok(())
            });
        }
    }

    fn handle_event(self: &Arc<Self>, event: AuthEvent) -> bool {
        if !self.is_mounted() {
            return false;
        }

        let accepted = self
            .debouncer
            .lock()
            .should_process(event.kind, event.user_id());
        if !accepted {
            debug!(kind = %event.kind, "Suppressed duplicate auth event");
            return false;
        }

        info!(kind = %event.kind, user_id = ?event.user_id(), "Auth event received");

        let _writer = self.writer.lock();
        let result = match (event.kind, event.session) {
            (AuthEventKind::SignedOut, _) | (_, None) => self.sign_out_locally(),
            (_, Some(session)) => self.authenticate(session),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to apply auth event");
        }

        self.publish();
        true
    }

    async fn initialize(self: &Arc<Self>) -> AuthResult<AuthState> {
        if !self.is_mounted() {
            return Err(AuthError::Cancelled);
        }
        let current = self.state();
        if !matches!(
            current,
            AuthState::Idle | AuthState::Unauthenticated | AuthState::Error
        ) {
            debug!(state = ?current, "Already initialized");
            return Ok(current);
        }

        let Some(_lease) = OperationLease::acquire(self, OperationKind::Initialize) else {
            debug!("Initialization in flight or cooling down, skipping");
            return Ok(current);
        };

        self.drive_to(AuthState::Initializing)?;
        let epoch = self.store.version();

        let result = match self.store.get().filter(|_| self.store.is_valid()) {
            Some(cached) => {
                debug!(user_id = %cached.user_id, "Using cached session");
                Ok(Some(Session::clone(&cached)))
            }
            None => {
                let backend = Arc::clone(&self.backend);
                self.retry
                    .run("get session", |_| {
                        let backend = Arc::clone(&backend);
                        async move { backend.get_session().await }
                    })
                    .await
            }
        };

        if !self.is_mounted() {
            return Err(AuthError::Cancelled);
        }
        self.apply_initial_session(epoch, result)
    }

    /// Apply the outcome of initialization unless an event or a sign-out got
    /// there first.
    fn apply_initial_session(
        self: &Arc<Self>,
        epoch: u64,
        result: AuthResult<Option<Session>>,
    ) -> AuthResult<AuthState> {
        let _writer = self.writer.lock();
        let current = self.state();
        if current != AuthState::Initializing || self.store.version() != epoch {
            debug!(state = ?current, "Session changed during initialization, discarding result");
            return Ok(current);
        }

        match result {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id, "Session restored");
                self.authenticate(session)?;
            }
            Ok(None) => {
                info!("No session found");
                self.sign_out_locally()?;
            }
            Err(e) => {
                error!(error = %e, "Session initialization failed");
                self.scheduler.cancel();
                self.store.clear();
                self.record_error(e);
                self.drive_to(AuthState::Error)?;
            }
        }

        Ok(self.state())
    }

    /// One refresh cycle. Boxed so the scheduler callback can name its type.
    fn refresh(self: Arc<Self>) -> BoxFuture<'static, AuthResult<AuthState>> {
        async move {
            if !self.is_mounted() {
                return Err(AuthError::Cancelled);
            }
            let Some(_lease) = OperationLease::acquire(&self, OperationKind::Refresh) else {
                debug!("Refresh in flight or cooling down, skipping");
                self.rearm_after_cooldown();
                return Ok(self.state());
            };

            let current = self.state();
            let session = match self.store.get() {
                Some(session) if current == AuthState::Authenticated => session,
                _ => {
                    debug!(state = ?current, "No authenticated session to refresh");
                    return Ok(current);
                }
            };

            self.set_state(AuthState::TokenRefreshNeeded)?;
            let epoch = self.store.version();

            let refresh_token = session.refresh_token.clone();
            let result = self
                .retry
                .run("token refresh", |_| {
                    let inner = Arc::clone(&self);
                    let refresh_token = refresh_token.clone();
                    async move {
                        if !inner.is_mounted() || inner.store.version() != epoch {
                            return Err(AuthError::Cancelled);
                        }
                        inner.set_state(AuthState::TokenRefreshing)?;
                        let attempt = inner.record_attempt();
                        debug!(attempt, "Refreshing access token");

                        match inner.backend.refresh_session(&refresh_token).await {
                            Ok(session) => Ok(session),
                            Err(e) => {
                                if inner.is_mounted() {
                                    if let Err(rejected) =
                                        inner.set_state(AuthState::TokenRefreshFailed)
                                    {
                                        debug!(
                                            error = %rejected,
                                            "Refresh failure not recorded, state moved on"
                                        );
                                    }
                                }
                                Err(e)
                            }
                        }
                    }
                })
                .await;

            if !self.is_mounted() {
                return Err(AuthError::Cancelled);
            }
            self.apply_refresh(epoch, result)
        }
        .boxed()
    }

    /// Apply the outcome of a refresh cycle unless an event or a sign-out
    /// replaced the session while it ran.
    fn apply_refresh(
        self: &Arc<Self>,
        epoch: u64,
        result: AuthResult<Session>,
    ) -> AuthResult<AuthState> {
        let _writer = self.writer.lock();
        let current = self.state();
        if !current.is_refreshing() || self.store.version() != epoch {
            self.reset_attempts();
            debug!(state = ?current, "Session changed during refresh, discarding result");
            return Ok(current);
        }

        match result {
            Ok(session) => {
                self.reset_attempts();
                info!(
                    user_id = %session.user_id,
                    expires_at = %session.expires_at,
                    "Token refreshed"
                );
                self.authenticate(session)?;
            }
            Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                self.sign_out_locally()?;
                self.record_error(e);
            }
        }

        Ok(self.state())
    }

    /// Refresh right away when the session is already inside the margin.
    async fn revalidate(self: Arc<Self>) {
        if !self.is_mounted() || self.state() != AuthState::Authenticated {
            return;
        }
        let Some(session) = self.store.get() else {
            return;
        };

        let margin = chrono::Duration::from_std(self.scheduler.margin())
            .unwrap_or_else(|_| chrono::Duration::zero());
        if session.expires_within(margin, Utc::now()) {
            info!(user_id = %session.user_id, "Session near expiry on foreground, refreshing");
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "Foreground refresh did not complete");
            }
        }
    }
}

async fn run_scheduled_refresh(target: Weak<Inner>) {
    if let Some(inner) = target.upgrade() {
        if let Err(e) = inner.refresh().await {
            debug!(error = %e, "Scheduled refresh did not complete");
        }
    }
}

/// Owns the session lifecycle for one signed-in client.
///
/// Cloning shares the same controller.
#[derive(Clone)]
pub struct AuthController {
    inner: Arc<Inner>,
}

impl AuthController {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        store: Arc<SessionStore>,
        config: LifecycleConfig,
    ) -> Self {
        let (view_tx, _view_rx) = watch::channel(SessionView::default());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let foreground_target = weak.clone();
            Inner {
                backend,
                store,
                machine: Mutex::new(AuthStateMachine::with_cooldowns(
                    config.init_cooldown,
                    config.refresh_cooldown,
                )),
                writer: Mutex::new(()),
                debouncer: Mutex::new(AuthEventDebouncer::new(config.debounce_window)),
                scheduler: TokenRefreshScheduler::new(config.refresh_margin),
                retry: config.retry,
                attempts: Mutex::new(RefreshAttempt::default()),
                view_tx,
                mounted: AtomicBool::new(true),
                refresh_cleanup_registered: Arc::new(AtomicBool::new(false)),
                listener: Mutex::new(None),
                foreground: Debounced::new(config.foreground_debounce, move || {
                    let target = foreground_target.clone();
                    async move {
                        if let Some(inner) = target.upgrade() {
                            inner.revalidate().await;
                        }
                    }
                    .boxed()
                }),
            }
        });

        Self { inner }
    }

    /// Subscribe to provider events and run initialization.
    pub async fn start(&self) -> AuthResult<AuthState> {
        self.spawn_listener();
        self.initialize().await
    }

    fn spawn_listener(&self) {
        let mut events = self.inner.backend.on_auth_state_change();
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.handle_event(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth event channel closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Resolve the initial session. A call while another initialization is
    /// running, within the cooldown, or after the lifecycle already settled
    /// returns the current state without doing anything.
    pub async fn initialize(&self) -> AuthResult<AuthState> {
        self.inner.initialize().await
    }

    /// Apply one provider event. Returns false when it was suppressed.
    pub fn handle_event(&self, event: AuthEvent) -> bool {
        self.inner.handle_event(event)
    }

    /// Run a refresh cycle now. Terminal failures sign the user out and are
    /// reported through [`last_error`](Self::last_error).
    pub async fn refresh_now(&self) -> AuthResult<AuthState> {
        Arc::clone(&self.inner).refresh().await
    }

    /// The application came back to the foreground; revalidate shortly.
    pub fn notify_foreground(&self) {
        if self.inner.is_mounted() {
            self.inner.foreground.invoke();
        }
    }

    /// Drop the local session without contacting the provider.
    pub fn sign_out(&self) -> AuthResult<()> {
        let _writer = self.inner.writer.lock();
        self.inner.debouncer.lock().reset();
        let result = self.inner.sign_out_locally();
        self.inner.publish();
        result
    }

    /// Stop all background work. Later async results are discarded.
    pub fn shutdown(&self) {
        if !self.inner.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.scheduler.shutdown();
        self.inner.foreground.cancel();
        let ran = self.inner.machine.lock().execute_cleanup();
        info!(cleanup_tasks = ran, "Auth controller shut down");
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.machine.lock().history()
    }

    pub fn last_error(&self) -> Option<Arc<AuthError>> {
        self.inner.machine.lock().last_error()
    }

    /// Attempts made in the current refresh cycle; zero after a success.
    pub fn refresh_attempts(&self) -> u32 {
        self.inner.attempts.lock().count
    }

    pub fn last_refresh_attempt_at(&self) -> Option<Instant> {
        self.inner.attempts.lock().last_attempt_at
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &TokenRefreshScheduler {
        &self.inner.scheduler
    }

    pub fn consumer(&self) -> SessionConsumer {
        SessionConsumer::new(self.inner.view_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SignedOutBackend {
        events: broadcast::Sender<AuthEvent>,
    }

    #[async_trait]
    impl AuthBackend for SignedOutBackend {
        async fn get_session(&self) -> AuthResult<Option<Session>> {
            Ok(None)
        }

        async fn refresh_session(&self, _refresh_token: &str) -> AuthResult<Session> {
            Err(AuthError::NotLoggedIn)
        }

        fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
            self.events.subscribe()
        }
    }

    fn controller() -> AuthController {
        let (events, _) = broadcast::channel(8);
        AuthController::new(
            Arc::new(SignedOutBackend { events }),
            Arc::new(SessionStore::new()),
            LifecycleConfig::default(),
        )
    }

    fn session(user: &str) -> Session {
        Session::new(user, "access", "refresh", Utc::now() + chrono::Duration::hours(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_without_session() {
        let controller = controller();
        let state = controller.initialize().await.unwrap();

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(controller.store().get().is_none());
        let path: Vec<_> = controller.history().iter().map(|t| t.to).collect();
        assert_eq!(path, vec![AuthState::Initializing, AuthState::Unauthenticated]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_twice_is_guarded() {
        let controller = controller();
        controller.initialize().await.unwrap();
        let transitions = controller.history().len();

        // Within the cooldown nothing happens.
        assert_eq!(controller.initialize().await.unwrap(), AuthState::Unauthenticated);
        assert_eq!(controller.history().len(), transitions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_session_is_noop() {
        let controller = controller();
        assert_eq!(controller.refresh_now().await.unwrap(), AuthState::Idle);
        assert!(controller.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_registered_once_per_authenticated_stint() {
        let controller = controller();
        controller.handle_event(AuthEvent::signed_in(session("user-1")));
        controller.handle_event(AuthEvent::token_refreshed(session("user-1")));

        assert_eq!(controller.inner.machine.lock().pending_cleanup_tasks(), 1);
        assert!(controller.scheduler().is_armed());

        controller.handle_event(AuthEvent::signed_out());
        assert_eq!(controller.inner.machine.lock().pending_cleanup_tasks(), 0);
        assert!(!controller.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_result_after_sign_out_is_discarded() {
        let controller = controller();
        controller.handle_event(AuthEvent::signed_in(session("user-1")));
        controller.inner.set_state(AuthState::TokenRefreshNeeded).unwrap();
        let epoch = controller.store().version();

        controller.sign_out().unwrap();
        let state = controller
            .inner
            .apply_refresh(epoch, Ok(session("user-1")))
            .unwrap();

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(controller.store().get().is_none());
        assert!(!controller.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_after_new_sign_in_is_discarded() {
        let controller = controller();
        controller.handle_event(AuthEvent::signed_in(session("user-1")));
        controller.inner.set_state(AuthState::TokenRefreshNeeded).unwrap();
        let epoch = controller.store().version();

        controller.handle_event(AuthEvent::signed_in(session("user-2")));
        let state = controller
            .inner
            .apply_refresh(epoch, Err(AuthError::InvalidGrant("revoked".to_string())))
            .unwrap();

        assert_eq!(state, AuthState::Authenticated);
        assert_eq!(controller.store().get().unwrap().user_id, "user-2");
        assert!(controller.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_session_after_sign_out_is_discarded() {
        let controller = controller();
        controller.inner.drive_to(AuthState::Initializing).unwrap();
        let epoch = controller.store().version();

        controller.handle_event(AuthEvent::signed_out());
        let state = controller
            .inner
            .apply_initial_session(epoch, Ok(Some(session("user-1"))))
            .unwrap();

        assert_eq!(state, AuthState::Unauthenticated);
        assert!(controller.store().get().is_none());
        assert!(!controller.scheduler().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_events() {
        let controller = controller();
        controller.shutdown();

        assert!(!controller.handle_event(AuthEvent::signed_in(session("user-1"))));
        assert_eq!(controller.state(), AuthState::Idle);
        assert!(!controller.is_mounted());
    }
}
