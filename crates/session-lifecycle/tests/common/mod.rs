#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use session_lifecycle::{
    AuthBackend, AuthController, AuthError, AuthEvent, AuthResult, LifecycleConfig, Session,
    SessionStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Backend that replays queued results, then falls back to the current
/// session.
pub struct ScriptedBackend {
    events: broadcast::Sender<AuthEvent>,
    session: Mutex<Option<Session>>,
    get_results: Mutex<VecDeque<AuthResult<Option<Session>>>>,
    refresh_results: Mutex<VecDeque<AuthResult<Session>>>,
    get_calls: AtomicU32,
    refresh_calls: AtomicU32,
    latency: Mutex<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            session: Mutex::new(None),
            get_results: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            get_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    pub fn with_session(session: Session) -> Arc<Self> {
        let backend = Self::new();
        *backend.session.lock() = Some(session);
        backend
    }

    pub fn push_get(&self, result: AuthResult<Option<Session>>) {
        self.get_results.lock().push_back(result);
    }

    pub fn push_refresh(&self, result: AuthResult<Session>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Make every later backend call take `latency` of virtual time.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn respond_after_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.respond_after_latency().await;
        let scripted = self.get_results.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.session.lock().clone()),
        }
    }

    async fn refresh_session(&self, _refresh_token: &str) -> AuthResult<Session> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.respond_after_latency().await;
        let scripted = self.refresh_results.lock().pop_front();
        match scripted {
            Some(Ok(session)) => {
                *self.session.lock() = Some(session.clone());
                Ok(session)
            }
            Some(Err(e)) => Err(e),
            None => Err(AuthError::NotLoggedIn),
        }
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

pub fn session_expiring_in(user: &str, token: &str, secs: i64) -> Session {
    Session::new(
        user,
        token,
        format!("{}-refresh", token),
        Utc::now() + chrono::Duration::seconds(secs),
    )
    .with_email(format!("{}@example.com", user))
}

pub fn controller(backend: &Arc<ScriptedBackend>) -> AuthController {
    controller_with_store(backend, Arc::new(SessionStore::new()))
}

pub fn controller_with_store(
    backend: &Arc<ScriptedBackend>,
    store: Arc<SessionStore>,
) -> AuthController {
    let backend: Arc<dyn AuthBackend> = backend.clone();
    AuthController::new(backend, store, LifecycleConfig::default())
}

/// Poll `condition` while letting virtual time run in small steps.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}
