//! Read-only view of session state for the rest of the application.

use crate::auth_fsm::AuthState;
use crate::session::Session;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot published after every store update or transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    #[serde(skip)]
    pub session: Option<Arc<Session>>,
    pub state: AuthState,
    pub loading: bool,
}

impl SessionView {
    pub fn new(session: Option<Arc<Session>>, state: AuthState) -> Self {
        Self {
            session,
            loading: state == AuthState::Initializing,
            state,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.user_id.as_str())
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self::new(None, AuthState::Idle)
    }
}

/// Handle held by UI code or other consumers. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionConsumer {
    rx: watch::Receiver<SessionView>,
}

impl SessionConsumer {
    pub fn new(rx: watch::Receiver<SessionView>) -> Self {
        Self { rx }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.rx.borrow().session.clone()
    }

    /// True only while initialization is running.
    pub fn loading(&self) -> bool {
        self.rx.borrow().loading
    }

    pub fn state(&self) -> AuthState {
        self.rx.borrow().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().state.is_authenticated()
    }

    pub fn snapshot(&self) -> SessionView {
        self.rx.borrow().clone()
    }

    /// Wait for the next published view. Returns `None` once the controller
    /// is gone.
    pub async fn changed(&mut self) -> Option<SessionView> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
