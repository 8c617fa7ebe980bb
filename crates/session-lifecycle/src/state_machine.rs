//! Guarded auth state holder: transitions, diagnostics history, cleanup tasks
//! and the advisory operation locks.

use crate::auth_fsm::{AuthMachine, AuthState};
use crate::error::{AuthError, AuthResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Maximum number of transitions kept for diagnostics.
pub const HISTORY_CAPACITY: usize = 10;

/// An initialization that completed within this window blocks a new one.
pub const DEFAULT_INIT_COOLDOWN: Duration = Duration::from_millis(2000);

/// A refresh that completed within this window blocks a new one.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_millis(1000);

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: AuthState,
    pub to: AuthState,
    pub at: DateTime<Utc>,
}

/// Callback that releases a timer or subscription.
///
/// Must not call back into the state machine that runs it.
pub type CleanupTask = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Optimistic, non-blocking guard for one kind of operation.
#[derive(Debug)]
struct OperationLock {
    cooldown: Duration,
    in_flight: bool,
    last_completed: Option<Instant>,
}

impl OperationLock {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            in_flight: false,
            last_completed: None,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(completed) = self.last_completed {
            if now.saturating_duration_since(completed) < self.cooldown {
                return false;
            }
        }
        self.in_flight = true;
        true
    }

    /// Wait before another acquire can succeed. A lock in flight reports the
    /// full cooldown.
    fn retry_after(&self, now: Instant) -> Duration {
        if self.in_flight {
            return self.cooldown;
        }
        self.last_completed
            .map(|completed| self.cooldown.saturating_sub(now.saturating_duration_since(completed)))
            .unwrap_or(Duration::ZERO)
    }

    fn release(&mut self, now: Instant) {
        if self.in_flight {
            self.in_flight = false;
            self.last_completed = Some(now);
        }
    }
}

/// Which advisory lock an operation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Initialize,
    Refresh,
}

/// Holds the canonical [`AuthState`] and applies only allow-listed transitions.
pub struct AuthStateMachine {
    fsm: AuthMachine,
    history: VecDeque<StateTransition>,
    cleanup_tasks: Vec<CleanupTask>,
    last_error: Option<Arc<AuthError>>,
    init_lock: OperationLock,
    refresh_lock: OperationLock,
}

impl AuthStateMachine {
    pub fn new() -> Self {
        Self::with_cooldowns(DEFAULT_INIT_COOLDOWN, DEFAULT_REFRESH_COOLDOWN)
    }

    pub fn with_cooldowns(init_cooldown: Duration, refresh_cooldown: Duration) -> Self {
        Self {
            fsm: AuthMachine::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            cleanup_tasks: Vec::new(),
            last_error: None,
            init_lock: OperationLock::new(init_cooldown),
            refresh_lock: OperationLock::new(refresh_cooldown),
        }
    }

    pub fn current(&self) -> AuthState {
        AuthState::from(self.fsm.state())
    }

    /// Move to `next`.
    ///
    /// Requesting the current state is a successful no-op. A transition that
    /// is not allow-listed is logged and rejected without touching any state;
    /// callers must check the result. Otherwise pending cleanup tasks run,
    /// the transition is recorded, and `next` becomes current.
    pub fn set_state(&mut self, next: AuthState) -> AuthResult<AuthState> {
        let current = self.current();
        if next == current {
            return Ok(current);
        }

        if !current.can_transition_to(next) {
            warn!(from = ?current, to = ?next, "Rejected auth state transition");
            return Err(AuthError::InvalidStateTransition {
                from: current,
                to: next,
            });
        }

        self.execute_cleanup();

        self.fsm
            .consume(&next.input())
            .map_err(|_| AuthError::InvalidStateTransition {
                from: current,
                to: next,
            })?;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: current,
            to: next,
            at: Utc::now(),
        });

        debug!(from = ?current, to = ?next, "Auth state transition");
        Ok(next)
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.history.iter().cloned().collect()
    }

    /// Record an error without changing state.
    pub fn set_error(&mut self, error: AuthError) {
        self.last_error = Some(Arc::new(error));
    }

    pub fn last_error(&self) -> Option<Arc<AuthError>> {
        self.last_error.clone()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn add_cleanup_task<F>(&mut self, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.cleanup_tasks.push(Box::new(task));
    }

    pub fn pending_cleanup_tasks(&self) -> usize {
        self.cleanup_tasks.len()
    }

    /// Run and drop every pending cleanup task. A failing or panicking task
    /// is logged and does not stop the rest. Returns how many tasks ran.
    pub fn execute_cleanup(&mut self) -> usize {
        let tasks = std::mem::take(&mut self.cleanup_tasks);
        let count = tasks.len();

        for task in tasks {
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(error = %error, "Cleanup task failed"),
                Err(_) => warn!("Cleanup task panicked"),
            }
        }

        count
    }

    /// Try to take the lock for `kind`. Returns false without waiting when the
    /// operation is in flight or finished within its cooldown.
    pub fn try_acquire(&mut self, kind: OperationKind) -> bool {
        let now = Instant::now();
        match kind {
            OperationKind::Initialize => self.init_lock.try_acquire(now),
            OperationKind::Refresh => self.refresh_lock.try_acquire(now),
        }
    }

    /// How long until [`try_acquire`](Self::try_acquire) for `kind` could
    /// succeed.
    pub fn retry_after(&self, kind: OperationKind) -> Duration {
        let now = Instant::now();
        match kind {
            OperationKind::Initialize => self.init_lock.retry_after(now),
            OperationKind::Refresh => self.refresh_lock.retry_after(now),
        }
    }

    /// Release the lock for `kind` and start its cooldown.
    pub fn release(&mut self, kind: OperationKind) {
        let now = Instant::now();
        match kind {
            OperationKind::Initialize => self.init_lock.release(now),
            OperationKind::Refresh => self.refresh_lock.release(now),
        }
    }

    pub fn acquire_init_lock(&mut self) -> bool {
        self.try_acquire(OperationKind::Initialize)
    }

    pub fn release_init_lock(&mut self) {
        self.release(OperationKind::Initialize)
    }

    pub fn acquire_refresh_lock(&mut self) -> bool {
        self.try_acquire(OperationKind::Refresh)
    }

    pub fn release_refresh_lock(&mut self) {
        self.release(OperationKind::Refresh)
    }

    pub fn is_in_flight(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Initialize => self.init_lock.in_flight,
            OperationKind::Refresh => self.refresh_lock.in_flight,
        }
    }
}

impl Default for AuthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthStateMachine")
            .field("current", &self.current())
            .field("history", &self.history)
            .field("cleanup_tasks", &self.cleanup_tasks.len())
            .field("last_error", &self.last_error)
            .field("init_lock", &self.init_lock)
            .field("refresh_lock", &self.refresh_lock)
            .finish()
    }
}
