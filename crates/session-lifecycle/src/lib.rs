//! Client-side session lifecycle for the Kanban app.
//!
//! This crate provides:
//! - An in-memory session store with change notification
//! - Duplicate auth event suppression
//! - Explicit FSM-based auth state management with cleanup tasks and
//!   operation locks
//! - Proactive token refresh scheduling with bounded retry
//! - A read-only consumer view for UI code
//! - [`AuthController`], which wires all of the above to an [`AuthBackend`]

mod auth_fsm;
mod backend;
mod consumer;
mod controller;
mod debounced;
mod error;
mod event_debouncer;
mod retry;
mod scheduler;
mod session;
mod state_machine;
mod store;

pub use auth_fsm::session_machine;
pub use auth_fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState};
pub use backend::AuthBackend;
pub use consumer::{SessionConsumer, SessionView};
pub use controller::{AuthController, LifecycleConfig, DEFAULT_FOREGROUND_DEBOUNCE};
pub use debounced::Debounced;
pub use error::{AuthError, AuthResult};
pub use event_debouncer::{AuthEventDebouncer, DEFAULT_DEBOUNCE_WINDOW};
pub use retry::RetryPolicy;
pub use scheduler::{
    refresh_delay, refresh_due_at, TokenRefreshScheduler, DEFAULT_REFRESH_MARGIN,
};
pub use session::{AuthEvent, AuthEventKind, Session};
pub use state_machine::{
    AuthStateMachine, CleanupTask, OperationKind, StateTransition, DEFAULT_INIT_COOLDOWN,
    DEFAULT_REFRESH_COOLDOWN, HISTORY_CAPACITY,
};
pub use store::{SessionStore, DEFAULT_FRESHNESS_WINDOW};
