//! Authentication state allow-list using rust-fsm.
//!
//! Every legal transition is declared once, here. Each input is named after
//! the state it leads into, so a requested target state maps to exactly one
//! input and the machine decides whether that input is legal from the current
//! state.
//!
//! ## State Diagram
//!
//! ```text
//! Idle ──Initialize──► Initializing ──Authenticate──► Authenticated ◄──────────┐
//!                           │                           │     │               │
//!                        SignOut                    SignOut  RequireRefresh   │
//!                           ▼                           │     ▼               │
//!                    Unauthenticated ◄──────────────────┘  TokenRefreshNeeded │
//!                      ▲        │                             │               │
//!                      │    Initialize                   StartRefresh    Authenticate
//!                   SignOut     ▼                             ▼               │
//!                      │    Initializing               TokenRefreshing ───────┘
//!                      │                                 │        ▲
//!               TokenRefreshFailed ◄────FailRefresh──────┘        │
//!                      └──────────────StartRefresh────────────────┘
//!
//! Fail leads to Error from every state except Error itself.
//! Error ──Reset──► Idle
//! Error ──SignOut──► Unauthenticated
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

// Generates a module `session_machine` with:
// - session_machine::State (enum)
// - session_machine::Input (enum)
// - session_machine::StateMachine (type alias)
// - session_machine::Impl (trait impl)
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Idle)

    Idle => {
        Initialize => Initializing,
        Fail => Error
    },
    Initializing => {
        Authenticate => Authenticated,
        SignOut => Unauthenticated,
        Fail => Error
    },
    Authenticated => {
        RequireRefresh => TokenRefreshNeeded,
        SignOut => Unauthenticated,
        Fail => Error
    },
    TokenRefreshNeeded => {
        StartRefresh => TokenRefreshing,
        Fail => Error
    },
    TokenRefreshing => {
        Authenticate => Authenticated,
        FailRefresh => TokenRefreshFailed,
        Fail => Error
    },
    TokenRefreshFailed => {
        StartRefresh => TokenRefreshing,
        SignOut => Unauthenticated,
        Fail => Error
    },
    Unauthenticated => {
        Initialize => Initializing,
        Fail => Error
    },
    Error => {
        Reset => Idle,
        SignOut => Unauthenticated
    }
}

pub use session_machine::Input as AuthMachineInput;
pub use session_machine::State as AuthMachineState;
pub use session_machine::StateMachine as AuthMachine;

/// Canonical authentication state exposed to the rest of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Idle,
    Initializing,
    Authenticated,
    Unauthenticated,
    TokenRefreshNeeded,
    TokenRefreshing,
    TokenRefreshFailed,
    Error,
}

impl AuthState {
    pub const ALL: [AuthState; 8] = [
        AuthState::Idle,
        AuthState::Initializing,
        AuthState::Authenticated,
        AuthState::Unauthenticated,
        AuthState::TokenRefreshNeeded,
        AuthState::TokenRefreshing,
        AuthState::TokenRefreshFailed,
        AuthState::Error,
    ];

    /// Returns true if the user holds a usable session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// Returns true while a refresh cycle is underway.
    pub fn is_refreshing(&self) -> bool {
        matches!(
            self,
            AuthState::TokenRefreshNeeded
                | AuthState::TokenRefreshing
                | AuthState::TokenRefreshFailed
        )
    }

    /// The machine input that leads into this state.
    pub fn input(self) -> AuthMachineInput {
        match self {
            AuthState::Idle => AuthMachineInput::Reset,
            AuthState::Initializing => AuthMachineInput::Initialize,
            AuthState::Authenticated => AuthMachineInput::Authenticate,
            AuthState::Unauthenticated => AuthMachineInput::SignOut,
            AuthState::TokenRefreshNeeded => AuthMachineInput::RequireRefresh,
            AuthState::TokenRefreshing => AuthMachineInput::StartRefresh,
            AuthState::TokenRefreshFailed => AuthMachineInput::FailRefresh,
            AuthState::Error => AuthMachineInput::Fail,
        }
    }

    /// Returns true if `self -> to` is in the allow-list.
    pub fn can_transition_to(self, to: AuthState) -> bool {
        let from = AuthMachineState::from(self);
        <session_machine::Impl as StateMachineImpl>::transition(&from, &to.input())
            .map(|next| AuthState::from(&next) == to)
            .unwrap_or(false)
    }

    /// Shortest legal route from `self` to `target`, excluding `self`.
    ///
    /// Routes never pass through `Authenticated` on the way somewhere else
    /// unless that is the only way to get there. Returns an empty route when
    /// already there and `None` when `target` is unreachable.
    pub fn path_to(self, target: AuthState) -> Option<Vec<AuthState>> {
        self.shortest_path(target, Some(AuthState::Authenticated))
            .or_else(|| self.shortest_path(target, None))
    }

    fn shortest_path(self, target: AuthState, avoid: Option<AuthState>) -> Option<Vec<AuthState>> {
        if self == target {
            return Some(Vec::new());
        }

        let mut previous: HashMap<AuthState, AuthState> = HashMap::new();
        let mut queue = VecDeque::from([self]);

        while let Some(state) = queue.pop_front() {
            for next in AuthState::ALL {
                if next == self || previous.contains_key(&next) {
                    continue;
                }
                if Some(next) == avoid && next != target {
                    continue;
                }
                if !state.can_transition_to(next) {
                    continue;
                }
                previous.insert(next, state);
                if next == target {
                    let mut route = vec![target];
                    let mut cursor = target;
                    while let Some(&prev) = previous.get(&cursor) {
                        if prev == self {
                            break;
                        }
                        route.push(prev);
                        cursor = prev;
                    }
                    route.reverse();
                    return Some(route);
                }
                queue.push_back(next);
            }
        }

        None
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Idle => AuthState::Idle,
            AuthMachineState::Initializing => AuthState::Initializing,
            AuthMachineState::Authenticated => AuthState::Authenticated,
            AuthMachineState::Unauthenticated => AuthState::Unauthenticated,
            AuthMachineState::TokenRefreshNeeded => AuthState::TokenRefreshNeeded,
            AuthMachineState::TokenRefreshing => AuthState::TokenRefreshing,
            AuthMachineState::TokenRefreshFailed => AuthState::TokenRefreshFailed,
            AuthMachineState::Error => AuthState::Error,
        }
    }
}

impl From<AuthState> for AuthMachineState {
    fn from(state: AuthState) -> Self {
        match state {
            AuthState::Idle => AuthMachineState::Idle,
            AuthState::Initializing => AuthMachineState::Initializing,
            AuthState::Authenticated => AuthMachineState::Authenticated,
            AuthState::Unauthenticated => AuthMachineState::Unauthenticated,
            AuthState::TokenRefreshNeeded => AuthMachineState::TokenRefreshNeeded,
            AuthState::TokenRefreshing => AuthMachineState::TokenRefreshing,
            AuthState::TokenRefreshFailed => AuthMachineState::TokenRefreshFailed,
            AuthState::Error => AuthMachineState::Error,
        }
    }
}
