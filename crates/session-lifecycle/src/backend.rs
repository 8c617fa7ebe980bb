//! Boundary to the hosted auth provider.

use crate::error::AuthResult;
use crate::session::{AuthEvent, Session};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Auth provider operations the lifecycle depends on.
///
/// Implementations own transport and persistence. Emitted events are consumed
/// by the controller's listener; dropping the receiver unsubscribes.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session as the provider sees it, `None` when signed out.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Exchange `refresh_token` for a new session.
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session>;

    /// Subscribe to provider auth events.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;
}
