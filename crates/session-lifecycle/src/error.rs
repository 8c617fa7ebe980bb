//! Authentication error types.

use crate::auth_fsm::AuthState;
use std::time::Duration;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Refresh token rejected by the provider (revoked, reused, expired)
    #[error("Refresh token rejected: {0}")]
    InvalidGrant(String),

    /// Provider asked us to slow down
    #[error("Rate limited by auth provider")]
    RateLimited {
        /// Delay indicated by the provider, when it sent one.
        retry_after: Option<Duration>,
    },

    /// Non-success response that matched no more specific variant
    #[error("Auth API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// Retries exhausted for an operation cycle
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        last: Box<AuthError>,
    },

    /// Session not found
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session expired and refresh failed
    #[error("Session expired")]
    SessionExpired,

    /// Session was invalidated server-side (revoked, logged out elsewhere, etc.)
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Transition not present in the auth state allow-list
    #[error("Invalid auth state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: AuthState, to: AuthState },

    /// Persisted session storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport-level failure that is not a connect error or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning controller was torn down before the result could be applied
    #[error("Operation cancelled")]
    Cancelled,
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network unavailable
    /// - Connection timeouts
    /// - HTTP errors with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkUnavailable => true,
            AuthError::Timeout => true,
            AuthError::Network(_) => true,
            AuthError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the provider signalled rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            AuthError::RateLimited { .. } | AuthError::Api { status: 429, .. }
        )
    }

    /// Provider-indicated retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns true if a retry policy should attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || self.is_rate_limited()
    }

    /// Returns true if the current session can no longer be used and the user
    /// must authenticate again.
    pub fn ends_session(&self) -> bool {
        match self {
            AuthError::InvalidGrant(_)
            | AuthError::SessionInvalid(_)
            | AuthError::SessionExpired
            | AuthError::NotLoggedIn => true,
            AuthError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_network_unavailable() {
        assert!(AuthError::NetworkUnavailable.is_transient());
    }

    #[test]
    fn test_is_transient_timeout() {
        assert!(AuthError::Timeout.is_transient());
    }

    #[test]
    fn test_is_transient_server_error_only() {
        let server = AuthError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        let client = AuthError::Api {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
    }

    #[test]
    fn test_rate_limited_variants() {
        let explicit = AuthError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
        };
        let by_status = AuthError::Api {
            status: 429,
            message: "slow down".to_string(),
        };

        assert!(explicit.is_rate_limited());
        assert!(by_status.is_rate_limited());
        assert!(explicit.is_retryable());
        assert_eq!(explicit.retry_after(), Some(Duration::from_secs(4)));
        assert_eq!(by_status.retry_after(), None);
    }

    #[test]
    fn test_invalid_grant_is_terminal() {
        let err = AuthError::InvalidGrant("Invalid Refresh Token".to_string());
        assert!(!err.is_retryable());
        assert!(err.ends_session());
    }

    #[test]
    fn test_is_not_transient_invalid_credentials() {
        assert!(!AuthError::InvalidCredentials("bad password".to_string()).is_transient());
    }

    #[test]
    fn test_exhausted_keeps_last_error_as_source() {
        use std::error::Error;

        let err = AuthError::RetriesExhausted {
            operation: "token refresh",
            attempts: 3,
            last: Box::new(AuthError::NetworkUnavailable),
        };
        assert!(err.ends_session());
        assert!(!err.is_retryable());
        assert_eq!(err.source().map(|s| s.to_string()), Some("Network unavailable".to_string()));
    }
}
