//! `status`: print the stored session without touching its tokens.

use super::build_client;
use chrono::Utc;
use kanban_config_and_utils::{Config, Paths};
use session_lifecycle::{refresh_due_at, AuthError, AuthState, Session};
use std::time::Duration;
use tracing::warn;

pub async fn run(
    config: &Config,
    paths: &Paths,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(config, paths)?;
    let session = client.stored_session()?;
    let margin = Duration::from_secs(config.session.refresh_margin_secs);

    let mut report = describe(session.as_ref(), margin);

    if verify {
        if let Some(session) = &session {
            let verified = match client.get_user(&session.access_token).await {
                Ok(user) => serde_json::json!({ "ok": true, "user_id": user.id }),
                Err(AuthError::SessionInvalid(reason)) => {
                    serde_json::json!({ "ok": false, "reason": reason })
                }
                Err(e) => {
                    warn!(error = %e, "Session verification failed");
                    serde_json::json!({ "ok": false, "reason": e.to_string() })
                }
            };
            report["verified"] = verified;
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn describe(session: Option<&Session>, margin: Duration) -> serde_json::Value {
    let Some(session) = session else {
        return serde_json::json!({
            "authenticated": false,
            "state": AuthState::Unauthenticated,
        });
    };

    let now = Utc::now();
    let state = if session.is_expired_at(now) {
        AuthState::TokenRefreshNeeded
    } else {
        AuthState::Authenticated
    };

    serde_json::json!({
        "authenticated": state == AuthState::Authenticated,
        "state": state,
        "user_id": session.user_id,
        "email": session.email,
        "expires_at": session.expires_at,
        "expires_in_secs": (session.expires_at - now).num_seconds().max(0),
        "refresh_due_at": refresh_due_at(session.expires_at, margin),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_without_session() {
        let report = describe(None, Duration::from_secs(300));
        assert_eq!(report["authenticated"], false);
        assert_eq!(report["state"], "unauthenticated");
        assert!(report.get("user_id").is_none());
    }

    #[test]
    fn describe_live_session_hides_tokens() {
        let expires_at = Utc::now() + chrono::Duration::seconds(3600);
        let session = Session::new("user-1", "access-secret", "refresh-secret", expires_at)
            .with_email("a@example.com");

        let report = describe(Some(&session), Duration::from_secs(300));
        assert_eq!(report["authenticated"], true);
        assert_eq!(report["state"], "authenticated");
        assert_eq!(report["user_id"], "user-1");

        let text = report.to_string();
        assert!(!text.contains("access-secret"));
        assert!(!text.contains("refresh-secret"));
    }

    #[test]
    fn describe_expired_session_needs_refresh() {
        let expires_at = Utc::now() - chrono::Duration::seconds(10);
        let session = Session::new("user-1", "a", "r", expires_at);

        let report = describe(Some(&session), Duration::from_secs(300));
        assert_eq!(report["authenticated"], false);
        assert_eq!(report["state"], "token_refresh_needed");
        assert_eq!(report["expires_in_secs"], 0);
    }
}
