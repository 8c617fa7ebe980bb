//! Supabase GoTrue client implementing [`AuthBackend`].

use crate::errors::{
    classify_response, map_transport_error, parse_retry_after, summarize_response_body,
};
use crate::types::{PasswordRequest, RefreshRequest, TokenResponse, UserResponse};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::Serialize;
use session_lifecycle::{AuthBackend, AuthError, AuthEvent, AuthEventKind, AuthResult, Session};
use session_storage::{SessionVault, StorageError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 32;

fn storage_error(error: StorageError) -> AuthError {
    AuthError::Storage(error.to_string())
}

/// Email/password auth against a Supabase project, with the session
/// persisted in a [`SessionVault`].
pub struct SupabaseAuthClient {
    http: Client,
    supabase_url: String,
    anon_key: String,
    vault: SessionVault,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseAuthClient {
    pub fn new(supabase_url: &str, anon_key: &str, vault: SessionVault) -> AuthResult<Self> {
        let parsed = Url::parse(supabase_url)
            .map_err(|e| AuthError::Config(format!("invalid Supabase URL {}: {}", supabase_url, e)))?;
        if anon_key.trim().is_empty() {
            return Err(AuthError::Config("Supabase anon key is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {}", e)))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            http,
            supabase_url: parsed.as_str().trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            vault,
            events,
        })
    }

    /// Project reference used to namespace the persisted session, e.g.
    /// `abc123` for `https://abc123.supabase.co`.
    pub fn project_ref(supabase_url: &str) -> String {
        Url::parse(supabase_url)
            .ok()
            .and_then(|url| {
                url.host_str()
                    .and_then(|host| host.split('.').next())
                    .map(str::to_string)
            })
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn supabase_url(&self) -> &str {
        &self.supabase_url
    }

    /// Session persisted by the last sign-in or refresh.
    pub fn stored_session(&self) -> AuthResult<Option<Session>> {
        self.vault.load_session().map_err(storage_error)
    }

    /// Sign in and persist the resulting session.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        debug!(email = %email, "Attempting email/password login");

        let session = self
            .request_token("password", &PasswordRequest { email, password })
            .await
            .map_err(|e| match e {
                // Older GoTrue versions report bad passwords as invalid_grant.
                AuthError::InvalidGrant(message) => AuthError::InvalidCredentials(message),
                other => other,
            })?;

        self.vault.store_session(&session).map_err(storage_error)?;
        info!(user_id = %session.user_id, "Login successful");
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    /// Revoke the session server-side when possible and always clear it
    /// locally.
    pub async fn sign_out(&self) -> AuthResult<()> {
        if let Some(session) = self.stored_session()? {
            let url = format!("{}/auth/v1/logout", self.supabase_url);
            let result = self
                .http
                .post(&url)
                .header("apikey", &self.anon_key)
                .header("Authorization", format!("Bearer {}", session.access_token))
                .send()
                .await
                .map_err(map_transport_error);

            match result {
                Ok(response) => {
                    if let Err(e) = self.check(response, "Server logout failed").await {
                        warn!(error = %e, "Server logout rejected, clearing local session anyway");
                    }
                }
                Err(e) => warn!(error = %e, "Server logout unreachable, clearing local session anyway"),
            }
        }

        self.vault.clear_session().map_err(storage_error)?;
        info!("Logged out");
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    /// Verify `access_token` with the server.
    pub async fn get_user(&self, access_token: &str) -> AuthResult<UserResponse> {
        let url = format!("{}/auth/v1/user", self.supabase_url);
        debug!(url = %url, "Verifying session with Supabase");

        let response = self
            .http
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = match self.check(response, "Session verification failed").await {
            Ok(response) => response,
            Err(AuthError::Api {
                status: 401 | 403,
                message,
            }) => return Err(AuthError::SessionInvalid(message)),
            Err(e) => return Err(e),
        };

        let body = response.text().await.map_err(map_transport_error)?;
        let user: UserResponse = serde_json::from_str(&body)?;
        debug!(user_id = %user.id, "Session verified with server");
        Ok(user)
    }

    async fn request_token<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> AuthResult<Session> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.supabase_url, grant_type);
        debug!(url = %url, "Requesting token");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = self.check(response, "Token request failed").await?;
        let body = response.text().await.map_err(map_transport_error)?;
        let data: TokenResponse = serde_json::from_str(&body)?;
        data.into_session(Utc::now())
    }

    /// Pass successful responses through; classify the rest.
    async fn check(&self, response: Response, context: &str) -> AuthResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, Utc::now()));
        let body = response.text().await.unwrap_or_default();
        let body_summary = summarize_response_body(&body);
        warn!(status = %status, body_summary = %body_summary, "{}", context);

        Err(classify_response(status.as_u16(), retry_after, &body))
    }

    fn emit(&self, event: AuthEvent) {
        debug!(kind = %event.kind, "Emitting auth event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthBackend for SupabaseAuthClient {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.stored_session()
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        match self
            .request_token("refresh_token", &RefreshRequest { refresh_token })
            .await
        {
            Ok(session) => {
                self.vault.store_session(&session).map_err(storage_error)?;
                info!(user_id = %session.user_id, "Token refreshed successfully");
                self.emit(AuthEvent::new(
                    AuthEventKind::TokenRefreshed,
                    Some(session.clone()),
                ));
                Ok(session)
            }
            Err(e @ AuthError::InvalidGrant(_)) => {
                warn!(error = %e, "Refresh token rejected, clearing persisted session");
                self.vault.clear_session().map_err(storage_error)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
