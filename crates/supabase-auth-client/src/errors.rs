//! Mapping of GoTrue responses and transport failures onto [`AuthError`].

use crate::types::ErrorBody;
use chrono::{DateTime, Utc};
use session_lifecycle::AuthError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

const RATE_LIMIT_CODES: &[&str] = &["over_request_rate_limit"];

const INVALID_GRANT_CODES: &[&str] = &[
    "invalid_grant",
    "refresh_token_not_found",
    "refresh_token_already_used",
    "session_not_found",
    "session_expired",
];

const INVALID_CREDENTIALS_CODES: &[&str] = &["invalid_credentials"];

/// Length plus a non-cryptographic digest, so response bodies never reach
/// the logs verbatim.
pub(crate) fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Parse a `Retry-After` header: delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Classify a non-success response.
pub fn classify_response(status: u16, retry_after: Option<Duration>, body: &str) -> AuthError {
    let parsed = ErrorBody::parse(body);
    let code = parsed.code().unwrap_or_default();
    let message = parsed
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status == 429 || RATE_LIMIT_CODES.contains(&code) {
        return AuthError::RateLimited { retry_after };
    }
    if INVALID_GRANT_CODES.contains(&code) {
        return AuthError::InvalidGrant(message);
    }
    if INVALID_CREDENTIALS_CODES.contains(&code) {
        return AuthError::InvalidCredentials(message);
    }

    AuthError::Api { status, message }
}

/// Map a transport failure to its retry class.
pub(crate) fn map_transport_error(error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        AuthError::Timeout
    } else if error.is_connect() {
        AuthError::NetworkUnavailable
    } else {
        AuthError::Network(error.to_string())
    }
}
