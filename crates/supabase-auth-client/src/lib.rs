//! Supabase GoTrue backend for the session lifecycle.
//!
//! Talks to `/auth/v1/token`, `/auth/v1/user` and `/auth/v1/logout`,
//! persists the session through `session-storage`, and emits provider events
//! for the lifecycle controller.

mod client;
mod errors;
mod types;

pub use client::SupabaseAuthClient;
pub use errors::{classify_response, parse_retry_after};
pub use types::{jwt_expiry, UserResponse};
