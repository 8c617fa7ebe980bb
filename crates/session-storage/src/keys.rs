//! Storage key constants.

/// Storage keys used by the session client
pub struct StorageKeys;

impl StorageKeys {
    /// Supabase session (JSON)
    pub const SUPABASE_SESSION: &'static str = "supabase_session";

    /// Key for the session of one Supabase project.
    pub fn session_for_project(project_ref: &str) -> String {
        format!("{}.{}", Self::SUPABASE_SESSION, project_ref)
    }
}
