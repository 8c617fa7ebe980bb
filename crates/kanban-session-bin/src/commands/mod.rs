//! Subcommand implementations.

pub mod login;
pub mod logout;
pub mod status;
pub mod watch;

use kanban_config_and_utils::{Config, Paths};
use session_storage::create_session_vault;
use std::sync::Arc;
use supabase_auth_client::SupabaseAuthClient;

/// Build the GoTrue client with its session persisted under `paths`.
pub fn build_client(
    config: &Config,
    paths: &Paths,
) -> Result<Arc<SupabaseAuthClient>, Box<dyn std::error::Error>> {
    let url = config.supabase_url()?;
    let project_ref = SupabaseAuthClient::project_ref(url.as_str());
    let vault = create_session_vault(&paths.session_file(), &project_ref)?;
    let client = SupabaseAuthClient::new(url.as_str(), &config.supabase_anon_key, vault)?;
    Ok(Arc::new(client))
}
