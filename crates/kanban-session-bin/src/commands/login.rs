//! `login`: password sign-in.

use super::build_client;
use kanban_config_and_utils::{Config, Paths};
use tracing::info;

pub async fn run(
    config: &Config,
    paths: &Paths,
    email: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(config, paths)?;
    let session = client.sign_in_with_password(email, password).await?;

    info!(user_id = %session.user_id, expires_at = %session.expires_at, "Signed in");
    println!("Logged in as {}", session.email.as_deref().unwrap_or(email));
    println!("  User:    {}", session.user_id);
    println!("  Expires: {}", session.expires_at.to_rfc3339());
    Ok(())
}
