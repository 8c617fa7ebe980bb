//! `logout`: revoke server-side when possible, always forget locally.

use super::build_client;
use kanban_config_and_utils::{Config, Paths};

pub async fn run(config: &Config, paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(config, paths)?;

    if client.stored_session()?.is_none() {
        println!("Not logged in");
        return Ok(());
    }

    client.sign_out().await?;
    println!("Logged out");
    Ok(())
}
