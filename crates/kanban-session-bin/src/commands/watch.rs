//! `watch`: run the lifecycle controller and report every view change.

use super::build_client;
use kanban_config_and_utils::{Config, Paths};
use session_lifecycle::{AuthBackend, AuthController, SessionStore, SessionView};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn run(
    config: &Config,
    paths: &Paths,
    revalidate_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = build_client(config, paths)?;
    let backend: Arc<dyn AuthBackend> = client;
    let store = Arc::new(SessionStore::with_freshness_window(
        config.session.freshness_window(),
    ));
    let controller = AuthController::new(backend, store, config.session.lifecycle_config());

    // Subscribed before start so the first change is never missed.
    let mut consumer = controller.consumer();
    let state = controller.start().await?;
    info!(state = ?state, "Session watcher started");

    let mut revalidate = revalidate_secs
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));
    if let Some(interval) = revalidate.as_mut() {
        // The first tick completes immediately.
        interval.tick().await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            view = consumer.changed() => {
                match view {
                    Some(view) => report(&view),
                    None => break,
                }
            }
            _ = async {
                match revalidate.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending::<tokio::time::Instant>().await,
                }
            } => {
                controller.notify_foreground();
            }
        }
    }

    controller.shutdown();
    Ok(())
}

fn report(view: &SessionView) {
    let line = serde_json::json!({
        "state": view.state,
        "loading": view.loading,
        "user_id": view.user_id(),
        "expires_at": view.session.as_ref().map(|s| s.expires_at),
    });
    println!("{}", line);
}
