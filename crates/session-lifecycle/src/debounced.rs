//! Trailing-edge debounce over an async action.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Pending {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Runs an action once, `delay` after the last [`invoke`](Self::invoke).
///
/// At most one timer is pending at any time. Dropping the value does not
/// cancel it; call [`cancel`](Self::cancel) on teardown.
pub struct Debounced {
    delay: Duration,
    action: Action,
    pending: Arc<Mutex<Pending>>,
}

impl Debounced {
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            delay,
            action: Arc::new(action),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the timer.
    pub fn invoke(&self) {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.handle.take() {
            previous.abort();
        }
        pending.generation += 1;
        let generation = pending.generation;

        let delay = self.delay;
        let action = Arc::clone(&self.action);
        let slot = Arc::clone(&self.pending);
        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = slot.lock();
                if pending.generation != generation {
                    return;
                }
                pending.handle = None;
            }
            trace!("Debounced action firing");
            action().await;
        }));
    }

    /// Drop the pending run. Returns false when nothing was pending.
    pub fn cancel(&self) -> bool {
        let mut pending = self.pending.lock();
        pending.generation += 1;
        match pending.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Run the pending action now instead of waiting. Returns false when
    /// nothing was pending.
    pub async fn flush(&self) -> bool {
        if !self.cancel() {
            return false;
        }
        (self.action)().await;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().handle.is_some()
    }
}
