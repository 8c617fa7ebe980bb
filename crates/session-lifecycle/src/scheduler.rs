//! Single pending timer that fires a token refresh ahead of expiry.

use crate::session::Session;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long before expiry a refresh is due.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Instant at which a session expiring at `expires_at` is due for refresh.
pub fn refresh_due_at(expires_at: DateTime<Utc>, margin: Duration) -> Option<DateTime<Utc>> {
    let margin = chrono::Duration::from_std(margin).ok()?;
    expires_at.checked_sub_signed(margin)
}

/// Time from `now` until the refresh is due, zero when already due.
pub fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> Duration {
    refresh_due_at(expires_at, margin)
        .and_then(|due_at| (due_at - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

struct SchedulerState {
    handle: Option<JoinHandle<()>>,
    generation: u64,
    next_refresh_at: Option<DateTime<Utc>>,
    alive: bool,
}

/// Owns at most one pending refresh timer.
///
/// Cloning shares the same timer slot.
#[derive(Clone)]
pub struct TokenRefreshScheduler {
    margin: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl TokenRefreshScheduler {
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            state: Arc::new(Mutex::new(SchedulerState {
                handle: None,
                generation: 0,
                next_refresh_at: None,
                alive: true,
            })),
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Arm a timer for `session`, replacing any outstanding one.
    ///
    /// `on_due` runs once when the timer fires, provided the scheduler is
    /// still alive and no later `schedule` or `cancel` superseded it. Returns
    /// the computed delay, or `None` after [`shutdown`](Self::shutdown).
    pub fn schedule<F, Fut>(&self, session: &Session, on_due: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = refresh_delay(session.expires_at, Utc::now(), self.margin);
        let due_at = refresh_due_at(session.expires_at, self.margin);
        let armed = self.arm(delay, due_at, on_due)?;
        info!(
            user_id = %session.user_id,
            delay_secs = armed.as_secs(),
            "Token refresh scheduled"
        );
        Some(armed)
    }

    /// Arm a timer that fires after a fixed `delay`, replacing any
    /// outstanding one. Same firing rules as [`schedule`](Self::schedule).
    pub fn schedule_in<F, Fut>(&self, delay: Duration, on_due: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay));
        let armed = self.arm(delay, due_at, on_due)?;
        debug!(delay_ms = armed.as_millis() as u64, "Token refresh retry scheduled");
        Some(armed)
    }

    fn arm<F, Fut>(
        &self,
        delay: Duration,
        due_at: Option<DateTime<Utc>>,
        on_due: F,
    ) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if !state.alive {
            debug!("Scheduler shut down, ignoring refresh schedule");
            return None;
        }

        if let Some(previous) = state.handle.take() {
            previous.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        state.next_refresh_at = due_at;

        let shared = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = shared.lock();
                if !state.alive || state.generation != generation {
                    return;
                }
                // Detach so a reschedule from inside `on_due` cannot abort us.
                state.handle = None;
                state.next_refresh_at = None;
            }
            debug!("Token refresh timer fired");
            on_due().await;
        });
        state.handle = Some(handle);
        Some(delay)
    }

    /// Cancel the pending timer. Returns false when nothing was armed.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        state.generation += 1;
        state.next_refresh_at = None;
        match state.handle.take() {
            Some(handle) => {
                handle.abort();
                debug!("Token refresh timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel and refuse further scheduling.
    pub fn shutdown(&self) {
        self.state.lock().alive = false;
        self.cancel();
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// When the armed timer is due, if one is armed.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().next_refresh_at
    }
}

impl Default for TokenRefreshScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session_expiring_in(secs: i64) -> Session {
        Session::new(
            "user-1",
            "access",
            "refresh",
            Utc::now() + chrono::Duration::seconds(secs),
        )
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_refresh_delay_is_expiry_minus_margin() {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(3600);
        assert_eq!(
            refresh_delay(expires_at, now, DEFAULT_REFRESH_MARGIN),
            Duration::from_secs(3300)
        );
    }

    #[test]
    fn test_refresh_delay_clamps_to_zero() {
        let now = Utc::now();
        let inside_margin = now + chrono::Duration::seconds(120);
        let expired = now - chrono::Duration::seconds(10);

        assert_eq!(refresh_delay(inside_margin, now, DEFAULT_REFRESH_MARGIN), Duration::ZERO);
        assert_eq!(refresh_delay(expired, now, DEFAULT_REFRESH_MARGIN), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_expiry_minus_margin() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let delay = scheduler
            .schedule(&session_expiring_in(3600), move || async move {
                let _ = tx.send(());
            })
            .unwrap();
        assert!(delay <= Duration::from_secs(3300));
        assert!(delay > Duration::from_secs(3299));
        assert!(scheduler.is_armed());
        assert!(scheduler.next_refresh_at().is_some());

        tokio::time::advance(Duration::from_secs(3299)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(rx.try_recv().is_ok());
        assert!(!scheduler.is_armed());
        assert!(scheduler.next_refresh_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_inside_margin_fires_immediately() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let delay = scheduler
            .schedule(&session_expiring_in(60), move || async move {
                let _ = tx.send(());
            })
            .unwrap();

        assert_eq!(delay, Duration::ZERO);
        settle().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        scheduler.schedule(&session_expiring_in(600), move || async move {
            let _ = first.send("first");
        });
        scheduler.schedule(&session_expiring_in(3600), move || async move {
            let _ = tx.send("second");
        });

        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(3000)).await;
        settle().await;
        assert_eq!(rx.try_recv().unwrap(), "second");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_in_fires_after_fixed_delay() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        scheduler.schedule(&session_expiring_in(3600), move || async move {
            let _ = first.send("expiry");
        });
        let delay = scheduler
            .schedule_in(Duration::from_millis(750), move || async move {
                let _ = tx.send("retry");
            })
            .unwrap();
        assert_eq!(delay, Duration::from_millis(750));
        assert!(scheduler.is_armed());

        tokio::time::advance(Duration::from_millis(749)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(rx.try_recv().unwrap(), "retry");
        assert!(!scheduler.is_armed());

        tokio::time::advance(Duration::from_secs(3600)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        scheduler.schedule(&session_expiring_in(600), move || async move {
            let _ = tx.send(());
        });

        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        assert!(!scheduler.is_armed());

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ignores_later_schedules() {
        let scheduler = TokenRefreshScheduler::default();
        scheduler.shutdown();

        let armed = scheduler.schedule(&session_expiring_in(600), || async {});
        assert!(armed.is_none());
        assert!(!scheduler.is_armed());
        assert!(!scheduler.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_from_callback_keeps_chain() {
        let scheduler = TokenRefreshScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let chained = scheduler.clone();
        scheduler.schedule(&session_expiring_in(60), move || async move {
            chained.schedule(&session_expiring_in(3600), || async {});
            let _ = tx.send(());
        });

        settle().await;
        assert!(rx.try_recv().is_ok());
        assert!(scheduler.is_armed());
    }
}
