//! Suppression of duplicate auth notifications.

use crate::session::AuthEventKind;
use std::time::Duration;
use tokio::time::Instant;

/// Default window within which an identical notification is dropped.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
struct EventKey {
    kind: AuthEventKind,
    user_id: Option<String>,
}

/// Drops exact repeats of the last `(kind, user_id)` pair seen within the
/// window. Different kinds for the same user always pass.
#[derive(Debug)]
pub struct AuthEventDebouncer {
    window: Duration,
    last: Option<(EventKey, Instant)>,
}

impl AuthEventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn should_process(&mut self, kind: AuthEventKind, user_id: Option<&str>) -> bool {
        self.should_process_at(kind, user_id, Instant::now())
    }

    /// Same as [`should_process`](Self::should_process) with an explicit clock
    /// reading. Suppressed calls do not extend the window.
    pub fn should_process_at(
        &mut self,
        kind: AuthEventKind,
        user_id: Option<&str>,
        now: Instant,
    ) -> bool {
        let key = EventKey {
            kind,
            user_id: user_id.map(str::to_string),
        };

        if let Some((last_key, seen_at)) = &self.last {
            if *last_key == key && now.saturating_duration_since(*seen_at) < self.window {
                return false;
            }
        }

        self.last = Some((key, now));
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for AuthEventDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}
