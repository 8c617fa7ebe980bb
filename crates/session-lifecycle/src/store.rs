//! In-memory single source of truth for the current session.

use crate::session::Session;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default window during which a stored session is considered fresh enough to
/// skip a backend round trip.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

struct StoreInner {
    session: Option<Arc<Session>>,
    updated_at: Option<Instant>,
    version: u64,
}

/// Holds the current session and notifies subscribers on every replacement.
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide
/// instance.
pub struct SessionStore {
    inner: RwLock<StoreInner>,
    freshness_window: Duration,
    tx: watch::Sender<Option<Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_freshness_window(DEFAULT_FRESHNESS_WINDOW)
    }

    pub fn with_freshness_window(freshness_window: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: RwLock::new(StoreInner {
                session: None,
                updated_at: None,
                version: 0,
            }),
            freshness_window,
            tx,
        }
    }

    /// Current session, if any.
    pub fn get(&self) -> Option<Arc<Session>> {
        self.inner.read().session.clone()
    }

    /// Replace the stored session and notify subscribers.
    pub fn set(&self, session: Option<Session>) {
        let session = session.map(Arc::new);
        {
            let mut inner = self.inner.write();
            inner.session = session.clone();
            inner.updated_at = Some(Instant::now());
            inner.version += 1;
        }
        self.tx.send_replace(session);
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// True iff a session is present and was stored within the freshness
    /// window. This is a cache check, not a token expiry check.
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.read();
        match (&inner.session, inner.updated_at) {
            (Some(_), Some(updated_at)) => updated_at.elapsed() < self.freshness_window,
            _ => false,
        }
    }

    /// Instant of the last `set`, if any.
    pub fn updated_at(&self) -> Option<Instant> {
        self.inner.read().updated_at
    }

    /// Number of `set` calls so far.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Session>>> {
        self.tx.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
