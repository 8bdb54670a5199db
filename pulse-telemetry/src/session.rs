//! Session state: connection status, auth token, and observer fan-out.
//!
//! ```text
//! TelemetryClient ──set_status()──► SessionState ──┬──► status-bar widget
//!                                   (one mutex,    ├──► login panel
//!                  ──set_token()──► status+token)  └──► auto-open trigger
//!                                        │
//!                                        ▼
//!                                   TokenStore (persisted first,
//!                                               memory second)
//! ```
//!
//! Observers are notified synchronously, in registration order, on the
//! thread that mutated the status. A panicking observer is logged and
//! skipped; the remaining observers still run and the stored status is
//! already committed by the time any of them sees it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::token::TokenStore;

/// The application-level view of the connection.
///
/// Socket-open alone is not [`Connected`](ConnectionStatus::Connected);
/// that state is only entered once the handshake completes (`init` or a
/// successful `auth`/`login` response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; manual connect/login required.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StatusObserver = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Status and token under a single lock, so readers always see a
/// consistent (status, token) pair.
struct SessionInner {
    status: ConnectionStatus,
    token: Option<String>,
}

/// Owned session state with an explicit observer list — never a global.
pub struct SessionState {
    inner: Mutex<SessionInner>,
    observers: Mutex<Vec<StatusObserver>>,
    store: Arc<dyn TokenStore>,
}

impl SessionState {
    /// Create session state backed by `store`; any previously persisted
    /// token is loaded immediately.
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let token = store.load();
        Self {
            inner: Mutex::new(SessionInner {
                status: ConnectionStatus::Disconnected,
                token,
            }),
            observers: Mutex::new(Vec::new()),
            store,
        }
    }

    /// Register a status observer. Observers cannot be removed; they live
    /// until the session is dropped.
    pub fn add_observer(&self, observer: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Update the status and fan out to every observer in registration
    /// order. The stored value is committed before the first callback runs.
    pub fn set_status(&self, status: ConnectionStatus) {
        // No dedup: "connecting" is deliberately re-announced per retry attempt.
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.status = status;
        }
        // Snapshot outside the lock so observers may re-enter the session.
        let observers: Vec<StatusObserver> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(status))).is_err() {
                log::warn!("status observer panicked; continuing fan-out");
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Replace the token: persisted through the store first, then committed
    /// to memory. `None` clears it (logout).
    pub fn set_token(&self, token: Option<String>) {
        self.store.save(token.as_deref());
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).token = token;
    }

    pub fn token(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .token
            .is_some()
    }

    /// Consistent (status, token) pair read under one lock.
    pub fn snapshot(&self) -> (ConnectionStatus, Option<String>) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.status, inner.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::MemoryTokenStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session() -> SessionState {
        SessionState::new(Arc::new(MemoryTokenStore::new()))
    }

    #[test]
    fn test_initial_state() {
        let s = session();
        assert_eq!(s.status(), ConnectionStatus::Disconnected);
        assert_eq!(s.token(), None);
        assert!(!s.has_token());
    }

    #[test]
    fn test_loads_persisted_token_on_creation() {
        let store = Arc::new(MemoryTokenStore::with_token("saved"));
        let s = SessionState::new(store);
        assert_eq!(s.token(), Some("saved".to_string()));
    }

    #[test]
    fn test_observers_notified_in_registration_order() {
        let s = session();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            s.add_observer(move |status| {
                order.lock().unwrap().push((tag, status));
            });
        }

        s.set_status(ConnectionStatus::Connecting);
        let seen = order.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("first", ConnectionStatus::Connecting),
                ("second", ConnectionStatus::Connecting),
                ("third", ConnectionStatus::Connecting),
            ]
        );
    }

    #[test]
    fn test_panicking_observer_does_not_stop_fanout() {
        let s = session();
        let reached = Arc::new(AtomicUsize::new(0));

        s.add_observer(|_| panic!("observer bug"));
        {
            let reached = reached.clone();
            s.add_observer(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        s.set_status(ConnectionStatus::Connected);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        // Stored status survived the panic.
        assert_eq!(s.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_status_committed_before_observers_run() {
        let store = Arc::new(MemoryTokenStore::new());
        let s = Arc::new(SessionState::new(store));
        let seen = Arc::new(Mutex::new(None));

        {
            let s2 = s.clone();
            let seen = seen.clone();
            s.add_observer(move |status| {
                // Re-entrant read must already see the new value.
                *seen.lock().unwrap() = Some((status, s2.status()));
            });
        }

        s.set_status(ConnectionStatus::Connecting);
        assert_eq!(
            *seen.lock().unwrap(),
            Some((ConnectionStatus::Connecting, ConnectionStatus::Connecting))
        );
    }

    #[test]
    fn test_token_written_through_store() {
        let store = Arc::new(MemoryTokenStore::new());
        let s = SessionState::new(store.clone());

        s.set_token(Some("tok".to_string()));
        assert_eq!(store.load(), Some("tok".to_string()));
        assert_eq!(s.token(), Some("tok".to_string()));

        s.set_token(None);
        assert_eq!(store.load(), None);
        assert!(!s.has_token());
    }

    #[test]
    fn test_snapshot_is_consistent_pair() {
        let s = session();
        s.set_token(Some("tok".to_string()));
        s.set_status(ConnectionStatus::Connected);

        let (status, token) = s.snapshot();
        assert_eq!(status, ConnectionStatus::Connected);
        assert_eq!(token, Some("tok".to_string()));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
