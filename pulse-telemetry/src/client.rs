//! WebSocket connection manager for the telemetry collector.
//!
//! Owns the one live connection, the login-or-resume handshake, inbound
//! dispatch, and recovery from unexpected closes.
//!
//! ```text
//! editor hook ──send(Change)──┐
//! login panel ──login()───────┤
//!                             ▼
//!                      TelemetryClient ──JSON frames──► collector
//!                        │        │
//!          SessionState ◄┘        └─► TelemetryEvent channel
//!          (status fan-out)           (dashboard / error notices)
//!
//!   reader task: decode + dispatch inbound, detect close
//!   writer task: drain the outbound queue into the socket
//!   retry task:  jittered backoff redial, aborted on logout/dispose
//! ```
//!
//! All I/O runs on spawned Tokio tasks; `connect()` and `send()` return
//! immediately and report outcomes through the session observers and the
//! event channel. Methods must be called from within a Tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::capture::Workstation;
use crate::protocol::{EncodeError, InboundResponse, OutboundRequest, ResponseKind};
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::session::{ConnectionStatus, SessionState};
use crate::token::TokenStore;

/// Production collector endpoint. Fixed URI, no path parameters.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.pulse.dev";

/// Frames buffered between `send()` and the writer task.
const OUTBOUND_QUEUE: usize = 256;

/// UI events buffered until the host drains them.
const EVENT_QUEUE: usize = 64;

/// UI-facing signals that are not plain status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// Session is authenticated: reveal the web dashboard. May arrive
    /// repeatedly; opening an already-visible dashboard is a no-op.
    OpenDashboard,
    /// The server rejected the login/auth handshake. The connection stays
    /// open for another login attempt; a stored token is left untouched.
    AuthFailed { message: String },
    /// Every reconnect attempt failed. Terminal for this session — only a
    /// manual `connect()`/`login()` recovers.
    ReconnectFailed { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum SendError {
    /// No live connection, or a `Change` was attempted without a token.
    #[error("not connected to the collector")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The outbound queue is full; the frame was dropped, not queued.
    #[error("outbound queue full")]
    Backpressure,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("email and password must not be blank")]
    BlankCredentials,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket connect failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Client configuration. Defaults target the production collector.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub workstation: Workstation,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            workstation: Workstation::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// The one live socket session. At most one exists per client; the `id`
/// lets close notifications from a superseded connection be ignored.
struct Connection {
    id: Uuid,
    outgoing: mpsc::Sender<Message>,
    opened_at: Instant,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

/// State shared between the client handle and its background tasks.
struct Shared {
    config: ClientConfig,
    session: Arc<SessionState>,
    conn: Mutex<Option<Connection>>,
    /// Single-flight guard: one dial at a time.
    connecting: AtomicBool,
    policy: Mutex<ReconnectPolicy>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    /// Cleared by logout/dispose before the socket is torn down, so the
    /// resulting close cannot schedule a retry.
    retry_enabled: AtomicBool,
    disposed: AtomicBool,
    event_tx: mpsc::Sender<TelemetryEvent>,
}

/// Clears the single-flight flag even if the dial future is aborted.
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Connection/session manager for one collector endpoint.
pub struct TelemetryClient {
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<TelemetryEvent>>,
}

impl TelemetryClient {
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let session = Arc::new(SessionState::new(store));
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                session,
                conn: Mutex::new(None),
                connecting: AtomicBool::new(false),
                policy: Mutex::new(policy),
                retry_task: Mutex::new(None),
                retry_enabled: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                event_tx,
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Default configuration against the production endpoint.
    pub fn with_defaults(store: Arc<dyn TokenStore>) -> Self {
        Self::new(ClientConfig::default(), store)
    }

    /// Take the UI event receiver (can only be taken once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<TelemetryEvent>> {
        self.event_rx.take()
    }

    /// Open a connection to the collector and run the handshake.
    ///
    /// Non-blocking: the dial happens on a spawned task. After the socket
    /// opens, a stored token is resumed with `auth`; otherwise
    /// `initial` (typically a login) is sent; otherwise the client waits
    /// for the server's unsolicited `init`.
    ///
    /// A call while another dial is in flight is a no-op. A dial that
    /// fails before the socket ever opens does not schedule retries —
    /// recovery is reserved for sessions that were actually live.
    pub fn connect(&self, initial: Option<OutboundRequest>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = Shared::establish(&shared, initial).await {
                log::warn!("connect to {} failed: {e}", shared.config.endpoint);
                shared.session.set_status(ConnectionStatus::Disconnected);
            }
        });
    }

    /// Validate credentials and connect with a login handshake.
    pub fn login(&self, email: &str, password: &str) -> Result<(), LoginError> {
        if email.trim().is_empty() || password.trim().is_empty() {
            return Err(LoginError::BlankCredentials);
        }
        self.connect(Some(OutboundRequest::login(email, password)));
        Ok(())
    }

    /// Clear the token, tear down the connection, and stop recovering.
    ///
    /// The reconnection path is disabled before the socket closes, so the
    /// close this triggers never schedules a retry.
    pub fn logout(&self) {
        self.shared.retry_enabled.store(false, Ordering::SeqCst);
        Shared::cancel_retry(&self.shared);
        self.shared
            .policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.shared.session.set_token(None);
        Shared::drop_connection(&self.shared);
        self.shared.session.set_status(ConnectionStatus::Disconnected);
        log::info!("logged out");
    }

    /// Serialize and hand the request to the writer task.
    ///
    /// Never blocks: the frame is queued or the call fails. A `Change` is
    /// refused unless the connection is live AND a token is held — the
    /// socket may have died since the caller last looked.
    pub fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
        let outgoing = {
            let conn = self.shared.conn.lock().unwrap_or_else(|e| e.into_inner());
            let conn = conn.as_ref().ok_or(SendError::NotConnected)?;
            if matches!(request, OutboundRequest::Change { .. })
                && !self.shared.session.has_token()
            {
                return Err(SendError::NotConnected);
            }
            conn.outgoing.clone()
        };
        let text = request.encode()?;
        outgoing
            .try_send(Message::text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
            })
    }

    /// Live connection AND token present — the gate the edit-capture hook
    /// checks before building change events.
    pub fn is_connected(&self) -> bool {
        let live = self
            .shared
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        live && self.shared.session.has_token()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.session.status()
    }

    pub fn token(&self) -> Option<String> {
        self.shared.session.token()
    }

    /// Shared session state, for observer registration.
    pub fn session(&self) -> Arc<SessionState> {
        self.shared.session.clone()
    }

    /// Human-readable status block (status dialogs, tooltips).
    pub fn status_summary(&self) -> String {
        let uptime = self
            .shared
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.opened_at.elapsed());
        let status = self.shared.session.status();
        let ws = &self.shared.config.workstation;
        let status_line = match uptime {
            Some(up) => format!("Status: {status} (up {}s)", up.as_secs()),
            None => format!("Status: {status}"),
        };
        format!(
            "{status_line}\nDevice: {}\nEnvironment: {}",
            ws.computer_name, ws.environment
        )
    }

    /// Tear everything down: close the connection, cancel any pending or
    /// in-flight reconnection, release tasks. Safe to call repeatedly.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.retry_enabled.store(false, Ordering::SeqCst);
        Shared::cancel_retry(&self.shared);
        Shared::drop_connection(&self.shared);
        log::debug!("telemetry client disposed");
    }
}

impl Shared {
    /// Dial the collector and install reader/writer tasks. Single-flight;
    /// a concurrent call returns `Ok` without dialing.
    async fn establish(
        shared: &Arc<Shared>,
        initial: Option<OutboundRequest>,
    ) -> Result<(), ConnectError> {
        if shared.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if shared
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("connect already in flight; ignoring");
            return Ok(());
        }
        let _guard = ConnectGuard(&shared.connecting);

        shared.session.set_status(ConnectionStatus::Connecting);
        shared.retry_enabled.store(true, Ordering::SeqCst);
        // A superseded connection is torn down before the new dial.
        Shared::drop_connection(shared);

        let (ws, _response) =
            tokio_tungstenite::connect_async(shared.config.endpoint.as_str()).await?;
        log::info!("socket open to {}", shared.config.endpoint);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let conn_id = Uuid::new_v4();

        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sink.send(frame).await.is_err() {
                    // The reader observes the close and drives recovery.
                    break;
                }
            }
        });

        {
            let mut slot = shared.conn.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(Connection {
                id: conn_id,
                outgoing: out_tx.clone(),
                opened_at: Instant::now(),
                writer,
                reader: None,
            });
        }

        let reader = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => Shared::dispatch(&shared, text.as_str()),
                        Ok(Message::Close(_)) | Err(_) => break,
                        // Pings/pongs are handled by the transport; binary
                        // frames are not part of this protocol.
                        Ok(_) => {}
                    }
                }
                Shared::handle_close(&shared, conn_id);
            })
        };
        {
            let mut slot = shared.conn.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(conn) = slot.as_mut() {
                if conn.id == conn_id {
                    conn.reader = Some(reader);
                }
            }
        }

        // Handshake: resume with the stored token, else the caller's
        // initial request (typically a login), else wait for the server's
        // unsolicited `init`.
        let first = match (shared.session.token(), initial) {
            (Some(token), _) => Some(OutboundRequest::auth(token)),
            (None, Some(request)) => Some(request),
            (None, None) => None,
        };
        if let Some(request) = first {
            match request.encode() {
                Ok(text) => {
                    if out_tx.try_send(Message::text(text)).is_err() {
                        log::warn!("handshake frame dropped: outbound queue unavailable");
                    }
                }
                Err(e) => log::error!("failed to encode handshake frame: {e}"),
            }
        }
        Ok(())
    }

    /// Decode one inbound frame and route it. Runs on the reader task, so
    /// frames are processed strictly in arrival order.
    fn dispatch(shared: &Arc<Shared>, text: &str) {
        let response = match InboundResponse::decode(text) {
            Ok(response) => response,
            Err(e) => {
                // Malformed frame: drop it, keep the connection.
                log::warn!("{e}");
                return;
            }
        };
        match response.classify() {
            ResponseKind::Init => {
                shared
                    .policy
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .reset();
                shared.session.set_status(ConnectionStatus::Connected);
                if shared.session.has_token() {
                    Shared::emit(shared, TelemetryEvent::OpenDashboard);
                }
            }
            ResponseKind::Auth | ResponseKind::Login => {
                Shared::handle_auth_response(shared, response)
            }
            ResponseKind::Change => {
                log::debug!("change acknowledged: {:?}", response.status);
            }
            ResponseKind::Unknown => {
                log::warn!("ignoring unknown response type {:?}", response.kind);
            }
        }
    }

    fn handle_auth_response(shared: &Arc<Shared>, response: InboundResponse) {
        if !response.is_success() {
            let message = response
                .message
                .unwrap_or_else(|| "Login failed".to_string());
            log::warn!("authentication rejected: {message}");
            // The stored token (if any) survives; only logout clears it.
            Shared::emit(shared, TelemetryEvent::AuthFailed { message });
            return;
        }
        match response.token {
            Some(token) => {
                // Persist before announcing `connected`, so observers that
                // read the store on that signal already see the new token.
                shared.session.set_token(Some(token));
                shared
                    .policy
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .reset();
                shared.session.set_status(ConnectionStatus::Connected);
                Shared::emit(shared, TelemetryEvent::OpenDashboard);
            }
            None => {
                // Protocol anomaly: success without a token. Auth state is
                // left exactly as it was.
                log::warn!("success response carried no token; ignoring");
            }
        }
    }

    /// Reader-task exit path. Stale notifications (a superseded or
    /// deliberately closed connection) are ignored.
    fn handle_close(shared: &Arc<Shared>, conn_id: Uuid) {
        if shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut slot = shared.conn.lock().unwrap_or_else(|e| e.into_inner());
            let is_live = slot.as_ref().is_some_and(|conn| conn.id == conn_id);
            if !is_live {
                // A superseded or deliberately closed connection — nothing
                // to recover.
                return;
            }
            if let Some(conn) = slot.take() {
                conn.writer.abort();
                log::info!("connection closed after {:?}", conn.opened_at.elapsed());
            }
        }
        shared.session.set_status(ConnectionStatus::Disconnected);
        Shared::schedule_reconnect(shared);
    }

    /// Replace any pending retry cycle with a fresh one.
    fn schedule_reconnect(shared: &Arc<Shared>) {
        if shared.disposed.load(Ordering::SeqCst)
            || !shared.retry_enabled.load(Ordering::SeqCst)
        {
            return;
        }
        let mut retry = shared.retry_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = retry.take() {
            task.abort();
        }
        let shared = shared.clone();
        *retry = Some(tokio::spawn(async move {
            Shared::run_retry_cycle(shared).await;
        }));
    }

    /// One retry cycle: sleep, redial, repeat while the budget lasts.
    async fn run_retry_cycle(shared: Arc<Shared>) {
        loop {
            if shared.disposed.load(Ordering::SeqCst) {
                return;
            }
            let next = {
                let mut policy = shared.policy.lock().unwrap_or_else(|e| e.into_inner());
                policy
                    .next_delay()
                    .map(|delay| (delay, policy.attempts(), policy.config().max_attempts))
            };
            let Some((delay, attempt, max_attempts)) = next else {
                Shared::give_up(&shared);
                return;
            };
            log::info!("reconnect attempt {attempt}/{max_attempts} in {delay:?}");
            tokio::time::sleep(delay).await;
            if shared.disposed.load(Ordering::SeqCst) {
                return;
            }
            // Another path (manual connect/login) may have beaten us here.
            if shared
                .conn
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
            {
                return;
            }
            shared
                .policy
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .begin_attempt();
            match Shared::establish(&shared, None).await {
                // Socket is open again; the handshake outcome decides
                // whether the counter resets or the next close re-enters
                // this cycle.
                Ok(()) => return,
                Err(e) => {
                    log::warn!("reconnect attempt {attempt}/{max_attempts} failed: {e}");
                    shared.session.set_status(ConnectionStatus::Disconnected);
                }
            }
        }
    }

    fn give_up(shared: &Arc<Shared>) {
        let attempts = shared
            .policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .attempts();
        log::error!(
            "giving up on {} after {attempts} reconnect attempts",
            shared.config.endpoint
        );
        shared.session.set_status(ConnectionStatus::Error);
        Shared::emit(shared, TelemetryEvent::ReconnectFailed { attempts });
    }

    fn cancel_retry(shared: &Arc<Shared>) {
        let task = shared
            .retry_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Abort both I/O tasks and forget the connection.
    fn drop_connection(shared: &Arc<Shared>) {
        let conn = shared
            .conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(conn) = conn {
            conn.writer.abort();
            if let Some(reader) = conn.reader {
                reader.abort();
            }
            log::debug!("dropped connection {}", conn.id);
        }
    }

    fn emit(shared: &Arc<Shared>, event: TelemetryEvent) {
        if let Err(e) = shared.event_tx.try_send(event) {
            log::warn!("dropping UI event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::MemoryTokenStore;

    fn offline_client() -> TelemetryClient {
        TelemetryClient::new(
            ClientConfig {
                endpoint: "ws://127.0.0.1:1".to_string(),
                workstation: Workstation::new("Test", "test-box"),
                reconnect: ReconnectConfig::default(),
            },
            Arc::new(MemoryTokenStore::new()),
        )
    }

    #[tokio::test]
    async fn test_send_without_connection_is_not_connected() {
        let client = offline_client();
        let err = client.send(&OutboundRequest::auth("tok")).unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let client = offline_client();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.token(), None);
    }

    #[tokio::test]
    async fn test_login_rejects_blank_credentials() {
        let client = offline_client();
        assert!(matches!(
            client.login("", "pw"),
            Err(LoginError::BlankCredentials)
        ));
        assert!(matches!(
            client.login("a@b.com", "   "),
            Err(LoginError::BlankCredentials)
        ));
        // No dial was started.
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_take_event_rx_only_once() {
        let mut client = offline_client();
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let client = offline_client();
        client.dispose();
        client.dispose();
        client.dispose();
    }

    #[tokio::test]
    async fn test_status_summary_mentions_workstation() {
        let client = offline_client();
        let summary = client.status_summary();
        assert!(summary.contains("Status: disconnected"), "{summary}");
        assert!(summary.contains("Device: test-box"), "{summary}");
        assert!(summary.contains("Environment: Test"), "{summary}");
    }

    #[tokio::test]
    async fn test_logout_clears_token() {
        let store = Arc::new(MemoryTokenStore::with_token("tok"));
        let client = TelemetryClient::new(
            ClientConfig {
                endpoint: "ws://127.0.0.1:1".to_string(),
                ..ClientConfig::default()
            },
            store.clone(),
        );
        assert_eq!(client.token(), Some("tok".to_string()));

        client.logout();
        assert_eq!(client.token(), None);
        assert_eq!(store.load(), None);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_dial_does_not_retry() {
        // Nothing listens on this port; the dial fails before ever opening.
        let client = TelemetryClient::new(
            ClientConfig {
                endpoint: "ws://127.0.0.1:9".to_string(),
                workstation: Workstation::new("Test", "box"),
                reconnect: ReconnectConfig {
                    base_delay: std::time::Duration::from_millis(5),
                    cap_delay: std::time::Duration::from_millis(20),
                    max_attempts: 3,
                },
            },
            Arc::new(MemoryTokenStore::new()),
        );

        client.connect(None);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        let policy = client.shared.policy.lock().unwrap();
        assert_eq!(policy.attempts(), 0, "exploratory dial must not retry");
    }
}
