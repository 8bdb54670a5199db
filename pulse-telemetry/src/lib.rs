//! # pulse-telemetry — live code-edit streaming for editor plugins
//!
//! Streams edit telemetry from an editor to a remote collector over one
//! persistent WebSocket, gated by a login-or-resume auth handshake.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ChangeEvent   ┌─────────────────┐   JSON frames
//! │ editor hooks │ ─────────────► │ TelemetryClient │ ◄──────────────► collector
//! │ login panel  │ ──login()────► │ (one connection)│
//! └──────────────┘                └───────┬─────────┘
//!                                         │
//!                         ┌───────────────┼────────────────┐
//!                         ▼               ▼                ▼
//!                  ┌─────────────┐ ┌──────────────┐ ┌─────────────┐
//!                  │ SessionState│ │ReconnectPolicy│ │ TokenStore  │
//!                  │ (fan-out)   │ │ (backoff)     │ │ (persisted) │
//!                  └─────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! Best-effort transport: the *connection* recovers from drops with
//! bounded, jittered exponential backoff, but dropped change frames are
//! not queued or replayed.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire codec (outbound requests, inbound responses)
//! - [`client`] — connection manager: dial, handshake, dispatch, teardown
//! - [`reconnect`] — backoff computation and the bounded retry budget
//! - [`session`] — connection status + token with observer fan-out
//! - [`token`] — pluggable token persistence
//! - [`capture`] — change-event construction at the editor boundary
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulse_telemetry::{
//!     ChangeEvent, EditRange, FileTokenStore, OutboundRequest, TelemetryClient,
//!     Workstation,
//! };
//!
//! # async fn demo() {
//! let store = Arc::new(FileTokenStore::new("/tmp/pulse/credentials.json"));
//! let client = TelemetryClient::with_defaults(store);
//!
//! client.session().add_observer(|status| {
//!     println!("collector: {status}");
//! });
//!
//! // Resume a persisted session, or wait for the user to log in.
//! if client.token().is_some() {
//!     client.connect(None);
//! }
//!
//! // From an editor change hook:
//! let workstation = Workstation::detect("MyEditor");
//! if client.is_connected() {
//!     let event = ChangeEvent::record(
//!         "file:///src/main.rs",
//!         EditRange::new(3, 0, 3, 5),
//!         "hello",
//!         &workstation,
//!     );
//!     let _ = client.send(&OutboundRequest::change(event));
//! }
//! # }
//! ```

pub mod capture;
pub mod client;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod token;

// Re-exports for convenience
pub use capture::{ChangeEvent, EditRange, Workstation};
pub use client::{
    ClientConfig, ConnectError, LoginError, SendError, TelemetryClient, TelemetryEvent,
    DEFAULT_ENDPOINT,
};
pub use protocol::{
    DecodeError, EncodeError, InboundResponse, LoginData, OutboundRequest, ResponseKind,
};
pub use reconnect::{ReconnectConfig, ReconnectPhase, ReconnectPolicy};
pub use session::{ConnectionStatus, SessionState};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
