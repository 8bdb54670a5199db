//! JSON wire protocol for the collector connection.
//!
//! One JSON text frame per WebSocket message, tagged by `type`:
//!
//! ```text
//! ── outbound ──────────────────────────────────────────────────────
//! {"type":"login","data":{"email":"…","password":"…"}}
//! {"type":"auth","token":"…"}
//! {"type":"change","data":{"document_uri":"…","timestamp":"…", …}}
//!
//! ── inbound ───────────────────────────────────────────────────────
//! {"type":"init"}
//! {"type":"auth","status":"success","token":"…"}
//! {"type":"login","status":"failed","message":"…"}
//! ```
//!
//! Inbound frames all share one flat shape; `status`/`token`/`message` are
//! optional and unknown `type` values still decode (they are classified
//! [`ResponseKind::Unknown`] and dropped by the dispatcher, never treated as
//! a connection fault). Unknown JSON fields are ignored on decode, so the
//! schema can grow server-side without breaking old clients.
//!
//! Reference: Kleppmann — DDIA, Chapter 4 (Encoding and Evolution)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::ChangeEvent;

/// Encode failure. Should not occur for well-formed requests.
#[derive(Debug, Error)]
#[error("failed to encode frame: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Malformed inbound frame. Non-fatal: the frame is logged and dropped,
/// the connection stays open.
#[derive(Debug, Error)]
#[error("malformed frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Credentials payload of a `login` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

/// A client→server frame. Consumed exactly once by serialize-and-send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundRequest {
    /// Credential handshake (no stored token).
    Login { data: LoginData },
    /// Token-resume handshake.
    Auth { token: String },
    /// One edit event. Only valid on an open, authenticated session.
    Change { data: ChangeEvent },
}

impl OutboundRequest {
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        OutboundRequest::Login {
            data: LoginData {
                email: email.into(),
                password: password.into(),
            },
        }
    }

    pub fn auth(token: impl Into<String>) -> Self {
        OutboundRequest::Auth {
            token: token.into(),
        }
    }

    pub fn change(event: ChangeEvent) -> Self {
        OutboundRequest::Change { data: event }
    }

    /// Serialize to a JSON text frame. Deterministic and lossless for every
    /// declared field.
    pub fn encode(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Dispatch classification of an inbound frame's `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Init,
    Auth,
    Login,
    Change,
    Unknown,
}

/// A server→client frame: `type` plus optional `status`/`token`/`message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InboundResponse {
    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn classify(&self) -> ResponseKind {
        match self.kind.as_str() {
            "init" => ResponseKind::Init,
            "auth" => ResponseKind::Auth,
            "login" => ResponseKind::Login,
            "change" => ResponseKind::Change,
            _ => ResponseKind::Unknown,
        }
    }

    /// Whether the server reported the operation as successful.
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}
