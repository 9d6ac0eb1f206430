//! Messages exchanged on the live channel.
//!
//! The first client message on a fresh connection picks the flow:
//! `Authenticate` / `Renew` are one-shot token requests, `Handshake`
//! starts a live session. Everything after the handshake is heartbeats,
//! census updates, and server pushes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RejectReason, Uid};

/// Per-user statistics reported by the client for the census.
///
/// Ephemeral: the server keeps these only while the user is connected and
/// clears them at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CensusEntry {
    pub world: u16,
    pub race: u8,
    pub gender: u8,
}

/// What the server tells a client after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub uid: Uid,
    pub alias: Option<String>,
    pub is_admin: bool,
    pub is_moderator: bool,
    pub shard_name: String,
    pub online_users: usize,
    pub server_version: u32,
}

/// Client → server messages.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON:
/// `{ "type": "Heartbeat", "client_time": 5 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Exchange a long-lived secret key for a session token.
    Authenticate {
        secret_key: String,
        fingerprint: String,
    },

    /// Exchange a still-valid session token for a fresh one.
    Renew { token: String },

    /// Open a live session with a session token.
    Handshake { version: u32, token: String },

    /// Keep-alive. Also refreshes the presence record's TTL.
    Heartbeat { client_time: u64 },

    /// Report census statistics for this user.
    Census { entry: CensusEntry },

    /// Graceful close.
    Disconnect { reason: String },
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A freshly signed session token.
    Token { token: String },

    /// The request was refused. `message` is `reason.message()`, included
    /// so clients don't need their own copy of the texts.
    Rejected {
        reason: RejectReason,
        message: String,
    },

    /// The live session is open.
    Welcome(ConnectionInfo),

    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Periodic fleet-wide counters.
    SystemInfo { online_users: usize },

    /// An artifact requested earlier is ready for download.
    DownloadReady { request_id: Uuid },

    /// A paired user went offline.
    PeerOffline { uid: Uid },
}

impl ServerMessage {
    /// Builds a `Rejected` message for `reason`.
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected {
            reason,
            message: reason.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_internally_tagged() {
        let msg = ClientMessage::Handshake {
            version: 1,
            token: "abc".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "Handshake", "version": 1, "token": "abc" })
        );
    }

    #[test]
    fn test_rejected_carries_reason_and_message() {
        let msg = ServerMessage::rejected(RejectReason::DuplicateSession);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Rejected");
        assert_eq!(json["reason"], "DuplicateSession");
        assert!(json["message"].as_str().unwrap().contains("Already logged in"));
    }

    #[test]
    fn test_download_ready_parses_from_client_json() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"DownloadReady","request_id":"{id}"}}"#);
        let msg: ServerMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg, ServerMessage::DownloadReady { request_id: id });
    }

    #[test]
    fn test_welcome_newtype_variant_flattens_fields() {
        let msg = ServerMessage::Welcome(ConnectionInfo {
            uid: Uid::new("U1"),
            alias: None,
            is_admin: false,
            is_moderator: true,
            shard_name: "main".into(),
            online_users: 3,
            server_version: 1,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Welcome");
        assert_eq!(json["uid"], "U1");
        assert_eq!(json["is_moderator"], true);
    }
}
