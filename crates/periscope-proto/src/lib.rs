//! Wire protocol shared by the Periscope relay and the peer-side agent.
//!
//! Every frame is a JSON object tagged with `type`, sent as a text message
//! over a persistent WebSocket. The relay never interprets negotiation or
//! input payloads; they ride through as raw `serde_json::Value`s.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Availability of a registered user. The three states are mutually
/// exclusive per identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Available,
    Hosting,
    Viewing,
}

/// One entry of the online-users snapshot pushed to every client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineUser {
    pub identity: String,
    pub label: String,
    pub status: PresenceStatus,
}

/// Why a session was torn down. Carried verbatim on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Rejected,
    Timeout,
    UserDisconnected,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Rejected => "rejected",
            EndReason::Timeout => "timeout",
            EndReason::UserDisconnected => "user_disconnected",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally observed input telemetry, buffered peer-side and shipped to the
/// relay in acknowledged batches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub event_id: String,
    /// Milliseconds since the Unix epoch, stamped by the producing peer.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

/// Kind-specific payload of an [`ActivityEvent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Mouse { x: i32, y: i32, movements: u64 },
    Key { keystrokes: u64, recent_keys: Vec<u16> },
}

impl ActivityEvent {
    /// Stamps a new event with a fresh id and the given timestamp.
    pub fn new(kind: ActivityKind, timestamp: i64) -> Self {
        Self {
            event_id: generate_event_id(),
            timestamp,
            kind,
        }
    }
}

/// Messages sent from a peer to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the socket. The only frame accepted before auth completes.
    Auth { token: String },
    /// Ship the buffered telemetry as one acknowledged batch.
    ActivityBatch {
        events: Vec<ActivityEvent>,
        batch_id: String,
    },
    /// Ask for a fresh online snapshot (excluding the requester).
    GetOnlineUsers,
    /// Request interactive control of another user's screen.
    RtcRequest { target_identity: String },
    /// Host grants a pending request.
    RtcAccept {
        session_id: String,
        viewer_identity: String,
    },
    /// Host declines a pending request.
    RtcReject {
        session_id: String,
        viewer_identity: String,
    },
    /// Viewer-side negotiation payload, relayed verbatim.
    RtcOffer {
        session_id: String,
        target_identity: String,
        payload: serde_json::Value,
    },
    /// Host-side negotiation payload, relayed verbatim.
    RtcAnswer {
        session_id: String,
        target_identity: String,
        payload: serde_json::Value,
    },
    /// Connectivity candidate from either party, relayed verbatim.
    RtcIce {
        session_id: String,
        target_identity: String,
        payload: serde_json::Value,
    },
    /// Either party ends the session.
    RtcDisconnect { session_id: String },
    /// Viewer input destined for the host. Invalid input is dropped silently.
    RtcInput {
        session_id: String,
        payload: serde_json::Value,
    },
}

/// Messages sent from the relay to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk,
    AuthFail {
        reason: String,
    },
    BatchAck {
        batch_id: String,
    },
    Error {
        message: String,
    },
    /// Full snapshot of all other online users. Always a full snapshot,
    /// never a diff.
    OnlineUsers {
        users: Vec<OnlineUser>,
    },
    /// A viewer wants control of this peer's screen.
    RtcIncoming {
        session_id: String,
        viewer_identity: String,
        viewer_label: String,
    },
    /// The host granted the request; negotiation may begin.
    RtcAccepted {
        session_id: String,
        host_identity: String,
    },
    /// The request died while still pending. `session_id` is empty when no
    /// session was created at all.
    RtcRejected {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RtcOffer {
        session_id: String,
        payload: serde_json::Value,
    },
    RtcAnswer {
        session_id: String,
        payload: serde_json::Value,
    },
    RtcIce {
        session_id: String,
        payload: serde_json::Value,
    },
    /// An established or pending session was torn down.
    RtcDisconnected {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
    },
    RtcInput {
        session_id: String,
        payload: serde_json::Value,
    },
}

/// Generate a new session id. UUID v4, caller-unguessable.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique activity event id.
pub fn generate_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique batch id for one telemetry flush.
pub fn generate_batch_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_snake_case_tags() {
        let frame = ClientFrame::RtcRequest {
            target_identity: "u2".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "rtc_request");
        assert_eq!(json["target_identity"], "u2");

        let parsed: ClientFrame =
            serde_json::from_str(r#"{"type":"get_online_users"}"#).unwrap();
        assert!(matches!(parsed, ClientFrame::GetOnlineUsers));
    }

    #[test]
    fn activity_kind_flattens_into_the_event() {
        let event = ActivityEvent::new(
            ActivityKind::Mouse {
                x: 4,
                y: 9,
                movements: 120,
            },
            1_700_000_000_000,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "mouse");
        assert_eq!(json["x"], 4);
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);

        let back: ActivityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn end_reason_wire_strings() {
        assert_eq!(
            serde_json::to_string(&EndReason::UserDisconnected).unwrap(),
            r#""user_disconnected""#
        );
        assert_eq!(EndReason::Timeout.as_str(), "timeout");
    }

    #[test]
    fn rejected_frame_omits_missing_reason() {
        let frame = ServerFrame::RtcRejected {
            session_id: String::new(),
            reason: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("reason"));
    }
}
