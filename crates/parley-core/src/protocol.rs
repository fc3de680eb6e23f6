//! Wire event protocol between clients and the hub.
//!
//! Both directions are JSON objects with a `type` discriminator. Inbound
//! events form a closed enum resolved at the protocol boundary; an unknown
//! `type` fails to parse and is answered with an `error` event, never a
//! connection drop.

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, SessionId, UserId};
use crate::session::{Message, Participant, SessionSnapshot};

/// Events a client may send over its connection.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Auth {
        token: String,
    },
    Heartbeat,
    JoinSession {
        /// Absent to have the hub mint a fresh session id.
        session_id: Option<SessionId>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        is_host: bool,
        #[serde(default)]
        duration_minutes: Option<u32>,
        #[serde(default)]
        is_multi_user: bool,
    },
    LeaveSession {
        session_id: SessionId,
    },
    ChatMessage {
        session_id: SessionId,
        content: String,
        #[serde(default)]
        request_ai_reply: bool,
    },
    Typing {
        session_id: SessionId,
        is_typing: bool,
    },
    InviteUser {
        session_id: SessionId,
        invitee: UserId,
    },
    RemoveUser {
        session_id: SessionId,
        user_id: UserId,
    },
}

/// Events the hub may send to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished {
        connection_id: ConnectionId,
    },
    AuthSuccess {
        user_id: UserId,
    },
    HeartbeatAck,
    SessionJoined {
        #[serde(flatten)]
        snapshot: SessionSnapshot,
    },
    ParticipantUpdate {
        session_id: SessionId,
        participants: Vec<Participant>,
    },
    ChatMessage {
        session_id: SessionId,
        message: Message,
    },
    Typing {
        session_id: SessionId,
        user_id: UserId,
        is_typing: bool,
    },
    SessionLeft {
        session_id: SessionId,
    },
    SessionEnded {
        session_id: SessionId,
    },
    RemovedFromSession {
        session_id: SessionId,
    },
    UserRemoved {
        session_id: SessionId,
        user_id: UserId,
    },
    InviteSent {
        session_id: SessionId,
        invitee: UserId,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::AuthSuccess { .. } => "auth_success",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::SessionJoined { .. } => "session_joined",
            Self::ParticipantUpdate { .. } => "participant_update",
            Self::ChatMessage { .. } => "chat_message",
            Self::Typing { .. } => "typing",
            Self::SessionLeft { .. } => "session_left",
            Self::SessionEnded { .. } => "session_ended",
            Self::RemovedFromSession { .. } => "removed_from_session",
            Self::UserRemoved { .. } => "user_removed",
            Self::InviteSent { .. } => "invite_sent",
            Self::Error { .. } => "error",
        }
    }
}

/// Parse a raw inbound frame. `Err` carries a message suitable for the
/// `error` event sent back to the offending client.
pub fn parse_client_event(raw: &str) -> Result<ClientEvent, String> {
    serde_json::from_str(raw).map_err(|e| format!("unrecognized message: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth() {
        let event = parse_client_event(r#"{"type":"auth","token":"u1.abc"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Auth { token } if token == "u1.abc"));
    }

    #[test]
    fn parse_join_with_defaults() {
        let event =
            parse_client_event(r#"{"type":"join_session","session_id":"sess_1"}"#).unwrap();
        match event {
            ClientEvent::JoinSession {
                session_id,
                is_host,
                is_multi_user,
                duration_minutes,
                ..
            } => {
                assert_eq!(session_id.unwrap().as_str(), "sess_1");
                assert!(!is_host);
                assert!(!is_multi_user);
                assert!(duration_minutes.is_none());
            }
            other => panic!("expected join_session, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_message() {
        let event = parse_client_event(
            r#"{"type":"chat_message","session_id":"s1","content":"hi","request_ai_reply":true}"#,
        )
        .unwrap();
        match event {
            ClientEvent::ChatMessage {
                content,
                request_ai_reply,
                ..
            } => {
                assert_eq!(content, "hi");
                assert!(request_ai_reply);
            }
            other => panic!("expected chat_message, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error_not_a_panic() {
        let result = parse_client_event(r#"{"type":"launch_rocket"}"#);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("unrecognized message"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_client_event("not json at all").is_err());
    }

    #[test]
    fn server_events_tag_type() {
        let json = serde_json::to_string(&ServerEvent::HeartbeatAck).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat_ack"}"#);

        let json = serde_json::to_string(&ServerEvent::error("bad request")).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("bad request"));
    }

    #[test]
    fn session_joined_flattens_snapshot() {
        let snapshot = SessionSnapshot {
            session_id: SessionId::from_raw("s1"),
            host_user_id: Some(UserId::from_raw("u1")),
            participants: vec![Participant::Assistant],
            messages: vec![],
            duration_minutes: 30,
            is_multi_user: false,
            active: true,
            created_at: "2026-08-29T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&ServerEvent::SessionJoined { snapshot }).unwrap();
        assert!(json.contains(r#""type":"session_joined""#));
        assert!(json.contains(r#""session_id":"s1""#));
        assert!(json.contains(r#""duration_minutes":30"#));
    }

    #[test]
    fn event_type_names_match_wire_tags() {
        let event = ServerEvent::UserRemoved {
            session_id: SessionId::from_raw("s1"),
            user_id: UserId::from_raw("u2"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(&format!(r#""type":"{}""#, event.event_type())));
    }
}
