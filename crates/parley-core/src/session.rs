use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, UserId};

/// One turn in a session's append-only log. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub author: UserId,
    pub content: String,
    pub created_at: String,
}

impl Message {
    pub fn new(session_id: SessionId, author: UserId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            author,
            content: content.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.author.is_assistant()
    }
}

/// A member of a session. The assistant is a distinct variant rather than a
/// human record with flags: there is exactly one per session and it has no
/// owning connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Participant {
    Human {
        user_id: UserId,
        name: String,
        is_host: bool,
    },
    Assistant,
}

impl Participant {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Human { user_id, .. } => user_id.clone(),
            Self::Assistant => UserId::assistant(),
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Human { is_host: true, .. })
    }
}

/// Role of a context-window turn as seen by the responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of the bounded context window handed to the AI responder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: if message.is_assistant() {
                ChatRole::Assistant
            } else {
                ChatRole::User
            },
            content: message.content.clone(),
        }
    }
}

/// Point-in-time copy of a session's visible state, taken under the
/// registry's session lock so participant lists are never stale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub host_user_id: Option<UserId>,
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
    pub duration_minutes: u32,
    pub is_multi_user: bool,
    pub active: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_author_and_timestamp() {
        let m = Message::new(SessionId::new(), UserId::from_raw("u1"), "hello");
        assert_eq!(m.author.as_str(), "u1");
        assert!(!m.is_assistant());
        assert!(!m.created_at.is_empty());
    }

    #[test]
    fn assistant_message_detected() {
        let m = Message::new(SessionId::new(), UserId::assistant(), "hi there");
        assert!(m.is_assistant());
    }

    #[test]
    fn participant_variants() {
        let host = Participant::Human {
            user_id: UserId::from_raw("u1"),
            name: "Alice".into(),
            is_host: true,
        };
        assert!(host.is_human());
        assert!(host.is_host());
        assert_eq!(host.user_id().as_str(), "u1");

        let ai = Participant::Assistant;
        assert!(!ai.is_human());
        assert!(!ai.is_host());
        assert!(ai.user_id().is_assistant());
    }

    #[test]
    fn participant_serde_tags_kind() {
        let json = serde_json::to_string(&Participant::Assistant).unwrap();
        assert!(json.contains("\"kind\":\"assistant\""));

        let human = Participant::Human {
            user_id: UserId::from_raw("u2"),
            name: "Bob".into(),
            is_host: false,
        };
        let json = serde_json::to_string(&human).unwrap();
        assert!(json.contains("\"kind\":\"human\""));
        assert!(json.contains("\"user_id\":\"u2\""));
    }

    #[test]
    fn chat_turn_role_mapping() {
        let sid = SessionId::new();
        let user = Message::new(sid.clone(), UserId::from_raw("u1"), "question");
        let ai = Message::new(sid, UserId::assistant(), "answer");

        assert_eq!(ChatTurn::from_message(&user).role, ChatRole::User);
        assert_eq!(ChatTurn::from_message(&ai).role, ChatRole::Assistant);
    }
}
