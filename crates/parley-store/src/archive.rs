use tracing::instrument;

use parley_core::ids::{MessageId, SessionId, UserId};
use parley_core::session::Message;

use crate::database::Database;
use crate::error::StoreError;

/// Best-effort durable archive of appended messages.
///
/// This is a side channel: the in-memory log owned by the session registry is
/// authoritative, and a failed `record` never blocks or fails the
/// append/broadcast path (callers log and move on).
pub struct MessageArchive {
    db: Database,
}

impl MessageArchive {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist one appended message.
    #[instrument(skip(self, message), fields(session_id = %message.session_id))]
    pub fn record(&self, message: &Message) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO messages (id, session_id, author, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.as_str(),
                    message.session_id.as_str(),
                    message.author.as_str(),
                    message.content,
                    message.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// All archived messages for a session, in append order.
    pub fn list_session(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, author, content, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(Message {
                    id: MessageId::from_raw(row.get::<_, String>(0)?),
                    session_id: SessionId::from_raw(row.get::<_, String>(1)?),
                    author: UserId::from_raw(row.get::<_, String>(2)?),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                });
            }
            Ok(results)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive() -> MessageArchive {
        MessageArchive::new(Database::in_memory().unwrap())
    }

    #[test]
    fn record_and_list() {
        let archive = archive();
        let sid = SessionId::new();

        let m1 = Message::new(sid.clone(), UserId::from_raw("u1"), "first");
        let m2 = Message::new(sid.clone(), UserId::assistant(), "second");
        archive.record(&m1).unwrap();
        archive.record(&m2).unwrap();

        let listed = archive.list_session(&sid).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].content, "first");
        assert_eq!(listed[1].content, "second");
        assert!(listed[1].is_assistant());
    }

    #[test]
    fn list_preserves_append_order() {
        let archive = archive();
        let sid = SessionId::new();
        for i in 0..10 {
            archive
                .record(&Message::new(sid.clone(), UserId::from_raw("u1"), format!("msg {i}")))
                .unwrap();
        }
        let listed = archive.list_session(&sid).unwrap();
        let contents: Vec<_> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], "msg 0");
        assert_eq!(contents[9], "msg 9");
    }

    #[test]
    fn duplicate_record_is_ignored() {
        let archive = archive();
        let m = Message::new(SessionId::new(), UserId::from_raw("u1"), "once");
        archive.record(&m).unwrap();
        archive.record(&m).unwrap();
        assert_eq!(archive.count().unwrap(), 1);
    }

    #[test]
    fn other_sessions_not_listed() {
        let archive = archive();
        let a = SessionId::new();
        let b = SessionId::new();
        archive.record(&Message::new(a.clone(), UserId::from_raw("u1"), "in a")).unwrap();
        archive.record(&Message::new(b, UserId::from_raw("u2"), "in b")).unwrap();

        let listed = archive.list_session(&a).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "in a");
    }
}
