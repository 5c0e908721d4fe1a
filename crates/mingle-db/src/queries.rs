use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use rusqlite::Connection;

use mingle_types::models::{Message, MessageStatus};

impl Database {
    // -- Messages --

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, sender_username, recipient_id, text, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.id.to_string(),
                    msg.sender_id,
                    msg.sender_username,
                    msg.recipient_id,
                    msg.text,
                    msg.status.as_str(),
                    msg.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Single in-place status update, atomic per message id.
    /// Returns false when no row matched — callers treat that as a no-op.
    pub fn update_message_status(&self, id: &str, status: MessageStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Conversation history between two users, newest first.
    /// `before` is a `created_at` cursor from the previous page.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation(conn, user_a, user_b, limit, before))
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, sender_username, recipient_id, text, status, created_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], map_message_row).optional()?;

    Ok(row)
}

fn query_conversation(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    let sql = if before.is_some() {
        "SELECT id, sender_id, sender_username, recipient_id, text, status, created_at
         FROM messages
         WHERE ((sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1))
           AND created_at < ?4
         ORDER BY created_at DESC
         LIMIT ?3"
    } else {
        "SELECT id, sender_id, sender_username, recipient_id, text, status, created_at
         FROM messages
         WHERE (sender_id = ?1 AND recipient_id = ?2) OR (sender_id = ?2 AND recipient_id = ?1)
         ORDER BY created_at DESC
         LIMIT ?3"
    };

    let mut stmt = conn.prepare(sql)?;

    let rows = match before {
        Some(cursor) => stmt
            .query_map(rusqlite::params![user_a, user_b, limit, cursor], map_message_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![user_a, user_b, limit], map_message_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    Ok(rows)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        recipient_id: row.get(3)?,
        text: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_message(sender: &str, recipient: &str, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender.to_string(),
            sender_username: sender.to_lowercase(),
            recipient_id: recipient.to_string(),
            text: text.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let msg = test_message("A", "B", "hi");
        db.insert_message(&msg).unwrap();

        let row = db.get_message(&msg.id.to_string()).unwrap().unwrap();
        assert_eq!(row.sender_id, "A");
        assert_eq!(row.recipient_id, "B");
        assert_eq!(row.status, "sent");
    }

    #[test]
    fn status_update_reports_matched_rows() {
        let db = Database::open_in_memory().unwrap();
        let msg = test_message("A", "B", "hi");
        db.insert_message(&msg).unwrap();

        assert!(db.update_message_status(&msg.id.to_string(), MessageStatus::Seen).unwrap());
        let row = db.get_message(&msg.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "seen");

        // Unknown id is a detectable no-op, not an error
        assert!(!db.update_message_status(&Uuid::new_v4().to_string(), MessageStatus::Seen).unwrap());
    }

    #[test]
    fn conversation_covers_both_directions() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(&test_message("A", "B", "one")).unwrap();
        db.insert_message(&test_message("B", "A", "two")).unwrap();
        db.insert_message(&test_message("A", "C", "other")).unwrap();

        let rows = db.get_conversation("A", "B", 50, None).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = db.get_conversation("B", "A", 50, None).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = db.get_conversation("A", "C", 50, None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn conversation_respects_limit_and_cursor() {
        let db = Database::open_in_memory().unwrap();
        let mut msgs = Vec::new();
        for i in 0..3 {
            let mut msg = test_message("A", "B", &format!("m{}", i));
            // Distinct timestamps so the cursor has a strict ordering to cut on
            msg.created_at = Utc::now() + chrono::Duration::seconds(i);
            db.insert_message(&msg).unwrap();
            msgs.push(msg);
        }

        let page = db.get_conversation("A", "B", 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].text, "m2");

        let older = db
            .get_conversation("A", "B", 2, Some(&page[1].created_at))
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].text, "m0");
    }
}
