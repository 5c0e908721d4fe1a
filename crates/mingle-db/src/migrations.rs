use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            sender_id       TEXT NOT NULL,
            sender_username TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            text            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'sent'
                CHECK (status IN ('sent', 'delivered', 'seen')),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, recipient_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_recipient
            ON messages(recipient_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
