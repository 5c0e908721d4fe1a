/// Raw message row as stored in SQLite. Parsed into
/// `mingle_types::models::Message` at the API boundary.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub recipient_id: String,
    pub text: String,
    pub status: String,
    pub created_at: String,
}
