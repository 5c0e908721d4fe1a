use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use mingle_db::models::MessageRow;
use mingle_types::api::Claims;
use mingle_types::models::{Message, MessageStatus};

use crate::AppStateInner;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// Conversation history between the authenticated caller and `peer_id`.
/// This is the retrieval half of store-and-forward: messages pushed while
/// the recipient was offline land here.
pub async fn get_conversation(
    State(state): State<Arc<AppStateInner>>,
    Path(peer_id): Path<String>,
    Query(query): Query<ConversationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    // Run blocking DB queries off the async runtime
    let db = state.db.clone();
    let caller = claims.sub.clone();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || {
        db.get_conversation(&caller, &peer_id, limit, before.as_deref())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<Message> = rows.into_iter().map(row_to_message).collect();

    Ok(Json(messages))
}

fn row_to_message(row: MessageRow) -> Message {
    Message {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        status: row.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on message '{}': {}", row.id, e);
            MessageStatus::Sent
        }),
        created_at: row
            .created_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .or_else(|_| {
                // SQLite-side timestamps are "YYYY-MM-DD HH:MM:SS" without
                // timezone. Parse as naive UTC and convert.
                chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| ndt.and_utc())
            })
            .unwrap_or_else(|e| {
                warn!("Corrupt created_at '{}' on message '{}': {}", row.created_at, row.id, e);
                chrono::DateTime::default()
            }),
        sender_id: row.sender_id,
        sender_username: row.sender_username,
        recipient_id: row.recipient_id,
        text: row.text,
    }
}
