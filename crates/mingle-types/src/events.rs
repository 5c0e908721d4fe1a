use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification};

/// Events pushed from server to client over the WebSocket gateway.
/// Event names are part of the wire contract with deployed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: String, username: String },

    /// A chat message addressed to this user
    ReceiveMessage(Message),

    /// The server accepted and stored a message this user sent
    MessageDelivered { message_id: Uuid },

    /// The recipient marked a message from this user as seen
    MessageSeen { message_id: Uuid },

    /// A notification addressed to this user
    ReceiveNotification(Notification),

    /// Echo of a mark-notification-read call, sent to the caller only
    NotificationMarkedAsRead { notification_id: String },

    /// A command from this connection was rejected
    Error { code: String, message: String },
}

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Send a direct message to another user
    SendMessage {
        sender_id: String,
        sender_username: String,
        recipient_id: String,
        text: String,
    },

    /// Mark a received message as seen, notifying the original sender
    MarkSeen {
        message_id: Uuid,
        original_sender_id: String,
    },

    /// Push a notification to all of a user's live connections
    SendNotification {
        user_id: String,
        title: String,
        message: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        reference_id: Option<String>,
    },

    /// Acknowledge a notification; the server echoes back to this caller only
    MarkNotificationRead { notification_id: String },
}
