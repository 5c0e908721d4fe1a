use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use mingle_db::Database;
use mingle_types::events::GatewayEvent;
use mingle_types::models::{Message, MessageStatus, Notification};

use crate::registry::ConnectionRegistry;

/// Failures surfaced by delivery operations. Validation rejects before any
/// state is mutated; store failures abort before any push; per-connection
/// push failures are absorbed inside the registry and never reach callers.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("caller is not authenticated")]
    Unauthenticated,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthenticated => "unauthenticated",
            Self::Store(_) => "store",
        }
    }
}

/// Orchestrates store-then-notify delivery for chat messages and the
/// ephemeral notification channel.
///
/// Chat messages are persisted before anything is pushed; an offline
/// recipient just leaves the message waiting in the store. Notifications are
/// never persisted here — zero live connections drops them.
#[derive(Clone)]
pub struct Delivery {
    db: Arc<Database>,
    registry: ConnectionRegistry,
}

impl Delivery {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry) -> Self {
        Self { db, registry }
    }

    /// Persist a new message, push it to the recipient's live connections,
    /// then acknowledge delivery to the sender's live connections.
    ///
    /// The delivered ack fires once the store accepts the message, whether or
    /// not the recipient is online.
    pub async fn send_message(
        &self,
        sender_id: &str,
        sender_username: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<Message, DeliveryError> {
        if sender_id.is_empty() {
            return Err(DeliveryError::Validation("senderId is required"));
        }
        if recipient_id.is_empty() {
            return Err(DeliveryError::Validation("recipientId is required"));
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender_id.to_string(),
            sender_username: sender_username.to_string(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };

        // Store strictly before any push; a failed write must not leak a
        // half-delivered message.
        let db = self.db.clone();
        let stored = message.clone();
        tokio::task::spawn_blocking(move || db.insert_message(&stored))
            .await
            .map_err(|e| anyhow::anyhow!("store task failed: {}", e))??;

        self.registry
            .send_to_user(recipient_id, GatewayEvent::ReceiveMessage(message.clone()))
            .await;

        self.registry
            .send_to_user(sender_id, GatewayEvent::MessageDelivered { message_id: message.id })
            .await;

        Ok(message)
    }

    /// Mark a stored message as seen and notify the original sender's live
    /// connections. An unknown message id is absorbed: nothing was updated,
    /// so nothing is signaled.
    pub async fn mark_as_seen(
        &self,
        message_id: Uuid,
        original_sender_id: &str,
    ) -> Result<(), DeliveryError> {
        let db = self.db.clone();
        let id = message_id.to_string();
        let updated = tokio::task::spawn_blocking(move || {
            db.update_message_status(&id, MessageStatus::Seen)
        })
        .await
        .map_err(|e| anyhow::anyhow!("store task failed: {}", e))??;

        if !updated {
            debug!("mark_as_seen for unknown message {}", message_id);
            return Ok(());
        }

        self.registry
            .send_to_user(original_sender_id, GatewayEvent::MessageSeen { message_id })
            .await;

        Ok(())
    }

    /// Construct a notification and push it to every live connection of the
    /// target user. No store-and-forward: an offline target drops it.
    pub async fn send_notification(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        kind: Option<String>,
        reference_id: Option<String>,
    ) -> Result<Notification, DeliveryError> {
        if user_id.is_empty() {
            return Err(DeliveryError::Validation("userId is required"));
        }

        let notification = Notification {
            title: title.to_string(),
            message: message.to_string(),
            kind,
            reference_id,
            timestamp: Utc::now(),
        };

        self.registry
            .send_to_user(user_id, GatewayEvent::ReceiveNotification(notification.clone()))
            .await;

        Ok(notification)
    }

    /// Echo a mark-as-read acknowledgement to the calling connection only.
    /// The authoritative read-state mutation lives in the REST API over the
    /// notification store; this channel never touches it.
    pub async fn mark_notification_read(
        &self,
        identity: Option<&str>,
        conn_id: Uuid,
        notification_id: &str,
    ) -> Result<(), DeliveryError> {
        if identity.is_none() {
            return Err(DeliveryError::Unauthenticated);
        }

        self.registry
            .send_to_connection(
                conn_id,
                GatewayEvent::NotificationMarkedAsRead {
                    notification_id: notification_id.to_string(),
                },
            )
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Delivery, ConnectionRegistry, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConnectionRegistry::new();
        let delivery = Delivery::new(db.clone(), registry.clone());
        (delivery, registry, db)
    }

    async fn connect(registry: &ConnectionRegistry, user: &str) -> (Uuid, UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn_id, user, tx).await;
        (conn_id, rx)
    }

    #[tokio::test]
    async fn message_reaches_all_recipient_devices_and_acks_sender() {
        let (delivery, registry, _db) = setup();
        let (_, mut alice_rx) = connect(&registry, "A").await;
        let (_, mut bob_rx1) = connect(&registry, "B").await;
        let (_, mut bob_rx2) = connect(&registry, "B").await;

        let sent = delivery.send_message("A", "alice", "B", "hi").await.unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);

        for rx in [&mut bob_rx1, &mut bob_rx2] {
            match rx.try_recv().unwrap() {
                GatewayEvent::ReceiveMessage(msg) => {
                    assert_eq!(msg.id, sent.id);
                    assert_eq!(msg.text, "hi");
                    assert_eq!(msg.status, MessageStatus::Sent);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        match alice_rx.try_recv().unwrap() {
            GatewayEvent::MessageDelivered { message_id } => assert_eq!(message_id, sent.id),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_message_stored() {
        let (delivery, registry, db) = setup();
        let (_, mut alice_rx) = connect(&registry, "A").await;

        let sent = delivery.send_message("A", "alice", "B", "hi").await.unwrap();

        // Stored with status sent, retrievable later
        let row = db.get_message(&sent.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "sent");

        // Delivered here means accepted by the store, so the ack still fires
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            GatewayEvent::MessageDelivered { .. }
        ));
    }

    #[tokio::test]
    async fn send_message_rejects_missing_identities() {
        let (delivery, _registry, db) = setup();

        let err = delivery.send_message("", "alice", "B", "hi").await.unwrap_err();
        assert_eq!(err.code(), "validation");

        let err = delivery.send_message("A", "alice", "", "hi").await.unwrap_err();
        assert_eq!(err.code(), "validation");

        // No state mutated
        assert!(db.get_conversation("A", "B", 50, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_as_seen_persists_and_notifies_sender() {
        let (delivery, registry, db) = setup();
        let sent = delivery.send_message("A", "alice", "B", "hi").await.unwrap();

        let (_, mut alice_rx) = connect(&registry, "A").await;
        delivery.mark_as_seen(sent.id, "A").await.unwrap();

        let row = db.get_message(&sent.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "seen");

        match alice_rx.try_recv().unwrap() {
            GatewayEvent::MessageSeen { message_id } => assert_eq!(message_id, sent.id),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_as_seen_unknown_id_pushes_nothing() {
        let (delivery, registry, _db) = setup();
        let (_, mut alice_rx) = connect(&registry, "A").await;

        delivery.mark_as_seen(Uuid::new_v4(), "A").await.unwrap();

        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notification_requires_target_user() {
        let (delivery, _registry, _db) = setup();

        let err = delivery
            .send_notification("", "t", "m", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn notification_fans_out_to_all_devices() {
        let (delivery, registry, _db) = setup();
        let (_, mut bob_rx1) = connect(&registry, "B").await;
        let (_, mut bob_rx2) = connect(&registry, "B").await;

        delivery
            .send_notification("B", "invite", "you are invited", Some("event".into()), Some("e42".into()))
            .await
            .unwrap();

        for rx in [&mut bob_rx1, &mut bob_rx2] {
            match rx.try_recv().unwrap() {
                GatewayEvent::ReceiveNotification(n) => {
                    assert_eq!(n.title, "invite");
                    assert_eq!(n.kind.as_deref(), Some("event"));
                    assert_eq!(n.reference_id.as_deref(), Some("e42"));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn notification_to_offline_user_is_dropped_silently() {
        let (delivery, _registry, _db) = setup();

        // No live connections, no store-and-forward, still Ok
        delivery
            .send_notification("ghost", "t", "m", None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mark_notification_read_echoes_to_caller_only() {
        let (delivery, registry, _db) = setup();
        let (caller_conn, mut caller_rx) = connect(&registry, "B").await;
        let (_, mut other_rx) = connect(&registry, "B").await;

        delivery
            .mark_notification_read(Some("B"), caller_conn, "n1")
            .await
            .unwrap();

        match caller_rx.try_recv().unwrap() {
            GatewayEvent::NotificationMarkedAsRead { notification_id } => {
                assert_eq!(notification_id, "n1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_notification_read_rejects_anonymous_callers() {
        let (delivery, registry, _db) = setup();
        let (caller_conn, mut caller_rx) = connect(&registry, "B").await;

        let err = delivery
            .mark_notification_read(None, caller_conn, "n1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthenticated");

        // Rejected before any echo
        assert!(caller_rx.try_recv().is_err());
    }
}
