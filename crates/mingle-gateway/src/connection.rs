use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use mingle_types::api::Claims;
use mingle_types::events::{ClientCommand, GatewayEvent};

use crate::delivery::Delivery;
use crate::registry::ConnectionRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one WebSocket connection for its whole lifetime.
///
/// `identity` is whatever the upgrade layer authenticated. Anonymous
/// connections stay open and may issue commands, but are never registered
/// and therefore never receive pushes addressed to a user.
pub async fn handle_connection(
    socket: WebSocket,
    registry: ConnectionRegistry,
    delivery: Delivery,
    identity: Option<Claims>,
) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();

    if let Some(claims) = &identity {
        registry.register(conn_id, &claims.sub, tx.clone()).await;
        info!("{} ({}) connected to gateway", claims.username, conn_id);
        let _ = tx.send(GatewayEvent::Ready {
            user_id: claims.sub.clone(),
            username: claims.username.clone(),
        });
    } else {
        info!("anonymous connection {} accepted", conn_id);
    }

    let (mut sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let identity_recv = identity.clone();
    let delivery_recv = delivery.clone();
    let reply_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&delivery_recv, identity_recv.as_ref(), conn_id, cmd, &reply_tx)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup runs on every exit path: graceful close, abrupt drop,
    // heartbeat timeout, or a failed handler task.
    registry.unregister(conn_id).await;
    info!("connection {} disconnected from gateway", conn_id);
}

/// Dispatch one inbound command. Failures become an explicit Error event on
/// the caller's own connection; they never tear down other connections.
async fn handle_command(
    delivery: &Delivery,
    identity: Option<&Claims>,
    conn_id: Uuid,
    cmd: ClientCommand,
    reply: &mpsc::UnboundedSender<GatewayEvent>,
) {
    let result = match cmd {
        ClientCommand::SendMessage {
            sender_id,
            sender_username,
            recipient_id,
            text,
        } => delivery
            .send_message(&sender_id, &sender_username, &recipient_id, &text)
            .await
            .map(|_| ()),

        ClientCommand::MarkSeen {
            message_id,
            original_sender_id,
        } => delivery.mark_as_seen(message_id, &original_sender_id).await,

        ClientCommand::SendNotification {
            user_id,
            title,
            message,
            kind,
            reference_id,
        } => delivery
            .send_notification(&user_id, &title, &message, kind, reference_id)
            .await
            .map(|_| ()),

        ClientCommand::MarkNotificationRead { notification_id } => {
            delivery
                .mark_notification_read(identity.map(|c| c.sub.as_str()), conn_id, &notification_id)
                .await
        }
    };

    if let Err(e) = result {
        warn!("connection {} command failed: {}", conn_id, e);
        let _ = reply.send(GatewayEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        });
    }
}
