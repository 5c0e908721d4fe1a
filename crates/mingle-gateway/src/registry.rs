use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use mingle_types::events::GatewayEvent;

/// Outbound event channel for one live connection.
pub type ConnSender = mpsc::UnboundedSender<GatewayEvent>;

struct ConnEntry {
    user_id: String,
    tx: ConnSender,
}

/// Maps live connections to authenticated identities and back.
///
/// Constructed once per process and passed by handle to whatever owns
/// connection lifecycle; cloning shares the same state. A user identity is
/// one kind of group key and may have many live connections (multi-device).
/// One lock guards both maps, so a reader sees a connection either fully
/// registered or not at all.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    /// conn_id -> identity + outbound channel
    connections: HashMap<Uuid, ConnEntry>,
    /// group key (user id) -> live connection ids
    groups: HashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Register a connection under an identity. Empty identities are ignored.
    /// Re-registering an existing connection under a different identity
    /// overwrites the previous mapping rather than merging.
    pub async fn register(&self, conn_id: Uuid, user_id: &str, tx: ConnSender) {
        if user_id.is_empty() {
            return;
        }

        let mut inner = self.inner.write().await;
        if let Some(prev) = inner.connections.remove(&conn_id) {
            remove_from_group(&mut inner.groups, &prev.user_id, conn_id);
        }
        inner.connections.insert(
            conn_id,
            ConnEntry {
                user_id: user_id.to_string(),
                tx,
            },
        );
        inner.groups.entry(user_id.to_string()).or_default().insert(conn_id);
    }

    /// Remove a connection. Unknown ids are a no-op — transport disconnects
    /// can race or duplicate.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.remove(&conn_id) {
            remove_from_group(&mut inner.groups, &entry.user_id, conn_id);
        }
    }

    /// Snapshot of the live connection ids for an identity.
    pub async fn connections_for(&self, user_id: &str) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .groups
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Push an event to every live connection of an identity. Zero live
    /// connections absorbs the push; a send failure means the connection is
    /// mid-teardown and is skipped without aborting the rest of the fan-out.
    pub async fn send_to_user(&self, user_id: &str, event: GatewayEvent) {
        let inner = self.inner.read().await;
        let Some(conns) = inner.groups.get(user_id) else {
            return;
        };
        for conn_id in conns {
            if let Some(entry) = inner.connections.get(conn_id) {
                if entry.tx.send(event.clone()).is_err() {
                    debug!("connection {} of {} gone during push", conn_id, user_id);
                }
            }
        }
    }

    /// Push an event to a single connection, if still live.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) {
        let inner = self.inner.read().await;
        if let Some(entry) = inner.connections.get(&conn_id) {
            if entry.tx.send(event).is_err() {
                debug!("connection {} gone during push", conn_id);
            }
        }
    }
}

fn remove_from_group(groups: &mut HashMap<String, HashSet<Uuid>>, user_id: &str, conn_id: Uuid) {
    if let Some(conns) = groups.get_mut(user_id) {
        conns.remove(&conn_id);
        if conns.is_empty() {
            groups.remove(user_id);
        }
    }
}
