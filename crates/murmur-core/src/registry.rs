//! Connection registry: identity to live connection.
//!
//! Holds at most one connection per identity. Admitting a second session for
//! the same identity tears the first one down (last writer wins).

use dashmap::DashMap;
use murmur_protocol::{CloseCode, Identity, ServerEvent};
use murmur_transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_WRITE_TIMEOUT;
use crate::connection::Connection;
use crate::heartbeat::{self, HeartbeatConfig};

/// Who is asking for a connection to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// The peer closed; the transport is already going down.
    ClientClosed,
    /// The server drops the peer and says so with a close code.
    ServerEvicted,
    /// As `ServerEvicted`, but called from the connection's own heartbeat
    /// task, which must not abort itself.
    HeartbeatExpired,
}

/// Process-wide map of live connections.
pub struct Registry {
    connections: DashMap<Identity, Arc<Connection>>,
    heartbeat: HeartbeatConfig,
    write_timeout: Duration,
}

impl Registry {
    /// Create a registry whose connections are supervised with `heartbeat`.
    #[must_use]
    pub fn new(heartbeat: HeartbeatConfig) -> Arc<Self> {
        Self::with_write_timeout(heartbeat, DEFAULT_WRITE_TIMEOUT)
    }

    /// As [`new`](Self::new), bounding every write to a peer by `write_timeout`.
    #[must_use]
    pub fn with_write_timeout(heartbeat: HeartbeatConfig, write_timeout: Duration) -> Arc<Self> {
        info!(
            interval_ms = heartbeat.interval.as_millis() as u64,
            timeout_ms = heartbeat.timeout.as_millis() as u64,
            write_timeout_ms = write_timeout.as_millis() as u64,
            "Creating connection registry"
        );
        Arc::new(Self {
            connections: DashMap::new(),
            heartbeat,
            write_timeout,
        })
    }

    /// Admit a connection for `identity`, replacing any existing one, and
    /// start its heartbeat.
    pub async fn admit(
        self: &Arc<Self>,
        identity: Identity,
        transport: Box<dyn Transport>,
    ) -> Arc<Connection> {
        self.admit_with_heartbeat(identity, transport, self.heartbeat)
            .await
    }

    /// As [`admit`](Self::admit), with heartbeat timing for this connection only.
    pub async fn admit_with_heartbeat(
        self: &Arc<Self>,
        identity: Identity,
        transport: Box<dyn Transport>,
        heartbeat: HeartbeatConfig,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::with_write_timeout(
            identity,
            transport,
            self.write_timeout,
        ));

        if let Some(previous) = self.connections.insert(identity, Arc::clone(&conn)) {
            info!(
                identity,
                previous = %previous.id(),
                connection = %conn.id(),
                "Replacing existing connection"
            );
            teardown(&previous, Teardown::ServerEvicted).await;
        }

        let handle = heartbeat::spawn(Arc::downgrade(self), Arc::clone(&conn), heartbeat);
        conn.set_heartbeat(handle);

        info!(
            identity,
            connection = %conn.id(),
            online = self.connections.len(),
            "Connection admitted"
        );
        conn
    }

    /// Remove whatever connection `identity` has. No-op if offline.
    ///
    /// A server-initiated removal closes the transport with the eviction
    /// code; otherwise the peer is assumed to be closing already.
    pub async fn remove(&self, identity: Identity, server_initiated: bool) -> bool {
        let Some((_, conn)) = self.connections.remove(&identity) else {
            return false;
        };
        let mode = if server_initiated {
            Teardown::ServerEvicted
        } else {
            Teardown::ClientClosed
        };
        teardown(&conn, mode).await;
        info!(identity, connection = %conn.id(), server_initiated, "Connection removed");
        true
    }

    /// The peer of `conn` went away. Releases the registry entry only if it
    /// still belongs to `conn`, so a stale session never removes its
    /// replacement.
    pub async fn release(&self, conn: &Arc<Connection>) -> bool {
        self.remove_exact(conn, Teardown::ClientClosed).await
    }

    /// Drop `conn` after a failed send.
    pub async fn evict(&self, conn: &Arc<Connection>) -> bool {
        self.remove_exact(conn, Teardown::ServerEvicted).await
    }

    pub(crate) async fn evict_unresponsive(&self, conn: &Arc<Connection>) -> bool {
        self.remove_exact(conn, Teardown::HeartbeatExpired).await
    }

    async fn remove_exact(&self, conn: &Arc<Connection>, mode: Teardown) -> bool {
        let removed = self
            .connections
            .remove_if(&conn.identity(), |_, current| current.id() == conn.id())
            .is_some();
        teardown(conn, mode).await;
        if removed {
            info!(identity = conn.identity(), connection = %conn.id(), ?mode, "Connection removed");
        }
        removed
    }

    #[must_use]
    pub fn is_online(&self, identity: Identity) -> bool {
        self.connections.contains_key(&identity)
    }

    /// The live connection of `identity`, if any.
    #[must_use]
    pub fn get(&self, identity: Identity) -> Option<Arc<Connection>> {
        self.connections.get(&identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of the identities online right now.
    #[must_use]
    pub fn online_identities(&self) -> Vec<Identity> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Best-effort push to `identity`.
    ///
    /// Returns false if the identity is offline or the send failed; a failed
    /// or timed-out send evicts the target.
    pub async fn send_direct(&self, identity: Identity, event: &ServerEvent) -> bool {
        // Clone out of the map so no shard lock is held across the send.
        let Some(conn) = self.get(identity) else {
            debug!(identity, event = event.type_name(), "Target offline");
            return false;
        };

        match conn.send(event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    identity,
                    connection = %conn.id(),
                    event = event.type_name(),
                    "Send failed, evicting: {}", e
                );
                self.evict(&conn).await;
                false
            }
        }
    }

    /// Close every connection, for shutdown.
    pub async fn close_all(&self) {
        for identity in self.online_identities() {
            if let Some((_, conn)) = self.connections.remove(&identity) {
                conn.cancel_heartbeat();
                conn.close(CloseCode::Normal).await;
            }
        }
    }
}

async fn teardown(conn: &Connection, mode: Teardown) {
    match mode {
        Teardown::ClientClosed => {
            conn.cancel_heartbeat();
            conn.mark_closed();
        }
        Teardown::ServerEvicted => {
            conn.cancel_heartbeat();
            conn.close(CloseCode::Evicted).await;
        }
        Teardown::HeartbeatExpired => {
            conn.detach_heartbeat();
            conn.close(CloseCode::Evicted).await;
        }
    }
}
