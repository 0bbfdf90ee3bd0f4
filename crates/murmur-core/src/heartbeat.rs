//! Per-connection liveness monitor.
//!
//! Each admitted connection gets its own task:
//!
//! ```text
//! IDLE --interval--> ping sent, AWAITING_PONG --pong--> IDLE
//!                                             --timeout--> evict
//! ```
//!
//! Tasks share nothing, so a silent peer only ever delays its own cycle. A
//! peer that stops reading is treated like one that stops answering: the
//! ping write is bounded by the same timeout as the pong.

use murmur_protocol::ServerEvent;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::registry::Registry;

/// Heartbeat timing for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Pause before each ping.
    pub interval: Duration,
    /// How long to wait for the pong.
    pub timeout: Duration,
}

/// Start supervising `conn`. The task ends on eviction or when the
/// connection is closed by someone else.
pub(crate) fn spawn(
    registry: Weak<Registry>,
    conn: Arc<Connection>,
    config: HeartbeatConfig,
) -> JoinHandle<()> {
    tokio::spawn(run(registry, conn, config))
}

async fn run(registry: Weak<Registry>, conn: Arc<Connection>, config: HeartbeatConfig) {
    loop {
        time::sleep(config.interval).await;
        if conn.is_closed() {
            break;
        }

        // Arm before pinging so a fast pong cannot slip past.
        let pong = conn.arm_pong();
        match time::timeout(config.timeout, conn.send(&ServerEvent::Ping)).await {
            Ok(Ok(())) => trace!(connection = %conn.id(), "Ping sent"),
            Ok(Err(e)) => {
                debug!(
                    identity = conn.identity(),
                    connection = %conn.id(),
                    "Ping failed: {}", e
                );
                evict(&registry, &conn).await;
                break;
            }
            Err(_) => {
                warn!(
                    identity = conn.identity(),
                    connection = %conn.id(),
                    timeout_ms = config.timeout.as_millis() as u64,
                    "Ping not written in time"
                );
                evict(&registry, &conn).await;
                break;
            }
        }

        match time::timeout(config.timeout, pong).await {
            Ok(Ok(())) => trace!(connection = %conn.id(), "Pong received"),
            // Signal dropped: the connection is being torn down elsewhere.
            Ok(Err(_)) => break,
            Err(_) => {
                warn!(
                    identity = conn.identity(),
                    connection = %conn.id(),
                    timeout_ms = config.timeout.as_millis() as u64,
                    "Heartbeat timeout"
                );
                evict(&registry, &conn).await;
                break;
            }
        }
    }

    debug!(connection = %conn.id(), "Heartbeat stopped");
}

async fn evict(registry: &Weak<Registry>, conn: &Arc<Connection>) {
    match registry.upgrade() {
        Some(registry) => {
            registry.evict_unresponsive(conn).await;
        }
        None => {
            conn.close(murmur_protocol::CloseCode::Evicted).await;
        }
    }
}
