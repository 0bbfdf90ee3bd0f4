//! One live session bound to an identity.

use murmur_protocol::{CloseCode, Identity, ServerEvent};
use murmur_transport::{ConnectionId, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_WRITE_TIMEOUT;

/// A live connection.
///
/// Owns its transport exclusively. Writes go through an async mutex so two
/// handlers pushing to the same peer never interleave frames, and the
/// transport is closed at most once. Every write, lock wait included, is
/// bounded by the write timeout, so a peer that stops reading can only ever
/// hold up the caller for that long.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    transport: AsyncMutex<Box<dyn Transport>>,
    write_timeout: Duration,
    closed: AtomicBool,
    closed_notify: Notify,
    /// Fired by the next pong. Replaced every heartbeat cycle.
    pong_signal: Mutex<Option<oneshot::Sender<()>>>,
    last_pong: Mutex<Option<Instant>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    connected_at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    /// Bind a transport to an identity.
    #[must_use]
    pub fn new(identity: Identity, transport: Box<dyn Transport>) -> Self {
        Self::with_write_timeout(identity, transport, DEFAULT_WRITE_TIMEOUT)
    }

    #[must_use]
    pub fn with_write_timeout(
        identity: Identity,
        transport: Box<dyn Transport>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            identity,
            transport: AsyncMutex::new(transport),
            write_timeout,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            pong_signal: Mutex::new(None),
            last_pong: Mutex::new(None),
            heartbeat: Mutex::new(None),
            connected_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// When the last pong arrived, if ever.
    #[must_use]
    pub fn last_pong(&self) -> Option<Instant> {
        *lock(&self.last_pong)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is closed by either side.
    pub async fn closed(&self) {
        let notified = self.closed_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Push one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed, the transport fails or
    /// the write does not finish within the write timeout.
    pub async fn send(&self, event: &ServerEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let write = async {
            let mut transport = self.transport.lock().await;
            transport.send(event).await
        };
        time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| TransportError::Timeout(self.write_timeout))??;
        trace!(connection = %self.id, event = event.type_name(), "Pushed event");
        Ok(())
    }

    /// Close the transport with `code`. Only the first close reaches the
    /// transport; returns whether this call was it.
    pub async fn close(&self, code: CloseCode) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed_notify.notify_waiters();
        let shutdown = async {
            let mut transport = self.transport.lock().await;
            transport.close(code).await
        };
        match time::timeout(self.write_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection = %self.id, "Close failed: {}", e),
            Err(_) => warn!(
                connection = %self.id,
                timeout_ms = self.write_timeout.as_millis() as u64,
                "Close frame not written, abandoning transport"
            ),
        }
        true
    }

    /// Record that the peer is already closing, so no close is sent.
    pub fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.closed_notify.notify_waiters();
        }
        first
    }

    /// Start a heartbeat cycle: any earlier, unanswered signal is discarded.
    pub(crate) fn arm_pong(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.pong_signal) = Some(tx);
        rx
    }

    /// Deliver a pong to the heartbeat monitor. Returns false if no ping was
    /// outstanding.
    pub fn signal_pong(&self) -> bool {
        *lock(&self.last_pong) = Some(Instant::now());
        match lock(&self.pong_signal).take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub(crate) fn set_heartbeat(&self, handle: JoinHandle<()>) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        if let Some(previous) = lock(&self.heartbeat).replace(handle) {
            previous.abort();
        }
    }

    /// Abort the heartbeat task. Must not be called from that task.
    pub(crate) fn cancel_heartbeat(&self) {
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
    }

    /// Drop the heartbeat handle without aborting, for use by the heartbeat
    /// task itself, which is about to return.
    pub(crate) fn detach_heartbeat(&self) {
        lock(&self.heartbeat).take();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
