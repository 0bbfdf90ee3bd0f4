//! In-memory transport backed by a channel.
//!
//! The [`MemoryPeer`] sees exactly what a client on the other end of a socket
//! would see: text frames in order, then at most one close.
//!
//! The peer can also degrade the link: [`MemoryPeer::break_link`] makes
//! writes fail, [`MemoryPeer::stall_link`] makes them hang like a socket
//! whose buffer never drains.

use async_trait::async_trait;
use murmur_protocol::{CloseCode, ServerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Transport, TransportError};

/// What the server wrote to a memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseCode),
}

/// Create a connected transport and peer.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let link = Arc::new(Link::default());
    let transport = MemoryTransport {
        tx,
        is_open: true,
        link: Arc::clone(&link),
    };
    (transport, MemoryPeer { rx, link })
}

#[derive(Debug, Default)]
struct Link {
    broken: AtomicBool,
    stalled: AtomicBool,
}

impl Link {
    async fn wait_writable(&self) {
        if self.stalled.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
    }
}

/// Server side of an in-memory session.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    is_open: bool,
    link: Arc<Link>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        if self.link.broken.load(Ordering::Acquire) {
            return Err(TransportError::SendFailed("peer unreachable".into()));
        }
        self.link.wait_writable().await;
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.link.wait_writable().await;
        self.is_open = false;
        // A dropped peer has nothing left to notify.
        let _ = self.tx.send(Outbound::Close(code));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Client side of an in-memory session.
pub struct MemoryPeer {
    rx: mpsc::UnboundedReceiver<Outbound>,
    link: Arc<Link>,
}

impl MemoryPeer {
    /// Wait for the next thing the server wrote.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Take the next thing the server wrote, if any is queued.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the session is closed or the text is not an event.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        match self.rx.recv().await? {
            Outbound::Text(text) => serde_json::from_str(&text).ok(),
            Outbound::Close(_) => None,
        }
    }

    /// All events queued so far, in order. Stops at a close.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Some(Outbound::Text(text)) = self.try_recv() {
            if let Ok(event) = serde_json::from_str(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Every remaining item, including closes, without waiting.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Some(item) = self.try_recv() {
            items.push(item);
        }
        items
    }

    /// Make every later send on the transport fail, as if the network dropped.
    pub fn break_link(&self) {
        self.link.broken.store(true, Ordering::Release);
    }

    /// Make every later write on the transport, close frames included,
    /// never complete.
    pub fn stall_link(&self) {
        self.link.stalled.store(true, Ordering::Release);
    }
}
