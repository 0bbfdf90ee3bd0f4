//! Transport abstraction traits for murmur.
//!
//! The hub only ever writes to a transport, so the trait covers the outbound
//! half of a session: sending text frames and closing with a code.

use async_trait::async_trait;
use murmur_protocol::{codec, CloseCode, ProtocolError, ServerEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one admitted session.
///
/// Identities can reconnect; connection ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The peer stopped draining writes.
    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The outbound half of a live client session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the session with the given code.
    ///
    /// Closing an already closed transport is a no-op.
    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError>;

    /// Check if the transport is still open for writing.
    fn is_open(&self) -> bool;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;

    /// Get the remote address of the session, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Encode and send a server event.
    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        let text = codec::encode(event)?;
        self.send_text(text).await
    }
}
