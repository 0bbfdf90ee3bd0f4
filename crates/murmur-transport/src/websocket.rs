//! WebSocket transport implementation.
//!
//! Wraps the write half of an axum WebSocket. The server splits the socket on
//! upgrade, hands the sink to the hub and keeps the stream for its receive loop.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use murmur_protocol::CloseCode;
use std::borrow::Cow;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{Transport, TransportError};

/// Outbound half of an axum WebSocket session.
pub struct WebSocketTransport {
    sink: SplitSink<WebSocket, Message>,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
}

impl WebSocketTransport {
    /// Wrap the sink half of a split WebSocket.
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, Message>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            sink,
            remote_addr,
            is_open: true,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink.send(Message::Text(text)).await.map_err(|e| {
            self.is_open = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        debug!(code = code.code(), "Closing WebSocket");

        let frame = CloseFrame {
            code: code.code(),
            reason: Cow::Borrowed(code.reason()),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            // The peer may already be gone; the socket is finished either way.
            warn!("Failed to send close frame: {}", e);
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn name(&self) -> &'static str {
        "websocket"
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
