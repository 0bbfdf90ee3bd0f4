//! # murmur-transport
//!
//! Transport abstraction layer for the murmur chat hub.
//!
//! A [`Transport`] is the write half of one live client session. The hub owns
//! it exclusively, serializes writes to it, and closes it at most once. The
//! read half stays with the receive loop that admitted the connection.
//!
//! - **WebSocket** - axum WebSocket sink, used by the server
//! - **Memory** - channel-backed transport for embedding and tests
//!
//! ```rust,ignore
//! use murmur_transport::{Transport, memory};
//!
//! let (mut transport, mut peer) = memory::pair();
//! transport.send(&ServerEvent::Ping).await?;
//! assert_eq!(peer.next_event().await, Some(ServerEvent::Ping));
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
