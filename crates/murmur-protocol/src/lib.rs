//! # murmur-protocol
//!
//! Wire protocol definitions for the murmur realtime chat hub.
//!
//! Every WebSocket text frame carries one JSON object. Clients send
//! [`ClientFrame`]s selected by their `type` field (a frame without `type` is a
//! plain chat message); the server pushes [`ServerEvent`]s.
//!
//! ## Frame Types
//!
//! - `message` / `reply_message` / `reply_to_share` - Send chat entries
//! - `edit_message` / `delete_for_everyone` / `delete_share_for_everyone` - Mutate sent entries
//! - `reaction` / `shared_post_reaction` - Toggle emoji reactions
//! - `typing` / `read_receipt` - Ephemeral and read-state signals
//! - `pong` - Heartbeat answer to a server `ping`
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ClientFrame, ServerEvent};
//!
//! let frame = codec::decode(r#"{"to": 2, "content": "hi"}"#).unwrap();
//! assert!(matches!(frame, ClientFrame::Message(_)));
//!
//! let ping = codec::encode(&ServerEvent::Ping).unwrap();
//! assert_eq!(ping, r#"{"type":"ping"}"#);
//! ```

pub mod close;
pub mod codec;
pub mod events;
pub mod frames;

pub use close::CloseCode;
pub use codec::{decode, encode, ProtocolError};
pub use events::{ChatMessage, ReactionUpdate, ReplyPreview, ServerEvent, SharedPostPreview};
pub use frames::{ClientFrame, FrameType};

/// Authenticated user id. Opaque to the hub.
pub type Identity = i64;

/// A media attachment reference carried by a chat entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaRef {
    /// Where the media lives.
    pub url: String,
    /// Media kind such as `image`, `video` or `audio`.
    pub media_type: Option<String>,
}
