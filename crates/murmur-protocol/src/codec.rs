//! Codec for decoding client frames and encoding server events.
//!
//! Both directions are JSON text, one object per WebSocket frame.

use thiserror::Error;

use crate::events::ServerEvent;
use crate::frames::{ClientFrame, FrameType};

/// Maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not valid JSON.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object envelope.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// The `type` discriminator names no known frame.
    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    /// The payload does not match its frame type.
    #[error("Invalid {frame_type} frame: {source}")]
    InvalidFrame {
        frame_type: FrameType,
        source: serde_json::Error,
    },

    /// A message frame with neither content nor media.
    #[error("Message has neither content nor media")]
    EmptyMessage,

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Decode a client frame from a text payload.
///
/// # Errors
///
/// Returns an error if the text is too large, is not JSON, or does not
/// describe a known frame.
pub fn decode(text: &str) -> Result<ClientFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    ClientFrame::from_value(value)
}

/// Encode a server event to its JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
