//! Inbound frame types for the murmur protocol.
//!
//! Frames are classified by their `type` discriminator and then decoded into
//! the payload struct of that type. Unknown fields are ignored so older and
//! newer clients can share the wire.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::codec::ProtocolError;
use crate::{Identity, MediaRef};

/// Frame type identifiers, as they appear in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Message,
    ReplyMessage,
    ReplyToShare,
    DeleteForEveryone,
    DeleteShareForEveryone,
    EditMessage,
    Reaction,
    SharedPostReaction,
    Typing,
    ReadReceipt,
    Pong,
}

impl FrameType {
    /// Wire name of this frame type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Message => "message",
            FrameType::ReplyMessage => "reply_message",
            FrameType::ReplyToShare => "reply_to_share",
            FrameType::DeleteForEveryone => "delete_for_everyone",
            FrameType::DeleteShareForEveryone => "delete_share_for_everyone",
            FrameType::EditMessage => "edit_message",
            FrameType::Reaction => "reaction",
            FrameType::SharedPostReaction => "shared_post_reaction",
            FrameType::Typing => "typing",
            FrameType::ReadReceipt => "read_receipt",
            FrameType::Pong => "pong",
        }
    }
}

impl TryFrom<&str> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "message" => Ok(FrameType::Message),
            "reply_message" => Ok(FrameType::ReplyMessage),
            "reply_to_share" => Ok(FrameType::ReplyToShare),
            "delete_for_everyone" => Ok(FrameType::DeleteForEveryone),
            "delete_share_for_everyone" => Ok(FrameType::DeleteShareForEveryone),
            "edit_message" => Ok(FrameType::EditMessage),
            "reaction" => Ok(FrameType::Reaction),
            "shared_post_reaction" => Ok(FrameType::SharedPostReaction),
            "typing" => Ok(FrameType::Typing),
            "read_receipt" => Ok(FrameType::ReadReceipt),
            "pong" => Ok(FrameType::Pong),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message to another identity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessage {
    /// Receiver.
    #[serde(deserialize_with = "lenient::id")]
    pub to: Identity,
    /// Text body, absent for media-only messages.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// A reply to an earlier message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyMessage {
    #[serde(deserialize_with = "lenient::id")]
    pub to: Identity,
    /// The message being replied to.
    #[serde(deserialize_with = "lenient::id")]
    pub reply_msg_id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// A reply to a shared post.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyToShare {
    #[serde(deserialize_with = "lenient::id")]
    pub to: Identity,
    #[serde(deserialize_with = "lenient::id")]
    pub shared_post_id: i64,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// Delete a message (or a share, where `message_id` is the share id) for both parties.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteRequest {
    #[serde(deserialize_with = "lenient::id")]
    pub message_id: i64,
    #[serde(deserialize_with = "lenient::id")]
    pub receiver_id: Identity,
}

/// Replace the text of a sent message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EditMessage {
    #[serde(deserialize_with = "lenient::id")]
    pub msg_id: i64,
    pub new_content: String,
    #[serde(deserialize_with = "lenient::id")]
    pub receiver_id: Identity,
}

/// React to a message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageReaction {
    #[serde(deserialize_with = "lenient::id")]
    pub message_id: i64,
    /// Emoji.
    pub reaction: String,
}

/// React to a shared post.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SharedPostReaction {
    #[serde(deserialize_with = "lenient::id")]
    pub shared_post_id: i64,
    pub reaction: String,
}

/// Typing indicator for a conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Typing {
    #[serde(deserialize_with = "lenient::id")]
    pub receiver_id: Identity,
    #[serde(default)]
    pub is_typing: bool,
}

/// The reader has seen everything `sender_id` sent them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadReceipt {
    #[serde(deserialize_with = "lenient::id")]
    pub sender_id: Identity,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Message(SendMessage),
    ReplyMessage(ReplyMessage),
    ReplyToShare(ReplyToShare),
    DeleteForEveryone(DeleteRequest),
    DeleteShareForEveryone(DeleteRequest),
    EditMessage(EditMessage),
    Reaction(MessageReaction),
    SharedPostReaction(SharedPostReaction),
    Typing(Typing),
    ReadReceipt(ReadReceipt),
    Pong,
}

impl ClientFrame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientFrame::Message(_) => FrameType::Message,
            ClientFrame::ReplyMessage(_) => FrameType::ReplyMessage,
            ClientFrame::ReplyToShare(_) => FrameType::ReplyToShare,
            ClientFrame::DeleteForEveryone(_) => FrameType::DeleteForEveryone,
            ClientFrame::DeleteShareForEveryone(_) => FrameType::DeleteShareForEveryone,
            ClientFrame::EditMessage(_) => FrameType::EditMessage,
            ClientFrame::Reaction(_) => FrameType::Reaction,
            ClientFrame::SharedPostReaction(_) => FrameType::SharedPostReaction,
            ClientFrame::Typing(_) => FrameType::Typing,
            ClientFrame::ReadReceipt(_) => FrameType::ReadReceipt,
            ClientFrame::Pong => FrameType::Pong,
        }
    }

    /// Classify and decode a JSON value.
    ///
    /// A missing or `null` `type` means `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object, the type is unknown,
    /// or the payload does not match the type.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let frame_type = {
            let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
            match object.get("type") {
                None | Some(Value::Null) => FrameType::Message,
                Some(Value::String(name)) => FrameType::try_from(name.as_str())?,
                Some(_) => return Err(ProtocolError::Invalid("type must be a string".into())),
            }
        };

        let frame = match frame_type {
            FrameType::Message => {
                let msg: SendMessage = payload(frame_type, value)?;
                if msg.content.is_none() && msg.media_url.is_none() {
                    return Err(ProtocolError::EmptyMessage);
                }
                ClientFrame::Message(msg)
            }
            FrameType::ReplyMessage => {
                let reply: ReplyMessage = payload(frame_type, value)?;
                if reply.content.is_none() && reply.media_url.is_none() {
                    return Err(ProtocolError::EmptyMessage);
                }
                ClientFrame::ReplyMessage(reply)
            }
            FrameType::ReplyToShare => {
                let reply: ReplyToShare = payload(frame_type, value)?;
                if reply.content.is_none() && reply.media_url.is_none() {
                    return Err(ProtocolError::EmptyMessage);
                }
                ClientFrame::ReplyToShare(reply)
            }
            FrameType::DeleteForEveryone => {
                ClientFrame::DeleteForEveryone(payload(frame_type, value)?)
            }
            FrameType::DeleteShareForEveryone => {
                ClientFrame::DeleteShareForEveryone(payload(frame_type, value)?)
            }
            FrameType::EditMessage => {
                let mut edit: EditMessage = payload(frame_type, value)?;
                edit.new_content = edit.new_content.trim().to_string();
                if edit.new_content.is_empty() {
                    return Err(ProtocolError::Invalid("new_content is empty".into()));
                }
                ClientFrame::EditMessage(edit)
            }
            FrameType::Reaction => ClientFrame::Reaction(payload(frame_type, value)?),
            FrameType::SharedPostReaction => {
                ClientFrame::SharedPostReaction(payload(frame_type, value)?)
            }
            FrameType::Typing => ClientFrame::Typing(payload(frame_type, value)?),
            FrameType::ReadReceipt => ClientFrame::ReadReceipt(payload(frame_type, value)?),
            FrameType::Pong => ClientFrame::Pong,
        };

        Ok(frame)
    }
}

impl SendMessage {
    /// Media attachment, if the frame carries one.
    #[must_use]
    pub fn media(&self) -> Option<MediaRef> {
        media_ref(&self.media_url, &self.media_type)
    }
}

impl ReplyMessage {
    #[must_use]
    pub fn media(&self) -> Option<MediaRef> {
        media_ref(&self.media_url, &self.media_type)
    }
}

impl ReplyToShare {
    #[must_use]
    pub fn media(&self) -> Option<MediaRef> {
        media_ref(&self.media_url, &self.media_type)
    }
}

fn media_ref(url: &Option<String>, media_type: &Option<String>) -> Option<MediaRef> {
    url.as_ref().map(|url| MediaRef {
        url: url.clone(),
        media_type: media_type.clone(),
    })
}

fn payload<T: DeserializeOwned>(frame_type: FrameType, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value)
        .map_err(|source| ProtocolError::InvalidFrame { frame_type, source })
}

/// Clients send ids both as numbers and as numeric strings.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match RawId::deserialize(deserializer)? {
            RawId::Number(id) => Ok(id),
            RawId::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid id: {text:?}"))),
        }
    }
}
