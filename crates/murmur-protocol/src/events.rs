//! Outbound events pushed by the server.
//!
//! Field names are part of the client contract and must not change.

use serde::{Deserialize, Serialize};

use crate::Identity;

/// An event pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A chat message, live or from the backlog.
    Message(ChatMessage),

    /// A post shared into the conversation.
    SharedPost(SharedPostPreview),

    /// Reaction state changed on a message or shared post.
    ReactionUpdate { data: ReactionUpdate },

    /// A message was deleted for everyone.
    MessageDeleted {
        message_id: i64,
        is_deleted_for_everyone: bool,
    },

    /// A shared post was deleted for everyone.
    ShareDeleted {
        share_id: i64,
        is_deleted_for_everyone: bool,
    },

    /// A message was edited. `new_content` is absent when the edit was a no-op.
    EditedMsg {
        message_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_content: Option<String>,
        is_edited: bool,
    },

    /// The peer started or stopped typing.
    Typing {
        sender_id: Identity,
        typing_status: bool,
    },

    /// The peer read the conversation up to `read_at`.
    ReadReceipt {
        reader_id: Identity,
        read_at: String,
        conversation_with: Identity,
    },

    /// Heartbeat ping; the client answers with `{"type":"pong"}`.
    Ping,
}

impl ServerEvent {
    /// Wire name of the event type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::SharedPost(_) => "shared_post",
            ServerEvent::ReactionUpdate { .. } => "reaction_update",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::ShareDeleted { .. } => "share_deleted",
            ServerEvent::EditedMsg { .. } => "edited_msg",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::ReadReceipt { .. } => "read_receipt",
            ServerEvent::Ping => "ping",
        }
    }
}

/// A rendered chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub sender_id: Identity,
    pub receiver_id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_nickname: Option<String>,
    /// Creation time, RFC 3339.
    pub timestamp: String,
    pub is_read: bool,
    pub is_edited: bool,
    #[serde(default)]
    pub reaction_count: i64,
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_reply_to_share: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}

/// Preview of the entry a reply points at, so clients can render without a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyPreview {
    Message {
        msg_id: i64,
        content: Option<String>,
        sender_name: String,
    },
    SharedPost {
        shared_post_id: i64,
        post_id: i64,
        post_content: String,
        post_owner: String,
        media_url: Option<String>,
    },
}

/// A shared post as rendered in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedPostPreview {
    pub shared_id: i64,
    pub post_id: i64,
    pub sender_id: Identity,
    pub receiver_id: Identity,
    pub title: String,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_nickname: Option<String>,
    pub sender_nickname: String,
    pub caption_message: Option<String>,
    /// Share time, RFC 3339.
    pub sent_at: String,
    pub is_read: bool,
}

/// Payload of a `reaction_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionUpdate {
    /// Message or shared post id.
    pub message_id: i64,
    /// The reactor's emoji now, `null` when their reaction was removed.
    pub reaction: Option<String>,
    pub reaction_count: i64,
    pub reacted_by: Identity,
}
