//! Rows and views returned by the event store.

use chrono::{DateTime, SecondsFormat, Utc};
use murmur_protocol::{
    ChatMessage, Identity, MediaRef, ReplyPreview, ServerEvent, SharedPostPreview,
};

/// Store timestamps are UTC instants.
pub type Timestamp = DateTime<Utc>;

/// Maximum characters of a post title shown in a share preview.
pub const SHARE_TITLE_PREVIEW_CHARS: usize = 60;

/// Maximum characters of post content shown in a reply-to-share preview.
pub const POST_CONTENT_PREVIEW_CHARS: usize = 100;

/// Render a timestamp in the fixed-width form used on the wire and in the
/// database. Fixed width keeps lexical and chronological order identical.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_timestamp`].
///
/// # Errors
///
/// Returns an error if the text is not RFC 3339.
pub fn parse_timestamp(text: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc))
}

/// Truncate to `max_chars` characters, appending `...` when anything was cut.
#[must_use]
pub fn preview_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// A known user. Identities are owned elsewhere; this only carries display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Identity,
    pub username: String,
    pub nickname: String,
}

/// A post that can be shared into a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub owner_id: Identity,
    pub title: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

/// What a reply message points at. At most one target, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyTarget {
    #[default]
    None,
    Message(i64),
    SharedPost(i64),
}

impl ReplyTarget {
    #[must_use]
    pub fn is_reply(self) -> bool {
        !matches!(self, ReplyTarget::None)
    }

    pub(crate) fn from_columns(message: Option<i64>, shared_post: Option<i64>) -> Self {
        match (message, shared_post) {
            (Some(id), _) => ReplyTarget::Message(id),
            (None, Some(id)) => ReplyTarget::SharedPost(id),
            (None, None) => ReplyTarget::None,
        }
    }
}

/// A message or a shared post, addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Message(i64),
    SharedPost(i64),
}

impl EntityRef {
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            EntityRef::Message(id) | EntityRef::SharedPost(id) => id,
        }
    }

    /// Name used in errors and logs.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            EntityRef::Message(_) => "message",
            EntityRef::SharedPost(_) => "shared post",
        }
    }
}

/// A directed chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub sender_id: Identity,
    pub receiver_id: Identity,
    pub content: Option<String>,
    pub media: Option<MediaRef>,
    pub created_at: Timestamp,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub is_edited: bool,
    pub edited_at: Option<Timestamp>,
    pub is_deleted_for_everyone: bool,
    pub reaction_count: i64,
    pub reply_to: ReplyTarget,
}

impl Message {
    #[must_use]
    pub fn is_participant(&self, identity: Identity) -> bool {
        self.sender_id == identity || self.receiver_id == identity
    }

    /// The other side of the conversation from `identity`'s point of view.
    #[must_use]
    pub fn peer_of(&self, identity: Identity) -> Identity {
        if self.sender_id == identity {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// A post shared from one identity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPost {
    pub id: i64,
    pub post_id: i64,
    pub sender_id: Identity,
    pub receiver_id: Identity,
    pub caption: Option<String>,
    pub created_at: Timestamp,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub is_deleted_for_everyone: bool,
    pub reaction_count: i64,
}

impl SharedPost {
    #[must_use]
    pub fn is_participant(&self, identity: Identity) -> bool {
        self.sender_id == identity || self.receiver_id == identity
    }
}

/// A message with everything a client needs to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub sender_nickname: Option<String>,
    pub reply_preview: Option<ReplyPreview>,
}

impl MessageView {
    /// Wire form of this message.
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        let m = &self.message;
        ChatMessage {
            id: m.id,
            content: m.content.clone(),
            media_url: m.media.as_ref().map(|media| media.url.clone()),
            media_type: m.media.as_ref().and_then(|media| media.media_type.clone()),
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            sender_nickname: self.sender_nickname.clone(),
            timestamp: format_timestamp(&m.created_at),
            is_read: m.is_read,
            is_edited: m.is_edited,
            reaction_count: m.reaction_count,
            is_reply: m.reply_to.is_reply(),
            is_reply_to_share: matches!(m.reply_to, ReplyTarget::SharedPost(_)),
            reply_to: self.reply_preview.clone(),
        }
    }
}

/// A shared post joined with the post it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPostView {
    pub share: SharedPost,
    pub title: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub owner_nickname: Option<String>,
    pub sender_nickname: Option<String>,
}

impl SharedPostView {
    /// Wire form of this share.
    #[must_use]
    pub fn to_preview(&self) -> SharedPostPreview {
        let s = &self.share;
        let sender_nickname = self
            .sender_nickname
            .clone()
            .unwrap_or_else(|| format!("user {}", s.sender_id));
        let caption_message = s
            .caption
            .clone()
            .or_else(|| Some(format!("{sender_nickname} shared a post with you!")));

        SharedPostPreview {
            shared_id: s.id,
            post_id: s.post_id,
            sender_id: s.sender_id,
            receiver_id: s.receiver_id,
            title: preview_text(&self.title, SHARE_TITLE_PREVIEW_CHARS),
            media_type: self.media_type.clone(),
            media_url: self.media_url.clone(),
            owner_nickname: self.owner_nickname.clone(),
            sender_nickname,
            caption_message,
            sent_at: format_timestamp(&s.created_at),
            is_read: s.is_read,
        }
    }
}

/// One entry of a conversation timeline or a backlog.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationItem {
    Message(MessageView),
    SharedPost(SharedPostView),
}

impl ConversationItem {
    /// Creation time, the merge key for timelines.
    #[must_use]
    pub fn sent_at(&self) -> Timestamp {
        match self {
            ConversationItem::Message(view) => view.message.created_at,
            ConversationItem::SharedPost(view) => view.share.created_at,
        }
    }

    #[must_use]
    pub fn entity(&self) -> EntityRef {
        match self {
            ConversationItem::Message(view) => EntityRef::Message(view.message.id),
            ConversationItem::SharedPost(view) => EntityRef::SharedPost(view.share.id),
        }
    }

    /// Who the entry is addressed to.
    #[must_use]
    pub fn receiver_id(&self) -> Identity {
        match self {
            ConversationItem::Message(view) => view.message.receiver_id,
            ConversationItem::SharedPost(view) => view.share.receiver_id,
        }
    }

    /// Reflect a successful delivery that was committed at `at`.
    pub fn mark_read(&mut self, at: Timestamp) {
        match self {
            ConversationItem::Message(view) => {
                view.message.is_read = true;
                view.message.read_at = Some(at);
            }
            ConversationItem::SharedPost(view) => {
                view.share.is_read = true;
                view.share.read_at = Some(at);
            }
        }
    }

    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        match self {
            ConversationItem::Message(view) => ServerEvent::Message(view.to_chat_message()),
            ConversationItem::SharedPost(view) => ServerEvent::SharedPost(view.to_preview()),
        }
    }
}

/// Result of a reaction toggle, committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionOutcome {
    pub target: EntityRef,
    /// The reactor's reaction after the toggle, `None` when it was removed.
    pub reaction: Option<String>,
    pub reaction_count: i64,
    pub sender_id: Identity,
    pub receiver_id: Identity,
}

/// Result of an edit request from the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Content replaced; holds the updated row.
    Updated(Message),
    /// New content equals the old; nothing written.
    Unchanged(Message),
    /// The edit window has closed.
    Expired,
}

/// Delivery details of a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub message_id: i64,
    pub delivered_at: Timestamp,
    pub read_at: Option<Timestamp>,
    pub is_read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();
        let text = format_timestamp(&whole);
        assert_eq!(text, "2025-03-01T09:05:00.000000Z");
        assert_eq!(parse_timestamp(&text).unwrap(), whole);

        let later = whole + chrono::Duration::microseconds(1500);
        assert!(format_timestamp(&later) > text);
        assert_eq!(format_timestamp(&later).len(), text.len());
    }

    #[test]
    fn test_preview_text() {
        assert_eq!(preview_text("short", 60), "short");
        assert_eq!(preview_text("abcdef", 3), "abc...");
        assert_eq!(preview_text("abc", 3), "abc");
        assert_eq!(preview_text("héllo wörld", 4), "héll...");
    }

    #[test]
    fn test_reply_target_columns() {
        assert_eq!(ReplyTarget::from_columns(None, None), ReplyTarget::None);
        assert_eq!(ReplyTarget::from_columns(Some(3), None), ReplyTarget::Message(3));
        assert_eq!(ReplyTarget::from_columns(None, Some(8)), ReplyTarget::SharedPost(8));
        assert!(!ReplyTarget::None.is_reply());
    }
}
